//! Table of reduction operators that may be split across parallel partial
//! accumulators, with the identity each partial starts from.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericType {
    Int,
    Float,
}

impl NumericType {
    /// Julia spelling, used in explanations and emitted code.
    pub fn julia_name(self) -> &'static str {
        match self {
            NumericType::Int => "Int",
            NumericType::Float => "Float64",
        }
    }
}

impl FromStr for NumericType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Int" | "Int64" | "int" => Ok(NumericType::Int),
            "Float" | "Float64" | "float" => Ok(NumericType::Float),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.julia_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssocOp {
    Add,
    Mul,
    Sum,
    Prod,
    Max,
    Min,
    BitOr,
    BitAnd,
    BitXor,
}

pub const ALL_OPS: [AssocOp; 9] = [
    AssocOp::Add,
    AssocOp::Mul,
    AssocOp::Sum,
    AssocOp::Prod,
    AssocOp::Max,
    AssocOp::Min,
    AssocOp::BitOr,
    AssocOp::BitAnd,
    AssocOp::BitXor,
];

const NUMERIC: &[NumericType] = &[NumericType::Float, NumericType::Int];
const INTEGRAL: &[NumericType] = &[NumericType::Int];

impl AssocOp {
    pub fn from_name(name: &str) -> Option<AssocOp> {
        match name {
            "+" => Some(AssocOp::Add),
            "*" => Some(AssocOp::Mul),
            "sum" => Some(AssocOp::Sum),
            "prod" => Some(AssocOp::Prod),
            "max" => Some(AssocOp::Max),
            "min" => Some(AssocOp::Min),
            "|" => Some(AssocOp::BitOr),
            "&" => Some(AssocOp::BitAnd),
            "^" => Some(AssocOp::BitXor),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AssocOp::Add => "+",
            AssocOp::Mul => "*",
            AssocOp::Sum => "sum",
            AssocOp::Prod => "prod",
            AssocOp::Max => "max",
            AssocOp::Min => "min",
            AssocOp::BitOr => "|",
            AssocOp::BitAnd => "&",
            AssocOp::BitXor => "^",
        }
    }

    /// Element types the operator is associative over.
    pub fn supported_types(self) -> &'static [NumericType] {
        match self {
            AssocOp::BitOr | AssocOp::BitAnd | AssocOp::BitXor => INTEGRAL,
            _ => NUMERIC,
        }
    }

    pub fn identity(self) -> Identity {
        match self {
            AssocOp::Add | AssocOp::Sum | AssocOp::BitOr | AssocOp::BitXor => Identity::Zero,
            AssocOp::Mul | AssocOp::Prod => Identity::One,
            AssocOp::BitAnd => Identity::AllOnes,
            AssocOp::Max => Identity::NegInf,
            AssocOp::Min => Identity::PosInf,
        }
    }

    /// Apply the operator to two integers, wrapping on overflow.
    pub fn combine_int(self, a: i64, b: i64) -> i64 {
        match self {
            AssocOp::Add | AssocOp::Sum => a.wrapping_add(b),
            AssocOp::Mul | AssocOp::Prod => a.wrapping_mul(b),
            AssocOp::Max => a.max(b),
            AssocOp::Min => a.min(b),
            AssocOp::BitOr => a | b,
            AssocOp::BitAnd => a & b,
            AssocOp::BitXor => a ^ b,
        }
    }

    /// Julia expression folding `value` into the accumulator `acc`.
    pub fn julia_combine(self, acc: &str, value: &str) -> String {
        match self {
            AssocOp::Max => format!("max({}, {})", acc, value),
            AssocOp::Min => format!("min({}, {})", acc, value),
            AssocOp::BitXor => format!("xor({}, {})", acc, value),
            infix => format!("{} {} {}", acc, infix.julia_reducer(), operand(value)),
        }
    }

    /// Julia function usable with `reduce` to merge partials.
    pub fn julia_reducer(self) -> &'static str {
        match self {
            AssocOp::Add | AssocOp::Sum => "+",
            AssocOp::Mul | AssocOp::Prod => "*",
            AssocOp::Max => "max",
            AssocOp::Min => "min",
            AssocOp::BitOr => "|",
            AssocOp::BitAnd => "&",
            AssocOp::BitXor => "xor",
        }
    }
}

fn operand(value: &str) -> String {
    if value.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        value.to_string()
    } else {
        format!("({})", value)
    }
}

/// Neutral element of an associative operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Zero,
    One,
    /// All bits set, the identity of bitwise and.
    AllOnes,
    NegInf,
    PosInf,
}

impl Identity {
    /// Julia literal for the identity at the given element type.
    pub fn julia_literal(self, ty: NumericType) -> &'static str {
        match (self, ty) {
            (Identity::Zero, NumericType::Int) => "0",
            (Identity::Zero, NumericType::Float) => "0.0",
            (Identity::One, NumericType::Int) => "1",
            (Identity::One, NumericType::Float) => "1.0",
            (Identity::AllOnes, _) => "-1",
            (Identity::NegInf, NumericType::Int) => "typemin(Int)",
            (Identity::NegInf, NumericType::Float) => "-Inf",
            (Identity::PosInf, NumericType::Int) => "typemax(Int)",
            (Identity::PosInf, NumericType::Float) => "Inf",
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Identity::Zero => 0,
            Identity::One => 1,
            Identity::AllOnes => -1,
            Identity::NegInf => i64::MIN,
            Identity::PosInf => i64::MAX,
        }
    }
}

/// Why an operator/type pair cannot be split across partials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NonAssociative(String),
    UnsupportedType {
        op: &'static str,
        ty: String,
        supported: &'static [NumericType],
    },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::NonAssociative(op) => write!(f, "non-associative op '{}'", op),
            Denial::UnsupportedType { op, ty, supported } => {
                let names: Vec<&str> = supported.iter().map(|t| t.julia_name()).collect();
                write!(
                    f,
                    "type '{}' not supported for '{}' (supported: {})",
                    ty,
                    op,
                    names.join(", ")
                )
            }
        }
    }
}

/// An operator/type pair that passed the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub op: AssocOp,
    pub ty: NumericType,
    pub identity: Identity,
}

impl Grant {
    pub fn identity_literal(&self) -> &'static str {
        self.identity.julia_literal(self.ty)
    }
}

/// Look up `(op, elem_type)` in the table.
pub fn check(op: &str, elem_type: &str) -> Result<Grant, Denial> {
    let assoc = AssocOp::from_name(op).ok_or_else(|| Denial::NonAssociative(op.to_string()))?;
    let unsupported = || Denial::UnsupportedType {
        op: assoc.name(),
        ty: elem_type.to_string(),
        supported: assoc.supported_types(),
    };
    let ty: NumericType = elem_type.parse().map_err(|_| unsupported())?;
    if !assoc.supported_types().contains(&ty) {
        return Err(unsupported());
    }
    Ok(Grant {
        op: assoc,
        ty,
        identity: assoc.identity(),
    })
}

pub fn is_associative(op: &str, elem_type: &str) -> bool {
    check(op, elem_type).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_int_is_associative() {
        let grant = check("sum", "Int").unwrap();
        assert_eq!(grant.identity, Identity::Zero);
        assert_eq!(grant.identity_literal(), "0");
    }

    #[test]
    fn test_extreme_identities_per_type() {
        assert_eq!(check("max", "Int").unwrap().identity_literal(), "typemin(Int)");
        assert_eq!(check("max", "Float64").unwrap().identity_literal(), "-Inf");
        assert_eq!(check("min", "Int").unwrap().identity_literal(), "typemax(Int)");
        assert_eq!(check("min", "float").unwrap().identity_literal(), "Inf");
        assert_eq!(check("&", "Int").unwrap().identity_literal(), "-1");
    }

    #[test]
    fn test_bitwise_ops_reject_float() {
        let err = check("|", "Float64").unwrap_err();
        assert_eq!(
            err.to_string(),
            "type 'Float64' not supported for '|' (supported: Int)"
        );
    }

    #[test]
    fn test_unknown_type_names_supported_set() {
        let err = check("max", "String").unwrap_err();
        assert_eq!(
            err.to_string(),
            "type 'String' not supported for 'max' (supported: Float64, Int)"
        );
    }

    #[test]
    fn test_absent_op_is_non_associative() {
        assert!(!is_associative("-", "Int"));
        assert!(!is_associative("any", "Int"));
        assert_eq!(
            check("any", "Int").unwrap_err(),
            Denial::NonAssociative("any".into())
        );
    }

    #[test]
    fn test_julia_combine_parenthesizes_compound_values() {
        assert_eq!(AssocOp::Sum.julia_combine("acc", "x"), "acc + x");
        assert_eq!(AssocOp::Prod.julia_combine("acc", "x + 1"), "acc * (x + 1)");
        assert_eq!(AssocOp::Max.julia_combine("acc", "x + 1"), "max(acc, x + 1)");
    }

    #[test]
    fn test_identity_is_neutral_for_int_combine() {
        for op in ALL_OPS {
            let id = op.identity().as_i64();
            for v in [-7i64, 0, 1, 42] {
                assert_eq!(op.combine_int(id, v), v, "op {}", op.name());
            }
        }
    }
}
