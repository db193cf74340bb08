//! Translation of source expression text into target syntax.
//!
//! Text is parsed into an [`Expr`] and printed structurally. When the text
//! falls outside the expression subset it is passed through with a
//! whole-word rewrite of the boolean keywords and constants.

use crate::compiler::expr::*;
use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Rust,
    Ts,
    Go,
    CSharp,
    Sqlite,
    Postgres,
    Julia,
    /// Julia with dotted (element-wise) operators.
    JuliaBroadcast,
}

impl Dialect {
    fn is_sql(self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Postgres)
    }

    fn is_julia(self) -> bool {
        matches!(self, Dialect::Julia | Dialect::JuliaBroadcast)
    }

    fn dotted(self) -> bool {
        self == Dialect::JuliaBroadcast
    }
}

static PY_KEYWORD: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(and|or|not|True|False|None)\b").ok());

static PY_POW: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\*\*").ok());

pub struct ExprPrinter {
    dialect: Dialect,
    int_type: String,
    imports: BTreeSet<&'static str>,
    /// Names bound only to non-negative integers.
    non_negative: BTreeSet<String>,
}

impl ExprPrinter {
    pub fn new(dialect: Dialect) -> Self {
        let int_type = match dialect {
            Dialect::Rust => "i32",
            Dialect::Ts => "number",
            Dialect::Go | Dialect::CSharp => "int",
            Dialect::Sqlite | Dialect::Postgres => "INTEGER",
            Dialect::Julia | Dialect::JuliaBroadcast => "Int",
        };
        Self {
            dialect,
            int_type: int_type.to_string(),
            imports: BTreeSet::new(),
            non_negative: BTreeSet::new(),
        }
    }

    /// Integer type used for literal suffixes and conversions.
    pub fn with_int_type(mut self, ty: &str) -> Self {
        self.int_type = ty.to_string();
        self
    }

    /// Names known never to be negative. Floor division and modulo over
    /// them print as the target's truncating operators.
    pub fn with_non_negative(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.non_negative.extend(names);
        self
    }

    /// Packages the printed expressions depend on (Go only).
    pub fn imports(&self) -> &BTreeSet<&'static str> {
        &self.imports
    }

    pub fn translate(&mut self, text: &str) -> String {
        match parse_expr_text(text) {
            Ok(expr) => self.print(&expr),
            Err(err) => {
                debug!("expression '{}' kept as text: {}", text, err.message);
                self.rewrite_keywords(text)
            }
        }
    }

    pub fn print(&mut self, e: &Expr) -> String {
        match e {
            Expr::Const(lit) => self.literal(lit),
            Expr::Name(n) => n.clone(),
            Expr::Unary(op, operand) => self.unary(*op, operand),
            Expr::Binary(l, op, r) => self.binary(l, *op, r),
            Expr::BoolOp(op, l, r) => self.bool_op(*op, l, r),
            Expr::Compare(l, op, r) => self.compare(l, *op, r),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => self.ternary(cond, then, otherwise),
            Expr::Call(f, args) => self.call(f, args),
            Expr::Attribute(obj, field) => format!("{}.{}", self.child(obj, PREC_ATOM), field),
            Expr::Subscript(obj, index) => self.subscript(obj, index),
            Expr::Tuple(items) => self.tuple(items),
            Expr::List(items) => self.list(items),
        }
    }

    /// Print a child, parenthesized when its precedence is below `min`.
    /// Bitwise operators bind differently across targets, so a bitwise
    /// child is always parenthesized.
    fn child(&mut self, e: &Expr, min: u8) -> String {
        let s = self.print(e);
        let bitwise = matches!(e, Expr::Binary(_, op, _) if op.is_bitwise());
        let dotted_bool = self.dialect.dotted() && matches!(e, Expr::BoolOp(..));
        if e.precedence() < min || bitwise || dotted_bool {
            format!("({})", s)
        } else {
            s
        }
    }

    fn join(&mut self, items: &[Expr]) -> String {
        items
            .iter()
            .map(|i| self.print(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ── Literals ─────────────────────────────────────────────

    fn literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Int(n) => n.to_string(),
            Literal::Float(f) => format_float(*f),
            Literal::Bool(b) => {
                match (self.dialect.is_sql(), b) {
                    (true, true) => "TRUE".to_string(),
                    (true, false) => "FALSE".to_string(),
                    (false, _) => b.to_string(),
                }
            }
            Literal::Str(s) => self.string(s),
            Literal::None => match self.dialect {
                Dialect::Rust => "None",
                Dialect::Ts | Dialect::CSharp => "null",
                Dialect::Go => "nil",
                Dialect::Sqlite | Dialect::Postgres => "NULL",
                Dialect::Julia | Dialect::JuliaBroadcast => "nothing",
            }
            .to_string(),
        }
    }

    fn string(&self, s: &str) -> String {
        if self.dialect.is_sql() {
            return format!("'{}'", s.replace('\'', "''"));
        }
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '$' if self.dialect.is_julia() => out.push_str("\\$"),
                c => out.push(c),
            }
        }
        out.push('"');
        out
    }

    // ── Operators ────────────────────────────────────────────

    fn unary(&mut self, op: UnaryOp, operand: &Expr) -> String {
        if op == UnaryOp::Pos {
            return self.print(operand);
        }
        let inner = self.child(operand, PREC_ATOM);
        let prefix = match (op, self.dialect) {
            (UnaryOp::Neg, Dialect::JuliaBroadcast) => ".-",
            (UnaryOp::Neg, _) => "-",
            (UnaryOp::Not, Dialect::Sqlite | Dialect::Postgres) => "NOT ",
            (UnaryOp::Not, Dialect::JuliaBroadcast) => ".!",
            (UnaryOp::Not, _) => "!",
            (UnaryOp::Invert, Dialect::Rust) => "!",
            (UnaryOp::Invert, Dialect::Go) => "^",
            (UnaryOp::Invert, Dialect::JuliaBroadcast) => ".~",
            (UnaryOp::Invert, _) => "~",
            (UnaryOp::Pos, _) => "",
        };
        format!("{}{}", prefix, inner)
    }

    fn binary(&mut self, l: &Expr, op: BinOp, r: &Expr) -> String {
        if op == BinOp::Pow {
            return self.power(l, r);
        }
        if matches!(op, BinOp::FloorDiv | BinOp::Mod)
            && !(self.is_non_negative(l) && self.is_non_negative(r))
        {
            return self.floored(l, op, r);
        }

        let prec = binop_precedence(op);
        match (op, self.dialect) {
            (BinOp::FloorDiv, Dialect::Ts) => {
                let lhs = self.child(l, PREC_MUL);
                let rhs = self.child(r, PREC_MUL + 1);
                return format!("Math.floor({} / {})", lhs, rhs);
            }
            (BinOp::BitXor, Dialect::Julia) => {
                let (lhs, rhs) = (self.print(l), self.print(r));
                return format!("xor({}, {})", lhs, rhs);
            }
            (BinOp::BitXor, Dialect::JuliaBroadcast) => {
                let (lhs, rhs) = (self.print(l), self.print(r));
                return format!("xor.({}, {})", lhs, rhs);
            }
            (BinOp::BitXor, Dialect::Sqlite) => {
                let lhs = self.child(l, PREC_ATOM);
                let rhs = self.child(r, PREC_ATOM);
                return format!("(({0} | {1}) - ({0} & {1}))", lhs, rhs);
            }
            _ => {}
        }

        let symbol = match (op, self.dialect) {
            (BinOp::FloorDiv, Dialect::Julia) => "÷",
            (BinOp::FloorDiv, Dialect::JuliaBroadcast) => ".÷",
            (BinOp::FloorDiv, _) => "/",
            (BinOp::BitXor, Dialect::Postgres) => "#",
            (op, Dialect::JuliaBroadcast) => match op {
                BinOp::Add => ".+",
                BinOp::Sub => ".-",
                BinOp::Mul => ".*",
                BinOp::Div => "./",
                BinOp::Mod => ".%",
                BinOp::BitAnd => ".&",
                BinOp::BitOr => ".|",
                BinOp::Shl => ".<<",
                BinOp::Shr => ".>>",
                other => other.symbol(),
            },
            (op, _) => op.symbol(),
        };

        let lhs = self.child(l, prec);
        let rhs = self.child(r, prec + 1);
        format!("{} {} {}", lhs, symbol, rhs)
    }

    /// Python `//` and `%` round toward negative infinity, where the
    /// C-family and SQL operators truncate toward zero.
    fn floored(&mut self, l: &Expr, op: BinOp, r: &Expr) -> String {
        let div = op == BinOp::FloorDiv;
        match self.dialect {
            Dialect::Julia | Dialect::JuliaBroadcast => {
                let (lhs, rhs) = (self.print(l), self.print(r));
                let func = if div { "fld" } else { "mod" };
                let dot = if self.dialect.dotted() { "." } else { "" };
                format!("{}{}({}, {})", func, dot, lhs, rhs)
            }
            Dialect::Rust if is_positive_int(r) => {
                let receiver = self.receiver(l);
                let method = if div { "div_euclid" } else { "rem_euclid" };
                format!("{}.{}({})", receiver, method, self.print(r))
            }
            Dialect::Ts if div => {
                let lhs = self.child(l, PREC_MUL);
                let rhs = self.child(r, PREC_MUL + 1);
                format!("Math.floor({} / {})", lhs, rhs)
            }
            _ => {
                let lhs = self.child(l, PREC_MUL);
                let rhs = self.child(r, PREC_MUL + 1);
                let modulo = format!("({0} % {1} + {1}) % {1}", lhs, rhs);
                if div {
                    format!("(({} - {}) / {})", lhs, modulo, rhs)
                } else {
                    format!("({})", modulo)
                }
            }
        }
    }

    fn is_non_negative(&self, e: &Expr) -> bool {
        match e {
            Expr::Const(Literal::Int(n)) => *n >= 0,
            Expr::Name(n) => self.non_negative.contains(n),
            Expr::Binary(_, BinOp::Mod, r) if is_positive_int(r) => true,
            Expr::Binary(l, BinOp::Add | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow, r) => {
                self.is_non_negative(l) && self.is_non_negative(r)
            }
            _ => false,
        }
    }

    /// Method-call receiver; integer literals carry the type suffix.
    fn receiver(&mut self, e: &Expr) -> String {
        match e {
            Expr::Const(Literal::Int(n)) if *n >= 0 => format!("{}{}", n, self.int_type),
            Expr::Const(Literal::Int(n)) => format!("({}{})", n, self.int_type),
            other => self.child(other, PREC_ATOM),
        }
    }

    fn power(&mut self, base: &Expr, exp: &Expr) -> String {
        match self.dialect {
            Dialect::Rust => {
                let receiver = self.receiver(base);
                match exp {
                    Expr::Const(Literal::Int(n)) if *n >= 0 => format!("{}.pow({})", receiver, n),
                    Expr::Const(Literal::Float(_)) => {
                        format!("({} as f64).powf({})", receiver, self.print(exp))
                    }
                    other => format!("{}.pow({} as u32)", receiver, self.child(other, PREC_ATOM)),
                }
            }
            Dialect::Ts => {
                let lhs = self.child(base, PREC_ATOM);
                let rhs = self.child(exp, PREC_UNARY);
                format!("{} ** {}", lhs, rhs)
            }
            Dialect::Go => {
                self.imports.insert("math");
                let (lhs, rhs) = (self.print(base), self.print(exp));
                format!(
                    "{}(math.Pow(float64({}), float64({})))",
                    self.int_type, lhs, rhs
                )
            }
            Dialect::CSharp => {
                let (lhs, rhs) = (self.print(base), self.print(exp));
                format!("({})Math.Pow({}, {})", self.int_type, lhs, rhs)
            }
            Dialect::Sqlite | Dialect::Postgres => {
                let (lhs, rhs) = (self.print(base), self.print(exp));
                format!("POWER({}, {})", lhs, rhs)
            }
            Dialect::Julia | Dialect::JuliaBroadcast => {
                let lhs = self.child(base, PREC_ATOM);
                let rhs = self.child(exp, PREC_UNARY);
                let op = if self.dialect.dotted() { ".^" } else { "^" };
                format!("{} {} {}", lhs, op, rhs)
            }
        }
    }

    fn bool_op(&mut self, op: BoolOp, l: &Expr, r: &Expr) -> String {
        let prec = match op {
            BoolOp::And => PREC_AND,
            BoolOp::Or => PREC_OR,
        };
        let symbol = match (op, self.dialect) {
            (BoolOp::And, Dialect::Sqlite | Dialect::Postgres) => "AND",
            (BoolOp::Or, Dialect::Sqlite | Dialect::Postgres) => "OR",
            (BoolOp::And, Dialect::JuliaBroadcast) => ".&",
            (BoolOp::Or, Dialect::JuliaBroadcast) => ".|",
            (BoolOp::And, _) => "&&",
            (BoolOp::Or, _) => "||",
        };
        let min = if self.dialect.dotted() { PREC_ATOM } else { prec };
        let lhs = self.child(l, min);
        let rhs = self.child(r, if self.dialect.dotted() { PREC_ATOM } else { prec + 1 });
        format!("{} {} {}", lhs, symbol, rhs)
    }

    fn compare(&mut self, l: &Expr, op: CmpOp, r: &Expr) -> String {
        if matches!(op, CmpOp::In | CmpOp::NotIn) {
            return self.membership(l, op == CmpOp::NotIn, r);
        }

        let lhs = self.child(l, PREC_COMPARE + 1);
        let rhs = self.child(r, PREC_COMPARE + 1);

        let symbol = match (op, self.dialect) {
            (CmpOp::Is, Dialect::Sqlite | Dialect::Postgres) => "IS",
            (CmpOp::IsNot, Dialect::Sqlite | Dialect::Postgres) => "IS NOT",
            (CmpOp::Eq, Dialect::Sqlite | Dialect::Postgres) => "=",
            (CmpOp::NotEq, Dialect::Sqlite | Dialect::Postgres) => "<>",
            (CmpOp::Eq | CmpOp::Is, Dialect::Ts) => "===",
            (CmpOp::NotEq | CmpOp::IsNot, Dialect::Ts) => "!==",
            (CmpOp::Eq | CmpOp::Is, Dialect::JuliaBroadcast) => ".==",
            (CmpOp::NotEq | CmpOp::IsNot, Dialect::JuliaBroadcast) => ".!=",
            (CmpOp::Lt, Dialect::JuliaBroadcast) => ".<",
            (CmpOp::Gt, Dialect::JuliaBroadcast) => ".>",
            (CmpOp::LtEq, Dialect::JuliaBroadcast) => ".<=",
            (CmpOp::GtEq, Dialect::JuliaBroadcast) => ".>=",
            (op, _) => op.symbol(),
        };
        format!("{} {} {}", lhs, symbol, rhs)
    }

    fn membership(&mut self, item: &Expr, negate: bool, container: &Expr) -> String {
        let seq = match container {
            Expr::Tuple(items) | Expr::List(items) => Some(items.as_slice()),
            _ => None,
        };

        let test = match self.dialect {
            Dialect::Rust => {
                let hay = match seq {
                    Some(items) => format!("[{}]", self.join(items)),
                    None => self.child(container, PREC_ATOM),
                };
                let needle = self.print(item);
                format!("{}.contains(&{})", hay, needle)
            }
            Dialect::Ts => {
                let hay = match seq {
                    Some(items) => format!("[{}]", self.join(items)),
                    None => self.child(container, PREC_ATOM),
                };
                format!("{}.includes({})", hay, self.print(item))
            }
            Dialect::Go => {
                self.imports.insert("slices");
                let hay = match seq {
                    Some(items) => {
                        let joined = self.join(items);
                        format!("[]{}{{{}}}", self.int_type, joined)
                    }
                    None => self.print(container),
                };
                format!("slices.Contains({}, {})", hay, self.print(item))
            }
            Dialect::CSharp => {
                let hay = match seq {
                    Some(items) => format!("new[] {{ {} }}", self.join(items)),
                    None => self.child(container, PREC_ATOM),
                };
                format!("{}.Contains({})", hay, self.print(item))
            }
            Dialect::Sqlite | Dialect::Postgres => {
                let hay = match seq {
                    Some(items) => format!("({})", self.join(items)),
                    None => self.print(container),
                };
                let op = if negate { "NOT IN" } else { "IN" };
                return format!("{} {} {}", self.child(item, PREC_COMPARE + 1), op, hay);
            }
            Dialect::Julia => {
                let needle = self.child(item, PREC_COMPARE + 1);
                let hay = self.child(container, PREC_COMPARE + 1);
                format!("{} in {}", needle, hay)
            }
            Dialect::JuliaBroadcast => {
                let (needle, hay) = (self.print(item), self.print(container));
                format!("in.({}, Ref({}))", needle, hay)
            }
        };

        if !negate {
            return test;
        }
        match self.dialect {
            Dialect::Julia => format!("!({})", test),
            Dialect::JuliaBroadcast => format!(".!{}", test),
            _ => format!("!{}", test),
        }
    }

    fn ternary(&mut self, cond: &Expr, then: &Expr, otherwise: &Expr) -> String {
        match self.dialect {
            Dialect::Rust => {
                let (c, a, b) = (self.print(cond), self.print(then), self.print(otherwise));
                format!("if {} {{ {} }} else {{ {} }}", c, a, b)
            }
            Dialect::Go => {
                let (c, a, b) = (self.print(cond), self.print(then), self.print(otherwise));
                format!(
                    "func() {} {{ if {} {{ return {} }}; return {} }}()",
                    self.int_type, c, a, b
                )
            }
            Dialect::Sqlite | Dialect::Postgres => {
                let (c, a, b) = (self.print(cond), self.print(then), self.print(otherwise));
                format!("CASE WHEN {} THEN {} ELSE {} END", c, a, b)
            }
            Dialect::JuliaBroadcast => {
                let (c, a, b) = (self.print(cond), self.print(then), self.print(otherwise));
                format!("ifelse.({}, {}, {})", c, a, b)
            }
            Dialect::Ts | Dialect::CSharp | Dialect::Julia => {
                let c = self.child(cond, PREC_TERNARY + 1);
                let a = self.child(then, PREC_TERNARY + 1);
                let b = self.child(otherwise, PREC_TERNARY);
                format!("{} ? {} : {}", c, a, b)
            }
        }
    }

    // ── Calls and access ─────────────────────────────────────

    fn call(&mut self, f: &Expr, args: &[Expr]) -> String {
        if let Expr::Name(name) = f {
            if let Some(s) = self.builtin(name, args) {
                return s;
            }
        }
        let callee = self.child(f, PREC_ATOM);
        let joined = self.join(args);
        if self.dialect.dotted() {
            format!("{}.({})", callee, joined)
        } else {
            format!("{}({})", callee, joined)
        }
    }

    /// Target spelling of the Python builtins `abs`, `min`, `max`, `len`.
    fn builtin(&mut self, name: &str, args: &[Expr]) -> Option<String> {
        let dotted = if self.dialect.dotted() { "." } else { "" };
        match (name, args) {
            ("abs", [x]) => Some(match self.dialect {
                Dialect::Rust => format!("{}.abs()", self.child(x, PREC_ATOM)),
                Dialect::Ts => format!("Math.abs({})", self.print(x)),
                Dialect::Go => {
                    self.imports.insert("math");
                    let arg = self.print(x);
                    format!("{}(math.Abs(float64({})))", self.int_type, arg)
                }
                Dialect::CSharp => format!("Math.Abs({})", self.print(x)),
                Dialect::Sqlite | Dialect::Postgres => format!("ABS({})", self.print(x)),
                Dialect::Julia | Dialect::JuliaBroadcast => {
                    format!("abs{}({})", dotted, self.print(x))
                }
            }),
            ("min" | "max", [first, rest @ ..]) if !rest.is_empty() => {
                Some(self.extremum(name, first, rest))
            }
            ("len", [x]) => Some(match self.dialect {
                Dialect::Rust => format!("{}.len()", self.child(x, PREC_ATOM)),
                Dialect::Ts => format!("{}.length", self.child(x, PREC_ATOM)),
                Dialect::Go => format!("len({})", self.print(x)),
                Dialect::CSharp => format!("{}.Count()", self.child(x, PREC_ATOM)),
                Dialect::Sqlite | Dialect::Postgres => format!("LENGTH({})", self.print(x)),
                Dialect::Julia | Dialect::JuliaBroadcast => {
                    format!("length{}({})", dotted, self.print(x))
                }
            }),
            _ => None,
        }
    }

    fn extremum(&mut self, name: &str, first: &Expr, rest: &[Expr]) -> String {
        let upper = name.to_uppercase();
        match self.dialect {
            Dialect::Rust => {
                let mut out = self.child(first, PREC_ATOM);
                for arg in rest {
                    out = format!("{}.{}({})", out, name, self.print(arg));
                }
                out
            }
            Dialect::CSharp => {
                let method = if name == "min" { "Math.Min" } else { "Math.Max" };
                let mut out = self.print(first);
                for arg in rest {
                    out = format!("{}({}, {})", method, out, self.print(arg));
                }
                out
            }
            Dialect::Ts => {
                let all = self.join_with(first, rest);
                format!("Math.{}({})", name, all)
            }
            Dialect::Go | Dialect::Julia => {
                let all = self.join_with(first, rest);
                format!("{}({})", name, all)
            }
            Dialect::JuliaBroadcast => {
                let all = self.join_with(first, rest);
                format!("{}.({})", name, all)
            }
            Dialect::Sqlite => {
                let all = self.join_with(first, rest);
                format!("{}({})", upper, all)
            }
            Dialect::Postgres => {
                let all = self.join_with(first, rest);
                let func = if name == "min" { "LEAST" } else { "GREATEST" };
                format!("{}({})", func, all)
            }
        }
    }

    fn join_with(&mut self, first: &Expr, rest: &[Expr]) -> String {
        let mut parts = vec![self.print(first)];
        for arg in rest {
            parts.push(self.print(arg));
        }
        parts.join(", ")
    }

    fn subscript(&mut self, obj: &Expr, index: &Expr) -> String {
        let target = self.child(obj, PREC_ATOM);
        match self.dialect {
            Dialect::Julia | Dialect::JuliaBroadcast => {
                let idx = match index {
                    Expr::Const(Literal::Int(n)) if *n >= 0 => (n + 1).to_string(),
                    other => format!("{} + 1", self.child(other, PREC_ADD)),
                };
                format!("{}[{}]", target, idx)
            }
            Dialect::Rust => match index {
                Expr::Const(Literal::Int(n)) if *n >= 0 => format!("{}[{}]", target, n),
                other => format!("{}[{} as usize]", target, self.child(other, PREC_ATOM)),
            },
            _ => format!("{}[{}]", target, self.print(index)),
        }
    }

    fn tuple(&mut self, items: &[Expr]) -> String {
        let joined = self.join(items);
        match self.dialect {
            Dialect::Ts => format!("[{}]", joined),
            Dialect::Go => format!("[{}]{}{{{}}}", items.len(), self.int_type, joined),
            Dialect::Rust | Dialect::Julia | Dialect::JuliaBroadcast if items.len() == 1 => {
                format!("({},)", joined)
            }
            _ => format!("({})", joined),
        }
    }

    fn list(&mut self, items: &[Expr]) -> String {
        let joined = self.join(items);
        match self.dialect {
            Dialect::Rust => format!("vec![{}]", joined),
            Dialect::Go => format!("[]{}{{{}}}", self.int_type, joined),
            Dialect::CSharp => format!("new[] {{ {} }}", joined),
            Dialect::Sqlite | Dialect::Postgres => format!("({})", joined),
            Dialect::Ts | Dialect::Julia | Dialect::JuliaBroadcast => format!("[{}]", joined),
        }
    }

    // ── Fallback ─────────────────────────────────────────────

    /// Whole-word rewrite of Python keywords for text the parser rejected.
    fn rewrite_keywords(&self, text: &str) -> String {
        let dialect = self.dialect;
        let none = self.literal(&Literal::None);
        let rewritten = match PY_KEYWORD.as_ref() {
            Some(re) => re
                .replace_all(text, |caps: &Captures| {
                    let word = &caps[1];
                    match (word, dialect.is_sql()) {
                        ("and", true) => "AND".to_string(),
                        ("or", true) => "OR".to_string(),
                        ("not", true) => "NOT".to_string(),
                        ("True", true) => "TRUE".to_string(),
                        ("False", true) => "FALSE".to_string(),
                        ("and", false) => "&&".to_string(),
                        ("or", false) => "||".to_string(),
                        ("not", false) => "!".to_string(),
                        ("True", false) => "true".to_string(),
                        ("False", false) => "false".to_string(),
                        _ => none.clone(),
                    }
                })
                .into_owned(),
            None => text.to_string(),
        };
        match (dialect.is_julia(), PY_POW.as_ref()) {
            (true, Some(re)) => re.replace_all(&rewritten, "^").into_owned(),
            _ => rewritten,
        }
    }
}

fn is_positive_int(e: &Expr) -> bool {
    matches!(e, Expr::Const(Literal::Int(n)) if *n > 0)
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn tr(dialect: Dialect, text: &str) -> String {
        ExprPrinter::new(dialect).translate(text)
    }

    /// Translate with `x` bound to a non-negative range.
    fn tr_counter(dialect: Dialect, text: &str) -> String {
        ExprPrinter::new(dialect)
            .with_non_negative(["x".to_string()])
            .translate(text)
    }

    #[test]
    fn test_power_per_target() {
        assert_eq!(tr(Dialect::Rust, "x**2"), "x.pow(2)");
        assert_eq!(tr(Dialect::Rust, "(x + 1)**y"), "(x + 1).pow(y as u32)");
        assert_eq!(tr(Dialect::Rust, "2**x"), "2i32.pow(x as u32)");
        assert_eq!(tr(Dialect::Ts, "x**2"), "x ** 2");
        assert_eq!(tr(Dialect::Ts, "(-x)**2"), "(-x) ** 2");
        assert_eq!(tr(Dialect::Go, "x**2"), "int(math.Pow(float64(x), float64(2)))");
        assert_eq!(tr(Dialect::CSharp, "x**2"), "(int)Math.Pow(x, 2)");
        assert_eq!(tr(Dialect::Sqlite, "x**2"), "POWER(x, 2)");
        assert_eq!(tr(Dialect::Julia, "x**2"), "x ^ 2");
        assert_eq!(tr(Dialect::JuliaBroadcast, "x**2"), "x .^ 2");
    }

    #[test]
    fn test_go_records_math_import() {
        let mut p = ExprPrinter::new(Dialect::Go);
        p.translate("abs(x) + x**2");
        assert!(p.imports().contains("math"));
    }

    #[test]
    fn test_comparisons_and_booleans() {
        assert_eq!(tr_counter(Dialect::Ts, "x % 3 == 0 and not y"), "x % 3 === 0 && !y");
        assert_eq!(
            tr_counter(Dialect::Sqlite, "x % 3 == 0 or y != 1"),
            "x % 3 = 0 OR y <> 1"
        );
        assert_eq!(tr(Dialect::Sqlite, "y is None"), "y IS NULL");
        assert_eq!(tr(Dialect::Postgres, "y is not None"), "y IS NOT NULL");
        assert_eq!(tr(Dialect::Rust, "not (a or b)"), "!(a || b)");
        assert_eq!(tr(Dialect::Go, "0 < x < 10"), "0 < x && x < 10");
    }

    #[test]
    fn test_bitwise_children_parenthesized() {
        assert_eq!(tr(Dialect::Rust, "x & 1 == 0"), "(x & 1) == 0");
        assert_eq!(tr(Dialect::Go, "x | y << 2"), "x | (y << 2)");
        assert_eq!(tr(Dialect::Julia, "x ^ y"), "xor(x, y)");
    }

    #[test]
    fn test_precedence_preserved() {
        assert_eq!(tr(Dialect::Ts, "(a + b) * c"), "(a + b) * c");
        assert_eq!(tr(Dialect::Ts, "a - (b - c)"), "a - (b - c)");
        assert_eq!(tr(Dialect::Ts, "a - b - c"), "a - b - c");
        assert_eq!(tr(Dialect::Rust, "-(-x)"), "-(-x)");
    }

    #[test]
    fn test_ternary_per_target() {
        let src = "x if x > 0 else -x";
        assert_eq!(tr(Dialect::Rust, src), "if x > 0 { x } else { -x }");
        assert_eq!(tr(Dialect::Ts, src), "x > 0 ? x : -x");
        assert_eq!(tr(Dialect::Sqlite, src), "CASE WHEN x > 0 THEN x ELSE -x END");
        assert_eq!(tr(Dialect::JuliaBroadcast, src), "ifelse.(x .> 0, x, .-x)");
        assert_eq!(
            tr(Dialect::Go, src),
            "func() int { if x > 0 { return x }; return -x }()"
        );
    }

    #[test]
    fn test_broadcast_operators() {
        assert_eq!(tr(Dialect::JuliaBroadcast, "x * x + 1"), "x .* x .+ 1");
        assert_eq!(
            tr_counter(Dialect::JuliaBroadcast, "x % 3 == 0 and x > 2"),
            "(x .% 3 .== 0) .& (x .> 2)"
        );
        assert_eq!(tr(Dialect::JuliaBroadcast, "f(x)"), "f.(x)");
    }

    #[test]
    fn test_floor_division_and_modulo_round_down() {
        let src = "x // 2 + x % 3";
        assert_eq!(tr(Dialect::Julia, src), "fld(x, 2) + mod(x, 3)");
        assert_eq!(tr(Dialect::JuliaBroadcast, src), "fld.(x, 2) .+ mod.(x, 3)");
        assert_eq!(tr(Dialect::Rust, src), "x.div_euclid(2) + x.rem_euclid(3)");
        assert_eq!(tr(Dialect::Ts, src), "Math.floor(x / 2) + ((x % 3 + 3) % 3)");
        assert_eq!(
            tr(Dialect::Go, src),
            "((x - (x % 2 + 2) % 2) / 2) + ((x % 3 + 3) % 3)"
        );
        assert_eq!(tr(Dialect::CSharp, "a % b"), "((a % b + b) % b)");
        assert_eq!(tr(Dialect::Rust, "a // b"), "((a - (a % b + b) % b) / b)");
        assert_eq!(tr(Dialect::Rust, "-7 // 2"), "(-7i32).div_euclid(2)");

        assert_eq!(tr_counter(Dialect::Julia, src), "x ÷ 2 + x % 3");
        assert_eq!(tr_counter(Dialect::Go, src), "x / 2 + x % 3");
        assert_eq!(tr_counter(Dialect::Rust, "(x % 5) // 2"), "x % 5 / 2");
        assert_eq!(tr(Dialect::Rust, "y % 5 // 2"), "y.rem_euclid(5) / 2");
    }

    #[test]
    fn test_membership() {
        assert_eq!(tr(Dialect::Rust, "x in (1, 2)"), "[1, 2].contains(&x)");
        assert_eq!(tr(Dialect::Ts, "x not in ys"), "!ys.includes(x)");
        assert_eq!(tr(Dialect::Sqlite, "x in (1, 2)"), "x IN (1, 2)");
        assert_eq!(tr(Dialect::Julia, "x not in ys"), "!(x in ys)");
    }

    #[test]
    fn test_literals() {
        assert_eq!(tr(Dialect::Sqlite, "\"it's\""), "'it''s'");
        assert_eq!(tr(Dialect::Julia, "'$x'"), "\"\\$x\"");
        assert_eq!(tr(Dialect::Go, "None"), "nil");
        assert_eq!(tr(Dialect::Rust, "2.0"), "2.0");
        assert_eq!(tr(Dialect::Sqlite, "True"), "TRUE");
    }

    #[test]
    fn test_tuples() {
        assert_eq!(tr(Dialect::Rust, "(i, j)"), "(i, j)");
        assert_eq!(tr(Dialect::Ts, "(i, j)"), "[i, j]");
        assert_eq!(tr(Dialect::Go, "(i, j)"), "[2]int{i, j}");
    }

    #[test]
    fn test_builtins() {
        assert_eq!(tr(Dialect::Rust, "max(x, 3)"), "x.max(3)");
        assert_eq!(tr(Dialect::CSharp, "min(a, b, c)"), "Math.Min(Math.Min(a, b), c)");
        assert_eq!(tr(Dialect::Postgres, "max(a, b)"), "GREATEST(a, b)");
        assert_eq!(tr(Dialect::Ts, "len(s)"), "s.length");
    }

    #[test]
    fn test_julia_subscript_is_one_based() {
        assert_eq!(tr(Dialect::Julia, "xs[0]"), "xs[1]");
        assert_eq!(tr(Dialect::Julia, "xs[i]"), "xs[i + 1]");
    }

    #[test]
    fn test_fallback_rewrites_whole_words_only() {
        assert_eq!(
            tr(Dialect::Ts, "[y for y in band if y and True]"),
            "[y for y in band if y && true]"
        );
        assert_eq!(tr(Dialect::Julia, "xs[1:2] ** 2"), "xs[1:2] ^ 2");
        assert_eq!(tr(Dialect::Sqlite, "lambda: None"), "lambda: NULL");
    }
}
