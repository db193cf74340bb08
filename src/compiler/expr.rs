//! Secondary expression IR.
//!
//! The comprehension IR keeps element, key, value and filter expressions as
//! source text. Back-ends parse that text into an [`Expr`] tree once and print
//! it with target syntax; text outside this subset falls back to a keyword
//! rewrite of the raw string.

use crate::compiler::lexer::Lexer;
use crate::compiler::parser::ParseError;
use crate::compiler::token::{Token, TokenKind};
use crate::compiler::span::Span;

// ═══════════════════════════════════════════════════════════════
//  Tree
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Literal),
    Name(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    BoolOp(BoolOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call(Box<Expr>, Vec<Expr>),
    Attribute(Box<Expr>, String),
    Subscript(Box<Expr>, Box<Expr>),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    In,
    NotIn,
    Is,
    IsNot,
}

impl BinOp {
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr
        )
    }

    /// Python spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq | CmpOp::Is => "==",
            CmpOp::NotEq | CmpOp::IsNot => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::LtEq => "<=",
            CmpOp::GtEq => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

// ── Precedence (Python's, lowest first) ──────────────────────

pub const PREC_TERNARY: u8 = 1;
pub const PREC_OR: u8 = 2;
pub const PREC_AND: u8 = 3;
pub const PREC_NOT: u8 = 4;
pub const PREC_COMPARE: u8 = 5;
pub const PREC_BITOR: u8 = 6;
pub const PREC_BITXOR: u8 = 7;
pub const PREC_BITAND: u8 = 8;
pub const PREC_SHIFT: u8 = 9;
pub const PREC_ADD: u8 = 10;
pub const PREC_MUL: u8 = 11;
pub const PREC_UNARY: u8 = 12;
pub const PREC_POW: u8 = 13;
pub const PREC_ATOM: u8 = 14;

pub fn binop_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::BitOr => PREC_BITOR,
        BinOp::BitXor => PREC_BITXOR,
        BinOp::BitAnd => PREC_BITAND,
        BinOp::Shl | BinOp::Shr => PREC_SHIFT,
        BinOp::Add | BinOp::Sub => PREC_ADD,
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => PREC_MUL,
        BinOp::Pow => PREC_POW,
    }
}

impl Expr {
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Ternary { .. } => PREC_TERNARY,
            Expr::BoolOp(BoolOp::Or, _, _) => PREC_OR,
            Expr::BoolOp(BoolOp::And, _, _) => PREC_AND,
            Expr::Unary(UnaryOp::Not, _) => PREC_NOT,
            Expr::Compare(..) => PREC_COMPARE,
            Expr::Binary(_, op, _) => binop_precedence(*op),
            Expr::Unary(..) => PREC_UNARY,
            // A negative literal prints with a leading minus
            Expr::Const(Literal::Int(n)) if *n < 0 => PREC_UNARY,
            Expr::Const(Literal::Float(f)) if *f < 0.0 => PREC_UNARY,
            _ => PREC_ATOM,
        }
    }

    /// Whether `name` occurs as a free identifier anywhere in the tree.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Expr::Name(n) => n == name,
            Expr::Const(_) => false,
            Expr::Unary(_, e) | Expr::Attribute(e, _) => e.mentions(name),
            Expr::Binary(l, _, r) | Expr::BoolOp(_, l, r) | Expr::Compare(l, _, r) => {
                l.mentions(name) || r.mentions(name)
            }
            Expr::Subscript(l, r) => l.mentions(name) || r.mentions(name),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => cond.mentions(name) || then.mentions(name) || otherwise.mentions(name),
            Expr::Call(f, args) => f.mentions(name) || args.iter().any(|a| a.mentions(name)),
            Expr::Tuple(items) | Expr::List(items) => items.iter().any(|e| e.mentions(name)),
        }
    }

    /// Whether the tree contains a conditional or short-circuit boolean.
    pub fn has_conditional(&self) -> bool {
        match self {
            Expr::Ternary { .. } | Expr::BoolOp(..) => true,
            Expr::Name(_) | Expr::Const(_) => false,
            Expr::Unary(_, e) | Expr::Attribute(e, _) => e.has_conditional(),
            Expr::Binary(l, _, r) | Expr::Compare(l, _, r) | Expr::Subscript(l, r) => {
                l.has_conditional() || r.has_conditional()
            }
            Expr::Call(f, args) => f.has_conditional() || args.iter().any(|a| a.has_conditional()),
            Expr::Tuple(items) | Expr::List(items) => items.iter().any(|e| e.has_conditional()),
        }
    }

    /// Fold an integer constant expression (`-3`, `2**10`, `100 // 7`).
    ///
    /// Floor division and modulo follow Python's rounding toward negative
    /// infinity. Overflow yields `None`.
    pub fn eval_int(&self) -> Option<i64> {
        match self {
            Expr::Const(Literal::Int(n)) => Some(*n),
            Expr::Unary(UnaryOp::Neg, e) => e.eval_int()?.checked_neg(),
            Expr::Unary(UnaryOp::Pos, e) => e.eval_int(),
            Expr::Unary(UnaryOp::Invert, e) => Some(!e.eval_int()?),
            Expr::Binary(l, op, r) => {
                let (a, b) = (l.eval_int()?, r.eval_int()?);
                match op {
                    BinOp::Add => a.checked_add(b),
                    BinOp::Sub => a.checked_sub(b),
                    BinOp::Mul => a.checked_mul(b),
                    BinOp::FloorDiv => floor_div(a, b),
                    BinOp::Mod => {
                        let q = floor_div(a, b)?;
                        a.checked_sub(q.checked_mul(b)?)
                    }
                    BinOp::Pow => {
                        let exp = u32::try_from(b).ok()?;
                        a.checked_pow(exp)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Parser
// ═══════════════════════════════════════════════════════════════

/// Parse a standalone expression string into an [`Expr`].
pub fn parse_expr_text(text: &str) -> Result<Expr, ParseError> {
    let mut lexer = Lexer::new(text);
    let tokens: Vec<Token> = lexer
        .tokenize()?
        .into_iter()
        .filter(|t| !matches!(t.kind, TokenKind::Newline))
        .collect();
    let mut parser = ExprParser::new(tokens);
    let expr = parser.parse_expr()?;
    if !parser.check(&TokenKind::EOF) {
        return Err(parser.error(&format!(
            "unexpected '{}' after expression",
            parser.peek_kind()
        )));
    }
    Ok(expr)
}

/// Pratt parser for the Python expression subset.
pub struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Lambda) {
            return Err(self.error("lambda expressions are unsupported"));
        }
        let body = self.parse_or()?;
        if self.check(&TokenKind::If) {
            self.advance();
            let cond = self.parse_or()?;
            self.expect(&TokenKind::Else)?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(body),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::BoolOp(BoolOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::BoolOp(BoolOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    /// `a < b <= c` desugars to `a < b and b <= c`.
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_expr_bp(0)?;
        let mut links = Vec::new();
        while let Some(op) = self.try_cmpop() {
            let rhs = self.parse_expr_bp(0)?;
            links.push((op, rhs));
        }

        let mut result: Option<Expr> = None;
        let mut lhs = first;
        for (op, rhs) in links {
            let cmp = Expr::Compare(Box::new(lhs), op, Box::new(rhs.clone()));
            result = Some(match result {
                Some(prev) => Expr::BoolOp(BoolOp::And, Box::new(prev), Box::new(cmp)),
                None => cmp,
            });
            lhs = rhs;
        }
        Ok(result.unwrap_or(lhs))
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;

        while let Some(op) = self.try_binop() {
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        // Fold `-5` into a literal so constants print naturally
        if let (UnaryOp::Neg, Expr::Const(Literal::Int(n))) = (op, &operand) {
            if let Some(neg) = n.checked_neg() {
                return Ok(Expr::Const(Literal::Int(neg)));
            }
        }
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    /// `**` binds tighter than a unary on its left, looser on its right.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.check(&TokenKind::StarStar) {
            self.advance();
            let exp = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&TokenKind::LParen) {
                self.advance();
                let args = self.parse_sequence(&TokenKind::RParen)?.0;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.check(&TokenKind::Dot) {
                self.advance();
                let field = self.expect_ident()?;
                expr = Expr::Attribute(Box::new(expr), field);
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expr()?;
                if self.check(&TokenKind::Colon) {
                    return Err(self.error("slices are unsupported"));
                }
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            TokenKind::IntLit(n) => {
                self.advance();
                Ok(Expr::Const(Literal::Int(n)))
            }
            TokenKind::FloatLit(n) => {
                self.advance();
                Ok(Expr::Const(Literal::Float(n)))
            }
            TokenKind::StringLit(s) => {
                self.advance();
                Ok(Expr::Const(Literal::Str(s)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Const(Literal::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Const(Literal::Bool(false)))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::Const(Literal::None))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            TokenKind::LParen => {
                self.advance();
                let (mut items, trailing_comma) = self.parse_sequence(&TokenKind::RParen)?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Expr::Tuple(items))
                }
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.parse_sequence(&TokenKind::RBracket)?.0;
                Ok(Expr::List(items))
            }
            other => Err(self.error(&format!("unexpected '{}' in expression", other))),
        }
    }

    /// Comma-separated expressions up to `close`. Returns the items and
    /// whether the list ended with a trailing comma.
    fn parse_sequence(&mut self, close: &TokenKind) -> Result<(Vec<Expr>, bool), ParseError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        while !self.check(close) {
            if let TokenKind::Ident(_) = self.peek_kind() {
                if self.peek_kind_at(self.pos + 1) == TokenKind::Eq {
                    return Err(self.error("keyword arguments are unsupported"));
                }
            }
            items.push(self.parse_expr()?);
            if self.check(&TokenKind::For) {
                return Err(self.error("nested comprehensions are not expressions"));
            }
            trailing_comma = false;
            if self.check(&TokenKind::Comma) {
                self.advance();
                trailing_comma = true;
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok((items, trailing_comma))
    }

    fn try_binop(&self) -> Option<BinOp> {
        match self.peek_kind() {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::SlashSlash => Some(BinOp::FloorDiv),
            TokenKind::Percent => Some(BinOp::Mod),
            TokenKind::Ampersand => Some(BinOp::BitAnd),
            TokenKind::Pipe => Some(BinOp::BitOr),
            TokenKind::Caret => Some(BinOp::BitXor),
            TokenKind::LShift => Some(BinOp::Shl),
            TokenKind::RShift => Some(BinOp::Shr),
            _ => None,
        }
    }

    /// Consumes the comparison operator (one or two tokens) if present.
    fn try_cmpop(&mut self) -> Option<CmpOp> {
        let op = match self.peek_kind() {
            TokenKind::EqEq => CmpOp::Eq,
            TokenKind::NotEq => CmpOp::NotEq,
            TokenKind::Lt => CmpOp::Lt,
            TokenKind::Gt => CmpOp::Gt,
            TokenKind::LtEq => CmpOp::LtEq,
            TokenKind::GtEq => CmpOp::GtEq,
            TokenKind::In => CmpOp::In,
            TokenKind::Not if self.peek_kind_at(self.pos + 1) == TokenKind::In => {
                self.advance();
                CmpOp::NotIn
            }
            TokenKind::Is if self.peek_kind_at(self.pos + 1) == TokenKind::Not => {
                self.advance();
                CmpOp::IsNot
            }
            TokenKind::Is => CmpOp::Is,
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    // ── Token utilities ──────────────────────────────────────

    fn peek_kind_at(&self, pos: usize) -> TokenKind {
        self.tokens
            .get(pos)
            .map(|t| t.kind.clone())
            .unwrap_or(TokenKind::EOF)
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek_kind_at(self.pos)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or(Span::synthetic())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(&format!(
                "expected '{}', found '{}'",
                kind,
                self.peek_kind()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek_kind() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!(
                "expected identifier, found '{}'",
                self.peek_kind()
            ))),
        }
    }

    fn error(&self, msg: &str) -> ParseError {
        ParseError {
            message: msg.to_string(),
            span: self.current_span(),
        }
    }
}

// ── Operator binding power (precedence) ──────────────────────

/// Returns (left_bp, right_bp). Higher = tighter binding.
/// Left < Right gives left-associativity.
fn infix_binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::BitOr => (7, 8),
        BinOp::BitXor => (9, 10),
        BinOp::BitAnd => (11, 12),
        BinOp::Shl | BinOp::Shr => (13, 14),
        BinOp::Add | BinOp::Sub => (15, 16),
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => (17, 18),
        // Handled by parse_power
        BinOp::Pow => (19, 19),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        parse_expr_text(input).unwrap()
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.to_string()))
    }

    fn int(n: i64) -> Box<Expr> {
        Box::new(Expr::Const(Literal::Int(n)))
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(
            parse("x + 2 * y"),
            Expr::Binary(
                name("x"),
                BinOp::Add,
                Box::new(Expr::Binary(int(2), BinOp::Mul, name("y")))
            )
        );
    }

    #[test]
    fn test_power_is_right_associative_and_beats_unary() {
        assert_eq!(
            parse("-x ** 2"),
            Expr::Unary(
                UnaryOp::Neg,
                Box::new(Expr::Binary(name("x"), BinOp::Pow, int(2)))
            )
        );
        assert_eq!(
            parse("2 ** 3 ** 2"),
            Expr::Binary(
                int(2),
                BinOp::Pow,
                Box::new(Expr::Binary(int(3), BinOp::Pow, int(2)))
            )
        );
    }

    #[test]
    fn test_chained_comparison_desugars() {
        assert_eq!(
            parse("0 < x <= 9"),
            Expr::BoolOp(
                BoolOp::And,
                Box::new(Expr::Compare(int(0), CmpOp::Lt, name("x"))),
                Box::new(Expr::Compare(name("x"), CmpOp::LtEq, int(9)))
            )
        );
    }

    #[test]
    fn test_not_in_and_is_not() {
        assert_eq!(
            parse("x not in ys"),
            Expr::Compare(name("x"), CmpOp::NotIn, name("ys"))
        );
        assert_eq!(
            parse("x is not None"),
            Expr::Compare(name("x"), CmpOp::IsNot, Box::new(Expr::Const(Literal::None)))
        );
    }

    #[test]
    fn test_ternary() {
        let e = parse("x if x > 0 else -x");
        assert!(matches!(e, Expr::Ternary { .. }));
        assert!(e.has_conditional());
    }

    #[test]
    fn test_tuple_and_parens() {
        assert_eq!(parse("(x)"), Expr::Name("x".into()));
        assert_eq!(parse("(x,)"), Expr::Tuple(vec![Expr::Name("x".into())]));
        assert_eq!(
            parse("(x, y)"),
            Expr::Tuple(vec![Expr::Name("x".into()), Expr::Name("y".into())])
        );
    }

    #[test]
    fn test_calls_and_attributes() {
        let e = parse("math.sqrt(x)[0]");
        assert!(matches!(e, Expr::Subscript(..)));
        assert!(e.mentions("x"));
        assert!(!e.mentions("sqrt"));
    }

    #[test]
    fn test_rejects_unsupported_forms() {
        assert!(parse_expr_text("lambda x: x").is_err());
        assert!(parse_expr_text("f(key=1)").is_err());
        assert!(parse_expr_text("xs[1:2]").is_err());
        assert!(parse_expr_text("[y for y in xs]").is_err());
        assert!(parse_expr_text("x y").is_err());
    }

    #[test]
    fn test_eval_int_python_rounding() {
        assert_eq!(parse("-7 // 2").eval_int(), Some(-4));
        assert_eq!(parse("-7 % 3").eval_int(), Some(2));
        assert_eq!(parse("2 ** 10 - 1").eval_int(), Some(1023));
        assert_eq!(parse("1 // 0").eval_int(), None);
        assert_eq!(parse("n + 1").eval_int(), None);
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(parse("-5"), Expr::Const(Literal::Int(-5)));
    }
}
