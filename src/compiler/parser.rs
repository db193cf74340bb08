use crate::compiler::expr::parse_expr_text;
use crate::compiler::ir::{
    Comprehension, ComprehensionKind, Generator, GeneratorSource, Range, Reduce, ReduceKind,
};
use crate::compiler::lexer::{LexError, Lexer};
use crate::compiler::span::Span;
use crate::compiler::token::{Token, TokenKind};
use log::trace;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════
//  Error type
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at {span}: {message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            span: err.span,
        }
    }
}

/// Parse one comprehension or reduction statement into IR.
pub fn parse(source: &str) -> Result<Comprehension, ParseError> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let chars = lexer.source_chars().to_vec();
    Parser::new(tokens, chars).parse_statement()
}

// ═══════════════════════════════════════════════════════════════
//  Parser
// ═══════════════════════════════════════════════════════════════

/// Recursive-descent parser for the comprehension subset.
///
/// Only the comprehension skeleton is parsed structurally. Element, key,
/// value, filter and iterable expressions are captured as verbatim source
/// slices by scanning to the next clause keyword at bracket depth zero.
pub struct Parser {
    tokens: Vec<Token>,
    source: Vec<char>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, source: Vec<char>) -> Self {
        Self {
            tokens,
            source,
            pos: 0,
        }
    }

    /// `[import ...]* [name =] expression`, with nothing after it.
    pub fn parse_statement(&mut self) -> Result<Comprehension, ParseError> {
        self.skip_separators();
        while self.check_ident("import") || self.check_ident("from") {
            self.skip_import()?;
            self.skip_separators();
        }

        if self.check(&TokenKind::EOF) {
            return Err(self.error("expected a single expression statement, found empty input"));
        }

        let mut assigned_to = None;
        if let TokenKind::Ident(name) = self.peek_kind() {
            if self.peek_kind_at(self.pos + 1) == TokenKind::Eq {
                self.advance();
                self.advance();
                trace!("statement assigns to '{}'", name);
                assigned_to = Some(name);
            }
        }

        let mut comp = self.parse_top_expr()?;

        self.skip_separators();
        if !self.check(&TokenKind::EOF) {
            return Err(self.error(&format!(
                "expected a single expression statement, found '{}'",
                self.peek_kind()
            )));
        }

        if let Some(name) = assigned_to {
            comp.provenance.insert("target".to_string(), name);
        }
        trace!(
            "parsed {} comprehension with {} generator(s)",
            comp.kind,
            comp.generators.len()
        );
        Ok(comp)
    }

    fn parse_top_expr(&mut self) -> Result<Comprehension, ParseError> {
        match self.peek_kind() {
            TokenKind::LBracket => self.parse_bracketed(ComprehensionKind::List),
            TokenKind::LBrace => self.parse_braced(),
            TokenKind::LParen => self.parse_bracketed(ComprehensionKind::Generator),
            TokenKind::Ident(_) => self.parse_reducer_call(),
            other => Err(self.error(&format!(
                "unsupported expression starting with '{}'; expected a comprehension or reduction call",
                other
            ))),
        }
    }

    // ── Comprehensions ───────────────────────────────────────

    /// `[elem for ...]` or `(elem for ...)`.
    fn parse_bracketed(&mut self, kind: ComprehensionKind) -> Result<Comprehension, ParseError> {
        let open = self.advance();
        let close = match open.kind {
            TokenKind::LBracket => TokenKind::RBracket,
            _ => TokenKind::RParen,
        };

        let element = self.capture(|k| matches!(k, TokenKind::For))?;
        if !self.check(&TokenKind::For) {
            let what = if kind == ComprehensionKind::List {
                "list displays are not comprehensions"
            } else {
                "parenthesized expression is not a generator expression"
            };
            return Err(self.error(what));
        }
        let generators = self.parse_clauses()?;
        self.expect(&close)?;

        let origin = match kind {
            ComprehensionKind::List => "list_comp",
            _ => "genexp",
        };
        let mut comp = Comprehension::with_element(kind, &element, generators);
        comp.provenance = provenance(origin);
        Ok(comp)
    }

    /// `{elem for ...}` or `{key: value for ...}`.
    fn parse_braced(&mut self) -> Result<Comprehension, ParseError> {
        self.advance();
        let first = self.capture(|k| matches!(k, TokenKind::For | TokenKind::Colon))?;

        if self.check(&TokenKind::Colon) {
            self.advance();
            let value = self.capture(|k| matches!(k, TokenKind::For))?;
            if !self.check(&TokenKind::For) {
                return Err(self.error("dict displays are not comprehensions"));
            }
            let generators = self.parse_clauses()?;
            self.expect(&TokenKind::RBrace)?;
            let mut comp = Comprehension::dict(&first, &value, generators);
            comp.provenance = provenance("dict_comp");
            return Ok(comp);
        }

        if !self.check(&TokenKind::For) {
            return Err(self.error("set displays are not comprehensions"));
        }
        let generators = self.parse_clauses()?;
        self.expect(&TokenKind::RBrace)?;
        let mut comp = Comprehension::with_element(ComprehensionKind::Set, &first, generators);
        comp.provenance = provenance("set_comp");
        Ok(comp)
    }

    /// One or more `for VAR in ITER [if COND]*` clauses.
    fn parse_clauses(&mut self) -> Result<Vec<Generator>, ParseError> {
        let mut generators: Vec<Generator> = Vec::new();
        let mut bound = HashSet::new();

        while self.check(&TokenKind::For) {
            self.advance();
            let var_span = self.current_span();
            let var = match self.peek_kind() {
                TokenKind::Ident(name) => {
                    self.advance();
                    name
                }
                TokenKind::LParen | TokenKind::LBracket => {
                    return Err(self.error("destructuring targets are unsupported"));
                }
                other => {
                    return Err(self.error(&format!(
                        "expected loop variable, found '{}'",
                        other
                    )))
                }
            };
            if self.check(&TokenKind::Comma) || self.check(&TokenKind::Dot) {
                return Err(self.error("destructuring targets are unsupported"));
            }
            if !bound.insert(var.clone()) {
                return Err(ParseError {
                    message: format!("generator variable '{}' is bound twice", var),
                    span: var_span,
                });
            }

            self.expect(&TokenKind::In)?;
            let source = self.parse_iterable()?;

            let mut filters = Vec::new();
            while self.check(&TokenKind::If) {
                self.advance();
                let filter = self.capture(|k| {
                    matches!(k, TokenKind::If | TokenKind::For | TokenKind::Comma)
                })?;
                filters.push(filter);
            }

            trace!("generator '{}' with {} filter(s)", var, filters.len());
            generators.push(Generator {
                var,
                source,
                filters,
            });
        }

        if generators.is_empty() {
            return Err(self.error("expected 'for' clause"));
        }
        Ok(generators)
    }

    /// A `range(...)` call with constant bounds, or opaque iterable text.
    fn parse_iterable(&mut self) -> Result<GeneratorSource, ParseError> {
        let first = self.pos;
        let text =
            self.capture(|k| matches!(k, TokenKind::If | TokenKind::For | TokenKind::Comma))?;
        let last = self.pos;

        let is_range_call = self.tokens[first].kind == TokenKind::Ident("range".to_string())
            && self.peek_kind_at(first + 1) == TokenKind::LParen
            && self.matching_close(first + 1) == Some(last - 1);

        if !is_range_call {
            return Ok(GeneratorSource::Expr(text));
        }

        let args = self.split_args(first + 2, last - 1)?;
        let span = self.tokens[first].span.merge(self.tokens[last - 1].span);
        let mut values = Vec::with_capacity(args.len());
        for (arg_text, arg_span) in &args {
            values.push(eval_bound(arg_text, *arg_span)?);
        }

        let range = match values.as_slice() {
            [stop] => Range::new(0, *stop, 1),
            [start, stop] => Range::new(*start, *stop, 1),
            [start, stop, step] => Range::new(*start, *stop, *step),
            _ => {
                return Err(ParseError {
                    message: format!("range expects 1 to 3 arguments, got {}", values.len()),
                    span,
                })
            }
        };
        if range.step == 0 {
            return Err(ParseError {
                message: "range step must not be zero".to_string(),
                span,
            });
        }
        Ok(GeneratorSource::Range(range))
    }

    // ── Reducer calls ────────────────────────────────────────

    /// `sum(...)`, `math.prod(...)`, etc. over a generator or list comp.
    fn parse_reducer_call(&mut self) -> Result<Comprehension, ParseError> {
        let start = self.current_span();
        let mut name = self.expect_ident()?;
        if name == "math" && self.check(&TokenKind::Dot) {
            self.advance();
            let attr = self.expect_ident()?;
            if attr != "prod" {
                return Err(ParseError {
                    message: format!("unsupported function 'math.{}'", attr),
                    span: start,
                });
            }
            name = attr;
        }

        let reduce_kind = ReduceKind::from_name(&name).ok_or_else(|| ParseError {
            message: format!(
                "unsupported function '{}'; expected one of sum, prod, max, min, any, all",
                name
            ),
            span: start,
        })?;
        if !self.check(&TokenKind::LParen) {
            return Err(self.error(&format!("expected call to '{}'", name)));
        }
        self.advance();

        if self.check(&TokenKind::RParen) {
            return Err(self.error(&format!("function {} expects exactly one argument", name)));
        }
        if let TokenKind::Ident(_) = self.peek_kind() {
            if self.peek_kind_at(self.pos + 1) == TokenKind::Eq {
                return Err(self.error(&format!(
                    "function {} does not accept keyword arguments",
                    name
                )));
            }
        }

        let mut comp = match self.peek_kind() {
            TokenKind::LBracket if self.arg_is_whole_comprehension() => {
                self.parse_bracketed(ComprehensionKind::List)?
            }
            TokenKind::LParen if self.arg_is_whole_comprehension() => {
                self.parse_bracketed(ComprehensionKind::Generator)?
            }
            TokenKind::LBrace => {
                return Err(self.error(&format!(
                    "function {} expects a generator expression",
                    name
                )));
            }
            _ => {
                let element = self.capture(|k| matches!(k, TokenKind::For | TokenKind::Comma))?;
                if !self.check(&TokenKind::For) {
                    if self.check(&TokenKind::Comma) {
                        return Err(self.error(&format!(
                            "function {} expects exactly one argument",
                            name
                        )));
                    }
                    return Err(self.error(&format!(
                        "function {} expects a generator expression",
                        name
                    )));
                }
                let generators = self.parse_clauses()?;
                Comprehension::with_element(ComprehensionKind::Generator, &element, generators)
            }
        };

        if self.check(&TokenKind::Comma) {
            return Err(self.error(&format!("function {} expects exactly one argument", name)));
        }
        self.expect(&TokenKind::RParen)?;

        comp.reduce = Some(Reduce::new(reduce_kind));
        comp.provenance = provenance(&format!("call_{}", name));
        Ok(comp)
    }

    /// Whether the bracket at the cursor opens a comprehension that forms
    /// the entire call argument (`sum([x for x in r])`).
    fn arg_is_whole_comprehension(&self) -> bool {
        let close = match self.matching_close(self.pos) {
            Some(c) => c,
            None => return false,
        };
        let after = self.peek_kind_at(close + 1);
        if !matches!(after, TokenKind::RParen | TokenKind::Comma) {
            return false;
        }
        let mut depth = 0usize;
        for tok in &self.tokens[self.pos + 1..close] {
            if tok.kind.is_open_bracket() {
                depth += 1;
            } else if tok.kind.is_close_bracket() {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && tok.kind == TokenKind::For {
                return true;
            }
        }
        false
    }

    // ── Text capture ─────────────────────────────────────────

    /// Consume tokens up to (not including) the first depth-zero token
    /// matching `stop`, a depth-zero closing bracket, or end of input.
    /// Returns the trimmed source slice covered.
    fn capture<F>(&mut self, stop: F) -> Result<String, ParseError>
    where
        F: Fn(&TokenKind) -> bool,
    {
        let first = self.pos;
        let mut depth = 0usize;

        loop {
            let kind = self.peek_kind();
            if kind.is_eof() {
                if depth > 0 {
                    return Err(self.error("unexpected end of input: unclosed bracket"));
                }
                break;
            }
            if depth == 0 && (stop(&kind) || kind.is_close_bracket()) {
                break;
            }
            if matches!(kind, TokenKind::Newline | TokenKind::Semicolon) && depth == 0 {
                break;
            }
            if kind.is_open_bracket() {
                depth += 1;
            } else if kind.is_close_bracket() {
                depth -= 1;
            }
            self.advance();
        }

        if self.pos == first {
            return Err(self.error(&format!(
                "expected expression, found '{}'",
                self.peek_kind()
            )));
        }
        let span = self.tokens[first].span.merge(self.tokens[self.pos - 1].span);
        Ok(span.text(&self.source))
    }

    /// Split the tokens in `[from, to)` on depth-zero commas.
    fn split_args(&self, from: usize, to: usize) -> Result<Vec<(String, Span)>, ParseError> {
        let mut args = Vec::new();
        let mut depth = 0usize;
        let mut arg_start = from;

        for i in from..=to {
            let kind = &self.tokens[i].kind;
            let at_end = i == to;
            if !at_end {
                if kind.is_open_bracket() {
                    depth += 1;
                    continue;
                } else if kind.is_close_bracket() {
                    depth = depth.saturating_sub(1);
                    continue;
                }
            }
            if at_end || (depth == 0 && *kind == TokenKind::Comma) {
                if i > arg_start {
                    if let TokenKind::Ident(_) = self.tokens[arg_start].kind {
                        if self.tokens[arg_start + 1].kind == TokenKind::Eq {
                            return Err(ParseError {
                                message: "range does not accept keyword arguments".to_string(),
                                span: self.tokens[arg_start].span,
                            });
                        }
                    }
                    let span = self.tokens[arg_start].span.merge(self.tokens[i - 1].span);
                    args.push((span.text(&self.source), span));
                }
                arg_start = i + 1;
            }
        }
        Ok(args)
    }

    /// Index of the bracket closing the one at `open`.
    fn matching_close(&self, open: usize) -> Option<usize> {
        if !self.tokens.get(open)?.kind.is_open_bracket() {
            return None;
        }
        let mut depth = 0usize;
        for (i, tok) in self.tokens.iter().enumerate().skip(open) {
            if tok.kind.is_open_bracket() {
                depth += 1;
            } else if tok.kind.is_close_bracket() {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
        }
        None
    }

    fn skip_import(&mut self) -> Result<(), ParseError> {
        self.advance();
        if self.check(&TokenKind::Newline) || self.check(&TokenKind::EOF) {
            return Err(self.error("expected module name after import"));
        }
        while !matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::EOF
        ) {
            self.advance();
        }
        Ok(())
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
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

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(ref n) if n == name)
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

fn provenance(origin: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("origin".to_string(), origin.to_string());
    map
}

fn eval_bound(text: &str, span: Span) -> Result<i64, ParseError> {
    let non_literal = || ParseError {
        message: format!("non-literal range bound '{}'", text),
        span,
    };
    let expr = parse_expr_text(text).map_err(|_| non_literal())?;
    expr.eval_int().ok_or_else(non_literal)
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Comprehension {
        parse(input).unwrap()
    }

    fn parse_err(input: &str) -> String {
        parse(input).unwrap_err().message
    }

    #[test]
    fn test_list_comprehension() {
        let comp = parse_ok("[x**2 for x in range(5)]");
        assert_eq!(comp.kind, ComprehensionKind::List);
        assert_eq!(comp.element.as_deref(), Some("x**2"));
        assert_eq!(comp.generators.len(), 1);
        assert_eq!(comp.generators[0].var, "x");
        assert_eq!(
            comp.generators[0].source,
            GeneratorSource::Range(Range::new(0, 5, 1))
        );
        assert!(comp.generators[0].filters.is_empty());
        assert_eq!(comp.provenance["origin"], "list_comp");
    }

    #[test]
    fn test_sum_with_filter() {
        let comp = parse_ok("sum(x*x for x in range(1,100) if x%3==0)");
        assert_eq!(comp.kind, ComprehensionKind::Generator);
        assert_eq!(comp.reduce_kind(), Some(ReduceKind::Sum));
        assert_eq!(comp.element.as_deref(), Some("x*x"));
        assert_eq!(comp.generators[0].filters, vec!["x%3==0".to_string()]);
        assert_eq!(comp.provenance["origin"], "call_sum");
    }

    #[test]
    fn test_dict_comprehension() {
        let comp = parse_ok("{i: i*i for i in range(1,6) if i%2==1}");
        assert_eq!(comp.kind, ComprehensionKind::Dict);
        assert_eq!(comp.key_expr.as_deref(), Some("i"));
        assert_eq!(comp.val_expr.as_deref(), Some("i*i"));
        assert!(comp.element.is_none());
    }

    #[test]
    fn test_set_and_nested_generators() {
        let comp = parse_ok("{(i, j) for i in range(0,3) for j in range(0,3) if i != j}");
        assert_eq!(comp.kind, ComprehensionKind::Set);
        assert_eq!(comp.element.as_deref(), Some("(i, j)"));
        assert_eq!(comp.generators.len(), 2);
        assert!(comp.generators[0].filters.is_empty());
        assert_eq!(comp.generators[1].filters, vec!["i != j".to_string()]);
    }

    #[test]
    fn test_element_with_ternary() {
        let comp = parse_ok("[x if x > 2 else -x for x in range(5) if x != 3 if x != 4]");
        assert_eq!(comp.element.as_deref(), Some("x if x > 2 else -x"));
        assert_eq!(comp.generators[0].filters.len(), 2);
    }

    #[test]
    fn test_opaque_iterable() {
        let comp = parse_ok("[v + 1 for v in data]");
        assert_eq!(
            comp.generators[0].source,
            GeneratorSource::Expr("data".to_string())
        );
        let comp = parse_ok("[v for v in sorted(data)]");
        assert_eq!(
            comp.generators[0].source,
            GeneratorSource::Expr("sorted(data)".to_string())
        );
    }

    #[test]
    fn test_range_bounds_fold() {
        let comp = parse_ok("[x for x in range(-3, 2**4, -(-2))]");
        assert_eq!(comp.generators[0].as_range(), Some(&Range::new(-3, 16, 2)));
    }

    #[test]
    fn test_assignment_and_import() {
        let comp = parse_ok("import math\np = math.prod(x for x in range(1,6) if x != 3)");
        assert_eq!(comp.reduce_kind(), Some(ReduceKind::Prod));
        assert_eq!(comp.provenance["target"], "p");
        assert_eq!(comp.provenance["origin"], "call_prod");
    }

    #[test]
    fn test_reducer_over_list_comp() {
        let comp = parse_ok("max([x % 7 for x in range(20)])");
        assert_eq!(comp.kind, ComprehensionKind::List);
        assert_eq!(comp.reduce_kind(), Some(ReduceKind::Max));
    }

    #[test]
    fn test_multiline_input() {
        let comp = parse_ok("[\n    x * 2\n    for x in range(3)\n]\n");
        assert_eq!(comp.element.as_deref(), Some("x * 2"));
    }

    #[test]
    fn test_rejects_non_literal_range_bound() {
        assert!(parse_err("[x for x in range(n)]").contains("non-literal range bound"));
    }

    #[test]
    fn test_rejects_zero_step() {
        assert!(parse_err("[x for x in range(0, 5, 0)]").contains("step must not be zero"));
    }

    #[test]
    fn test_rejects_destructuring() {
        assert!(parse_err("[a for a, b in pairs]").contains("destructuring"));
        assert!(parse_err("[a for (a, b) in pairs]").contains("destructuring"));
    }

    #[test]
    fn test_rejects_duplicate_variables() {
        assert!(parse_err("[x for x in range(3) for x in range(2)]").contains("bound twice"));
    }

    #[test]
    fn test_reducer_argument_errors() {
        assert!(parse_err("sum(xs)").contains("expects a generator expression"));
        assert!(parse_err("sum({x for x in range(3)})").contains("expects a generator expression"));
        assert!(parse_err("sum()").contains("exactly one argument"));
        assert!(parse_err("sum(x for x in range(3), 0)").contains("exactly one argument"));
        assert!(parse_err("sum(start=0)").contains("keyword arguments"));
        assert!(parse_err("sorted(x for x in range(3))").contains("unsupported function"));
    }

    #[test]
    fn test_rejects_multiple_statements() {
        assert!(parse_err("[x for x in range(3)]\n[y for y in range(2)]")
            .contains("single expression statement"));
        assert!(parse_err("").contains("empty input"));
    }

    #[test]
    fn test_rejects_plain_displays() {
        assert!(parse_err("[1, 2, 3]").contains("not comprehensions"));
        assert!(parse_err("{1: 2}").contains("not comprehensions"));
        assert!(parse_err("42").contains("unsupported expression"));
    }

    #[test]
    fn test_error_display_has_position() {
        let err = parse("[x for x in range(n)]").unwrap_err();
        assert!(err.to_string().starts_with("parse error at 1:"));
    }
}
