use crate::compiler::span::Span;
use crate::compiler::token::{Token, TokenKind};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════
//  Error type
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error)]
#[error("lex error at {span}: {message}")]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

// ═══════════════════════════════════════════════════════════════
//  Lexer
// ═══════════════════════════════════════════════════════════════

/// Tokenizer for the Python expression subset.
///
/// Newlines are significant only outside brackets, mirroring Python's
/// implicit line joining; inside `()`, `[]` and `{}` they are whitespace.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    depth: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            depth: 0,
        }
    }

    /// The source as characters; spans index into this.
    pub fn source_chars(&self) -> &[char] {
        &self.source
    }

    /// Tokenize the entire source into a Vec<Token>.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.kind.is_eof();
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments();

        if self.is_at_end() {
            return Ok(Token::new(
                TokenKind::EOF,
                Span::new(self.pos, self.pos, self.line, self.col),
            ));
        }

        let start = self.pos;
        let start_line = self.line;
        let start_col = self.col;
        let c = self.advance();

        let kind = match c {
            '\n' => TokenKind::Newline,
            '(' => self.open(TokenKind::LParen),
            '[' => self.open(TokenKind::LBracket),
            '{' => self.open(TokenKind::LBrace),
            ')' => self.close(TokenKind::RParen),
            ']' => self.close(TokenKind::RBracket),
            '}' => self.close(TokenKind::RBrace),
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '%' => TokenKind::Percent,
            '&' => TokenKind::Ampersand,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,

            '.' => {
                if self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    return self.lex_number(start, start_line, start_col);
                }
                TokenKind::Dot
            }

            '*' => {
                if self.peek() == Some('*') {
                    self.advance();
                    TokenKind::StarStar
                } else {
                    TokenKind::Star
                }
            }

            '/' => {
                if self.peek() == Some('/') {
                    self.advance();
                    TokenKind::SlashSlash
                } else {
                    TokenKind::Slash
                }
            }

            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }

            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    return Err(LexError {
                        message: "unexpected character '!'; use 'not' for logical negation"
                            .to_string(),
                        span: Span::new(start, self.pos, start_line, start_col),
                    });
                }
            }

            '<' => match self.peek() {
                Some('=') => {
                    self.advance();
                    TokenKind::LtEq
                }
                Some('<') => {
                    self.advance();
                    TokenKind::LShift
                }
                _ => TokenKind::Lt,
            },

            '>' => match self.peek() {
                Some('=') => {
                    self.advance();
                    TokenKind::GtEq
                }
                Some('>') => {
                    self.advance();
                    TokenKind::RShift
                }
                _ => TokenKind::Gt,
            },

            '"' | '\'' => return self.lex_string(c, start, start_line, start_col),

            c if c.is_ascii_digit() => {
                return self.lex_number(start, start_line, start_col);
            }

            c if c.is_alphabetic() || c == '_' => {
                return self.lex_ident_or_keyword(start, start_line, start_col);
            }

            other => {
                return Err(LexError {
                    message: format!("unexpected character '{}'", other),
                    span: Span::new(start, self.pos, start_line, start_col),
                });
            }
        };

        Ok(Token::new(
            kind,
            Span::new(start, self.pos, start_line, start_col),
        ))
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn open(&mut self, kind: TokenKind) -> TokenKind {
        self.depth += 1;
        kind
    }

    fn close(&mut self, kind: TokenKind) -> TokenKind {
        self.depth = self.depth.saturating_sub(1);
        kind
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some('\n') if self.depth > 0 => {
                    self.advance();
                }
                Some(c) if c != '\n' && c.is_whitespace() => {
                    self.advance();
                }
                // Explicit line continuation
                Some('\\') if self.peek_next() == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                Some('#') => {
                    while !self.is_at_end() && self.peek() != Some('\n') {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn lex_string(
        &mut self,
        quote: char,
        start: usize,
        start_line: u32,
        start_col: u32,
    ) -> Result<Token, LexError> {
        let mut value = String::new();

        loop {
            if self.is_at_end() || self.peek() == Some('\n') {
                return Err(LexError {
                    message: "unterminated string literal".to_string(),
                    span: Span::new(start, self.pos, start_line, start_col),
                });
            }

            let c = self.advance();
            match c {
                c if c == quote => break,
                '\\' => {
                    if self.is_at_end() {
                        return Err(LexError {
                            message: "unterminated escape sequence".to_string(),
                            span: Span::new(start, self.pos, start_line, start_col),
                        });
                    }
                    let escaped = self.advance();
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        '\\' | '\'' | '"' => value.push(escaped),
                        other => {
                            // Python keeps unknown escapes verbatim
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                _ => value.push(c),
            }
        }

        Ok(Token::new(
            TokenKind::StringLit(value),
            Span::new(start, self.pos, start_line, start_col),
        ))
    }

    fn lex_number(
        &mut self,
        start: usize,
        start_line: u32,
        start_col: u32,
    ) -> Result<Token, LexError> {
        let first = self.source[start];

        if first == '0' && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            let digits_start = self.pos;
            while self
                .peek()
                .map_or(false, |c| c.is_ascii_hexdigit() || c == '_')
            {
                self.advance();
            }
            let text: String = self.source[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = i64::from_str_radix(&text, 16).map_err(|_| LexError {
                message: format!("invalid hex literal '0x{}'", text),
                span: Span::new(start, self.pos, start_line, start_col),
            })?;
            return Ok(Token::new(
                TokenKind::IntLit(value),
                Span::new(start, self.pos, start_line, start_col),
            ));
        }

        // Already consumed the first digit (or the leading '.')
        let mut is_float = first == '.';
        self.eat_digits();

        if !is_float
            && self.peek() == Some('.')
            && self.peek_next().map_or(false, |c| c.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            self.eat_digits();
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let exp_digit = match self.peek_next() {
                Some('+') | Some('-') => self.source.get(self.pos + 2).copied(),
                other => other,
            };
            if exp_digit.map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                self.eat_digits();
            }
        }

        let text: String = self.source[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let span = Span::new(start, self.pos, start_line, start_col);

        if is_float {
            let value: f64 = text.parse().map_err(|_| LexError {
                message: format!("invalid float literal '{}'", text),
                span,
            })?;
            return Ok(Token::new(TokenKind::FloatLit(value), span));
        }

        let value: i64 = text.parse().map_err(|_| LexError {
            message: format!("invalid integer literal '{}'", text),
            span,
        })?;
        Ok(Token::new(TokenKind::IntLit(value), span))
    }

    fn eat_digits(&mut self) {
        while self.peek().map_or(false, |c| c.is_ascii_digit() || c == '_') {
            self.advance();
        }
    }

    fn lex_ident_or_keyword(
        &mut self,
        start: usize,
        start_line: u32,
        start_col: u32,
    ) -> Result<Token, LexError> {
        while self.peek().map_or(false, |c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }

        let text: String = self.source[start..self.pos].iter().collect();
        let kind = TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Ident(text));

        Ok(Token::new(
            kind,
            Span::new(start, self.pos, start_line, start_col),
        ))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Unit tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input);
        lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_list_comprehension_tokens() {
        let tokens = lex("[x**2 for x in range(5)]");
        assert_eq!(
            tokens,
            vec![
                TokenKind::LBracket,
                TokenKind::Ident("x".into()),
                TokenKind::StarStar,
                TokenKind::IntLit(2),
                TokenKind::For,
                TokenKind::Ident("x".into()),
                TokenKind::In,
                TokenKind::Ident("range".into()),
                TokenKind::LParen,
                TokenKind::IntLit(5),
                TokenKind::RParen,
                TokenKind::RBracket,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn test_floor_division_and_shifts() {
        let tokens = lex("a // b << 2 >= c");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::SlashSlash,
                TokenKind::Ident("b".into()),
                TokenKind::LShift,
                TokenKind::IntLit(2),
                TokenKind::GtEq,
                TokenKind::Ident("c".into()),
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        let tokens = lex("True and not None or true");
        assert_eq!(
            tokens,
            vec![
                TokenKind::True,
                TokenKind::And,
                TokenKind::Not,
                TokenKind::None,
                TokenKind::Or,
                TokenKind::Ident("true".into()),
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn test_newline_ignored_inside_brackets() {
        let tokens = lex("[x\n for x in xs]\n");
        assert!(!tokens[..tokens.len() - 2].contains(&TokenKind::Newline));
        assert_eq!(tokens[tokens.len() - 2], TokenKind::Newline);
    }

    #[test]
    fn test_comments_skipped() {
        let tokens = lex("x # trailing comment");
        assert_eq!(tokens, vec![TokenKind::Ident("x".into()), TokenKind::EOF]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("1_000")[0], TokenKind::IntLit(1000));
        assert_eq!(lex("0x1F")[0], TokenKind::IntLit(31));
        assert_eq!(lex("2.5")[0], TokenKind::FloatLit(2.5));
        assert_eq!(lex("1e3")[0], TokenKind::FloatLit(1000.0));
        assert_eq!(lex(".5")[0], TokenKind::FloatLit(0.5));
    }

    #[test]
    fn test_string_quotes() {
        assert_eq!(lex("'a\\'b'")[0], TokenKind::StringLit("a'b".into()));
        assert_eq!(lex("\"hi\"")[0], TokenKind::StringLit("hi".into()));
    }

    #[test]
    fn test_bang_rejected() {
        let mut lexer = Lexer::new("!x");
        let err = lexer.tokenize().unwrap_err();
        assert!(err.message.contains("use 'not'"));
    }
}
