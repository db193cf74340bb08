use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a token or captured expression.
///
/// Offsets are character indices into the source, which lets the parser
/// slice expression text back out verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Character offset of the start of this span.
    pub start: usize,
    /// Character offset of the end (exclusive) of this span.
    pub end: usize,
    /// 1-based line number of the start.
    pub line: u32,
    /// 1-based column number of the start.
    pub col: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, col: u32) -> Self {
        Self {
            start,
            end,
            line,
            col,
        }
    }

    /// A zero-width span for positions that have no source location.
    pub fn synthetic() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 0,
            col: 0,
        }
    }

    /// Merge two spans into one that covers both.
    pub fn merge(self, other: Span) -> Span {
        let start = self.start.min(other.start);
        let end = self.end.max(other.end);
        let (line, col) = if self.start <= other.start {
            (self.line, self.col)
        } else {
            (other.line, other.col)
        };
        Span {
            start,
            end,
            line,
            col,
        }
    }

    /// The covered source text, trimmed of surrounding whitespace.
    pub fn text(&self, source: &[char]) -> String {
        let end = self.end.min(source.len());
        let start = self.start.min(end);
        source[start..end].iter().collect::<String>().trim().to_string()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
