//! Indentation-aware line accumulator shared by all back-ends.

use std::ops::{Deref, DerefMut};

pub struct CodeWriter {
    lines: Vec<String>,
    indent: usize,
    unit: &'static str,
}

impl CodeWriter {
    /// A writer indenting with four spaces.
    pub fn new() -> Self {
        Self::with_unit("    ")
    }

    pub fn with_unit(unit: &'static str) -> Self {
        Self {
            lines: Vec::new(),
            indent: 0,
            unit,
        }
    }

    // ── Output primitives ──────────────────────────────────────

    pub fn line(&mut self, s: impl AsRef<str>) {
        let s = s.as_ref();
        if s.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", self.unit.repeat(self.indent), s));
        }
    }

    /// Emit several lines, each at the current indent.
    pub fn lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for l in lines {
            self.line(l);
        }
    }

    pub fn blank(&mut self) {
        if self.lines.last().map_or(false, |l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    /// Open a block: emit `header`, indent, and emit `footer` at the
    /// original indent when the returned guard drops.
    pub fn block(&mut self, header: impl AsRef<str>, footer: impl Into<String>) -> BlockGuard<'_> {
        self.line(header);
        self.indent += 1;
        BlockGuard {
            writer: self,
            footer: footer.into(),
        }
    }

    /// Indent without a header or footer line.
    pub fn indented(&mut self) -> BlockGuard<'_> {
        self.indent += 1;
        BlockGuard {
            writer: self,
            footer: String::new(),
        }
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

impl Default for CodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Scope of an open block. Dereferences to the writer.
pub struct BlockGuard<'w> {
    writer: &'w mut CodeWriter,
    footer: String,
}

impl Deref for BlockGuard<'_> {
    type Target = CodeWriter;

    fn deref(&self) -> &CodeWriter {
        self.writer
    }
}

impl DerefMut for BlockGuard<'_> {
    fn deref_mut(&mut self) -> &mut CodeWriter {
        self.writer
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        self.writer.indent = self.writer.indent.saturating_sub(1);
        if !self.footer.is_empty() {
            let footer = std::mem::take(&mut self.footer);
            self.writer.line(footer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks_close_in_order() {
        let mut w = CodeWriter::new();
        {
            let mut f = w.block("function f()", "end");
            let mut body = f.block("for i in 1:3", "end");
            body.line("println(i)");
        }
        assert_eq!(
            w.finish(),
            "function f()\n    for i in 1:3\n        println(i)\n    end\nend\n"
        );
    }

    #[test]
    fn test_footer_emitted_on_early_exit() {
        fn emit(w: &mut CodeWriter, bail: bool) -> Result<(), ()> {
            let mut b = w.block("{", "}");
            b.line("a");
            if bail {
                return Err(());
            }
            b.line("b");
            Ok(())
        }
        let mut w = CodeWriter::new();
        assert!(emit(&mut w, true).is_err());
        assert_eq!(w.finish(), "{\n    a\n}\n");
    }

    #[test]
    fn test_indented_has_no_header() {
        let mut w = CodeWriter::new();
        w.line("xs");
        {
            let mut cont = w.indented();
            cont.line(".iter()");
        }
        w.line("done");
        assert_eq!(w.finish(), "xs\n    .iter()\ndone\n");
    }

    #[test]
    fn test_custom_unit_and_blank_dedup() {
        let mut w = CodeWriter::with_unit("\t");
        w.blank();
        {
            let mut b = w.block("func f() {", "}");
            b.line("x := 1");
        }
        w.blank();
        w.blank();
        w.line("done");
        assert_eq!(w.finish(), "func f() {\n\tx := 1\n}\n\ndone\n");
    }
}
