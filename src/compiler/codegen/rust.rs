//! Rust back-end: iterator chains, switching to rayon when `parallel` is set.

use super::options::{IntSpelling, RenderOptions};
use super::syntax::{Dialect, ExprPrinter};
use super::writer::CodeWriter;
use super::{is_identity_map, non_negative_vars, tuple_arity, RenderError, Renderer};
use crate::compiler::ir::{Comprehension, ComprehensionKind, Generator, GeneratorSource, Range, ReduceKind};

pub struct RustRenderer;

impl Renderer for RustRenderer {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn accepted_options(&self) -> &'static [&'static str] {
        &["func_name", "parallel", "int_type"]
    }

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError> {
        let int_type = opts.int_type_or_default(IntSpelling::Rust)?;
        let emitter = RustEmitter {
            ir,
            int_type,
            parallel: opts.bool_or("parallel", false)?,
            printer: ExprPrinter::new(Dialect::Rust)
                .with_int_type(int_type)
                .with_non_negative(non_negative_vars(ir)),
        };
        emitter.emit(opts.func_name_or_default()?)
    }
}

struct RustEmitter<'a> {
    ir: &'a Comprehension,
    int_type: &'a str,
    parallel: bool,
    printer: ExprPrinter,
}

impl RustEmitter<'_> {
    fn emit(mut self, func_name: &str) -> Result<String, RenderError> {
        let mut w = CodeWriter::new();

        match (self.ir.reduce.is_some(), self.ir.kind) {
            (false, ComprehensionKind::Set) => w.line("use std::collections::HashSet;"),
            (false, ComprehensionKind::Dict) => w.line("use std::collections::HashMap;"),
            _ => {}
        }
        if self.parallel {
            w.line("use rayon::prelude::*;");
        }
        w.blank();

        let header = format!("fn {}() -> {} {{", func_name, self.return_type());
        let chain = self.chain();
        {
            let mut body = w.block(header, "}");
            let mut steps = chain.into_iter();
            if let Some(source) = steps.next() {
                body.line(source);
            }
            let mut cont = body.indented();
            for step in steps {
                cont.line(step);
            }
        }
        Ok(w.finish())
    }

    // ── Types ────────────────────────────────────────────────

    fn return_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "bool".to_string(),
            Some(_) => self.int_type.to_string(),
            None => match self.ir.kind {
                ComprehensionKind::Dict => format!(
                    "HashMap<{}, {}>",
                    self.type_of(self.ir.key_text()),
                    self.type_of(self.ir.value_text())
                ),
                ComprehensionKind::Set => format!("HashSet<{}>", self.type_of(self.ir.element_text())),
                ComprehensionKind::List | ComprehensionKind::Generator => {
                    format!("Vec<{}>", self.type_of(self.ir.element_text()))
                }
            },
        }
    }

    /// Tuple displays become tuple types; everything else is the int type.
    fn type_of(&self, text: &str) -> String {
        match tuple_arity(text) {
            Some(1) => format!("({},)", self.int_type),
            Some(n) => format!("({})", vec![self.int_type; n].join(", ")),
            None => self.int_type.to_string(),
        }
    }

    // ── Chain ────────────────────────────────────────────────

    /// The source expression followed by one `.step(..)` per line.
    fn chain(&mut self) -> Vec<String> {
        let ir = self.ir;
        let parallel = self.parallel;
        let Some(outer) = ir.generators.first() else {
            return vec!["Default::default()".to_string()];
        };

        let mut steps = vec![self.source(outer, 0, parallel)];
        for filter in &outer.filters {
            steps.push(self.filter_step(&outer.var, filter, 0));
        }

        let single = ir.generators.len() == 1;
        if single {
            if let Some(step) = self.projection_step(outer, 0) {
                steps.push(step);
            }
        } else {
            let adapter = if parallel { "flat_map_iter" } else { "flat_map" };
            let inner = self.nested(1);
            steps.push(format!(".{}(|{}| {})", adapter, outer.var, inner));
        }

        steps.push(self.terminal(single, &outer.var));
        steps
    }

    /// Inline chain for generator `level` and everything inside it.
    fn nested(&mut self, level: usize) -> String {
        let ir = self.ir;
        let gen = &ir.generators[level];
        let mut out = self.source(gen, level, false);
        for filter in &gen.filters {
            out.push_str(&self.filter_step(&gen.var, filter, level));
        }
        if level + 1 < ir.generators.len() {
            let inner = self.nested(level + 1);
            out.push_str(&format!(".flat_map(move |{}| {})", gen.var, inner));
        } else if let Some(step) = self.projection_step(gen, level) {
            out.push_str(&step);
        }
        out
    }

    fn source(&mut self, gen: &Generator, level: usize, parallel: bool) -> String {
        match &gen.source {
            GeneratorSource::Range(r) => self.range_source(r, parallel),
            GeneratorSource::Expr(text) => {
                let iterable = self.printer.translate(text);
                match (parallel, level) {
                    (true, _) => format!("{}.par_iter().copied()", iterable),
                    (false, 0) => format!("{}.iter().copied()", iterable),
                    (false, _) => format!("{}.clone().into_iter()", iterable),
                }
            }
        }
    }

    fn range_source(&self, r: &Range, parallel: bool) -> String {
        let par = if parallel { ".into_par_iter()" } else { "" };
        if r.step > 0 {
            let base = format!("({}{}..{}){}", r.start, self.int_type, r.stop, par);
            if r.step == 1 {
                base
            } else {
                format!("{}.step_by({})", base, r.step)
            }
        } else {
            // Descending: walk the inclusive span backwards
            let low = r.stop.saturating_add(1);
            let base = format!("({}{}..={}){}.rev()", low, self.int_type, r.start, par);
            match r.step.unsigned_abs() {
                1 => base,
                step => format!("{}.step_by({})", base, step),
            }
        }
    }

    fn filter_step(&mut self, var: &str, filter: &str, level: usize) -> String {
        let cond = self.printer.translate(filter);
        format!(".filter({}|&{}| {})", capture(level), var, cond)
    }

    /// The `.map(..)` producing each item, if one is needed.
    fn projection_step(&mut self, gen: &Generator, level: usize) -> Option<String> {
        let single = self.ir.generators.len() == 1;
        let body = match (self.ir.kind, self.ir.reduce_kind()) {
            (ComprehensionKind::Dict, _) => {
                let key = self.printer.translate(self.ir.key_text());
                let value = self.printer.translate(self.ir.value_text());
                format!("({}, {})", key, value)
            }
            // any/all over a single generator test inside the terminal
            (_, Some(ReduceKind::Any | ReduceKind::All)) if single => return None,
            _ => {
                let element = self.ir.element_text();
                if is_identity_map(element, &gen.var) {
                    return None;
                }
                self.printer.translate(element)
            }
        };
        Some(format!(".map({}|{}| {})", capture(level), gen.var, body))
    }

    fn terminal(&mut self, single: bool, outer_var: &str) -> String {
        match self.ir.reduce_kind() {
            None => ".collect()".to_string(),
            Some(ReduceKind::Sum) => ".sum()".to_string(),
            Some(ReduceKind::Prod) => ".product()".to_string(),
            Some(ReduceKind::Max) => ".max().unwrap_or_default()".to_string(),
            Some(ReduceKind::Min) => ".min().unwrap_or_default()".to_string(),
            Some(kind @ (ReduceKind::Any | ReduceKind::All)) => {
                let method = kind.name();
                if single {
                    let test = self.printer.translate(self.ir.element_text());
                    format!(".{}(|{}| {})", method, outer_var, test)
                } else {
                    format!(".{}(|hit| hit)", method)
                }
            }
        }
    }
}

/// Closures below the outermost generator capture outer variables by copy.
fn capture(level: usize) -> &'static str {
    if level == 0 {
        ""
    } else {
        "move "
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;

    fn render(src: &str, opts: RenderOptions) -> String {
        RustRenderer.render(&parse(src).unwrap(), &opts).unwrap()
    }

    #[test]
    fn test_list_map_collect() {
        let out = render("[x**2 for x in range(5)]", RenderOptions::new());
        assert_eq!(
            out,
            "fn program() -> Vec<i32> {\n    (0i32..5)\n        .map(|x| x.pow(2))\n        .collect()\n}\n"
        );
    }

    #[test]
    fn test_filtered_sum() {
        let out = render(
            "sum(x*x for x in range(1, 100) if x % 3 == 0)",
            RenderOptions::new().func_name("total"),
        );
        assert!(out.contains("fn total() -> i32 {"));
        assert!(out.contains(".filter(|&x| x % 3 == 0)"));
        assert!(out.contains(".map(|x| x * x)"));
        assert!(out.contains(".sum()"));
    }

    #[test]
    fn test_parallel_uses_rayon() {
        let out = render(
            "max(x for x in range(10))",
            RenderOptions::new().parallel(true),
        );
        assert!(out.starts_with("use rayon::prelude::*;\n"));
        assert!(out.contains("(0i32..10).into_par_iter()"));
        assert!(out.contains(".max().unwrap_or_default()"));
        assert!(!out.contains(".map("));
    }

    #[test]
    fn test_dict_and_set_types() {
        let dict = render("{i: i*i for i in range(1, 6)}", RenderOptions::new());
        assert!(dict.starts_with("use std::collections::HashMap;\n"));
        assert!(dict.contains("-> HashMap<i32, i32>"));
        assert!(dict.contains(".map(|i| (i, i * i))"));

        let set = render("{x % 3 for x in range(9)}", RenderOptions::new().int_type("i64"));
        assert!(set.contains("-> HashSet<i64>"));
        assert!(set.contains("(0i64..9)"));
    }

    #[test]
    fn test_nested_generators_flat_map() {
        let out = render(
            "[(i, j) for i in range(3) for j in range(4) if j != 1]",
            RenderOptions::new(),
        );
        assert!(out.contains("-> Vec<(i32, i32)>"));
        assert!(out.contains(
            ".flat_map(|i| (0i32..4).filter(move |&j| j != 1).map(move |j| (i, j)))"
        ));
    }

    #[test]
    fn test_negative_step_and_any() {
        let out = render("any(x > 3 for x in range(10, 0, -2))", RenderOptions::new());
        assert!(out.contains("-> bool"));
        assert!(out.contains("(1i32..=10).rev().step_by(2)"));
        assert!(out.contains(".any(|x| x > 3)"));
    }

    #[test]
    fn test_opaque_source() {
        let out = render("[v + 1 for v in values]", RenderOptions::new());
        assert!(out.contains("values.iter().copied()"));
    }

    #[test]
    fn test_rejects_unknown_int_type() {
        let ir = parse("[x for x in range(3)]").unwrap();
        let err = RustRenderer
            .render(&ir, &RenderOptions::new().int_type("bigint"))
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidOption { .. }));
    }

    #[test]
    fn test_csharp_int_spelling_maps_to_width() {
        let out = render("[x for x in range(3)]", RenderOptions::new().int_type("long"));
        assert!(out.contains("-> Vec<i64>"));
        assert!(out.contains("(0i64..3)"));
    }

    #[test]
    fn test_negative_range_floors() {
        let out = render("[x // 2 + x % 3 for x in range(-3, 3)]", RenderOptions::new());
        assert!(out.contains(".map(|x| x.div_euclid(2) + x.rem_euclid(3))"));
    }
}
