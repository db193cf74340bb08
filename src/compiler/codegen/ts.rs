//! TypeScript back-end: array-method chains, with a Web Worker fan-out for
//! `parallel`.

use super::options::RenderOptions;
use super::syntax::{Dialect, ExprPrinter};
use super::writer::CodeWriter;
use super::{affine, is_identity_map, non_negative_vars, tuple_arity, RenderError, Renderer};
use crate::compiler::ir::{Comprehension, ComprehensionKind, Generator, GeneratorSource, Range, ReduceKind};
use log::debug;

pub struct TsRenderer;

impl Renderer for TsRenderer {
    fn name(&self) -> &'static str {
        "ts"
    }

    fn accepted_options(&self) -> &'static [&'static str] {
        &["func_name", "parallel"]
    }

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError> {
        let func_name = opts.func_name_or_default()?;
        let parallel = opts.bool_or("parallel", false)?;
        let mut emitter = TsEmitter {
            ir,
            printer: ExprPrinter::new(Dialect::Ts).with_non_negative(non_negative_vars(ir)),
        };

        let outer_range = ir.generators.first().and_then(Generator::as_range);
        match (parallel, outer_range) {
            (true, Some(range)) => Ok(emitter.emit_parallel(func_name, range)),
            (true, None) => {
                debug!("ts: opaque outer source, emitting sequential chain");
                Ok(emitter.emit_sequential(func_name, true))
            }
            (false, _) => Ok(emitter.emit_sequential(func_name, false)),
        }
    }
}

struct TsEmitter<'a> {
    ir: &'a Comprehension,
    printer: ExprPrinter,
}

impl TsEmitter<'_> {
    // ── Sequential ───────────────────────────────────────────

    fn emit_sequential(&mut self, func_name: &str, degraded: bool) -> String {
        let mut w = CodeWriter::new();
        if degraded {
            w.line("// simplified: workers cannot see caller bindings, so this runs sequentially");
        }

        let header = format!("function {}(): {} {{", func_name, self.return_type());
        let ir = self.ir;
        let source = match ir.generators.first() {
            Some(outer) => self.source(outer),
            None => "[]".to_string(),
        };
        let steps = self.pipeline(source, true);
        {
            let mut body = w.block(header, "}");
            match self.collection_wrapper() {
                Some(wrap) => {
                    write_chain(&mut body, "const items = ", steps);
                    body.line(format!("return {};", wrap("items")));
                }
                None => write_chain(&mut body, "return ", steps),
            }
        }
        w.finish()
    }

    // ── Parallel ─────────────────────────────────────────────

    /// Split the outer range's index space into one chunk per worker; each
    /// worker runs the pipeline over its chunk and the partials are merged
    /// in chunk order.
    fn emit_parallel(&mut self, func_name: &str, outer: &Range) -> String {
        let chunk_source = format!(
            "Array.from({{ length: hi - lo }}, (_, k) => {})",
            affine(outer.start, outer.step, "lo + k")
        );
        let steps = self.pipeline(chunk_source, false);

        let mut w = CodeWriter::new();
        w.line("const workerSource = `");
        {
            let mut handler = w.block("self.onmessage = (e) => {", "};");
            handler.line("const { lo, hi } = e.data;");
            write_chain(&mut handler, "const partial = ", escape_template(steps));
            handler.line("self.postMessage(partial);");
        }
        w.line("`;");
        w.blank();

        let part_type = self.part_type();
        let header = format!(
            "async function {}(): Promise<{}> {{",
            func_name,
            self.return_type()
        );
        {
            let mut body = w.block(header, "}");
            body.line(format!("const total = {};", outer.len()));
            body.line("const workers = Math.max(1, Math.min(navigator.hardwareConcurrency || 4, total));");
            body.line("const chunk = Math.ceil(total / workers);");
            body.line(
                "const url = URL.createObjectURL(new Blob([workerSource], { type: \"application/javascript\" }));",
            );
            {
                let mut all = body.block("const parts = await Promise.all(", ");");
                let mut each = all.block("Array.from({ length: workers }, (_, w) =>", ")");
                let mut promise = each.block(format!("new Promise<{}>((resolve) => {{", part_type), "})");
                promise.line("const worker = new Worker(url);");
                {
                    let mut on = promise.block("worker.onmessage = (e) => {", "};");
                    on.line("worker.terminate();");
                    on.line("resolve(e.data);");
                }
                promise.line("worker.postMessage({ lo: w * chunk, hi: Math.min(total, (w + 1) * chunk) });");
            }
            body.line("URL.revokeObjectURL(url);");
            body.line(format!("return {};", self.merge()));
        }
        w.finish()
    }

    /// Type of one worker's partial result.
    fn part_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "boolean".to_string(),
            Some(_) => "number".to_string(),
            None => format!("{}[]", self.item_type()),
        }
    }

    fn merge(&self) -> String {
        match self.ir.reduce_kind() {
            Some(ReduceKind::Sum) => "parts.reduce((acc, v) => acc + v, 0)".to_string(),
            Some(ReduceKind::Prod) => "parts.reduce((acc, v) => acc * v, 1)".to_string(),
            Some(ReduceKind::Max) => "Math.max(...parts)".to_string(),
            Some(ReduceKind::Min) => "Math.min(...parts)".to_string(),
            Some(ReduceKind::Any) => "parts.some((v) => v)".to_string(),
            Some(ReduceKind::All) => "parts.every((v) => v)".to_string(),
            None => match self.collection_wrapper() {
                Some(wrap) => wrap("parts.flat()"),
                None => "parts.flat()".to_string(),
            },
        }
    }

    // ── Pipeline ─────────────────────────────────────────────

    /// Source, filters, projection and (for reductions) the fold, one step
    /// per entry. Untyped steps carry no `as` assertions, for worker source
    /// that runs as plain JavaScript.
    fn pipeline(&mut self, outer_source: String, typed: bool) -> Vec<String> {
        let ir = self.ir;
        let Some(outer) = ir.generators.first() else {
            return vec![outer_source];
        };

        let mut steps = vec![outer_source];
        for filter in &outer.filters {
            let cond = self.printer.translate(filter);
            steps.push(format!(".filter(({}) => {})", outer.var, cond));
        }

        let single = ir.generators.len() == 1;
        if single {
            if let Some(step) = self.projection(outer, typed) {
                steps.push(step);
            }
        } else {
            let inner = self.nested(1, typed);
            steps.push(format!(".flatMap(({}) => {})", outer.var, inner));
        }

        if let Some(fold) = self.fold(single, &outer.var) {
            steps.push(fold);
        }
        steps
    }

    fn nested(&mut self, level: usize, typed: bool) -> String {
        let ir = self.ir;
        let gen = &ir.generators[level];
        let mut out = self.source(gen);
        for filter in &gen.filters {
            let cond = self.printer.translate(filter);
            out.push_str(&format!(".filter(({}) => {})", gen.var, cond));
        }
        if level + 1 < ir.generators.len() {
            let inner = self.nested(level + 1, typed);
            out.push_str(&format!(".flatMap(({}) => {})", gen.var, inner));
        } else if let Some(step) = self.projection(gen, typed) {
            out.push_str(&step);
        }
        out
    }

    fn source(&mut self, gen: &Generator) -> String {
        match &gen.source {
            GeneratorSource::Range(r) => format!(
                "Array.from({{ length: {} }}, (_, k) => {})",
                r.len(),
                affine(r.start, r.step, "k")
            ),
            GeneratorSource::Expr(text) => format!("Array.from({})", self.printer.translate(text)),
        }
    }

    fn projection(&mut self, gen: &Generator, typed: bool) -> Option<String> {
        let single = self.ir.generators.len() == 1;
        let body = match (self.ir.kind, self.ir.reduce_kind()) {
            (ComprehensionKind::Dict, _) => {
                let key = self.printer.translate(self.ir.key_text());
                let value = self.printer.translate(self.ir.value_text());
                let pair = format!("[{}, {}]", key, value);
                if typed {
                    format!("{} as {}", pair, self.item_type())
                } else {
                    pair
                }
            }
            (_, Some(ReduceKind::Any | ReduceKind::All)) if single => return None,
            _ => {
                let element = self.ir.element_text();
                if is_identity_map(element, &gen.var) {
                    return None;
                }
                let text = self.printer.translate(element);
                if typed && tuple_arity(element).is_some() {
                    format!("{} as {}", text, self.item_type())
                } else {
                    text
                }
            }
        };
        Some(format!(".map(({}) => {})", gen.var, body))
    }

    fn fold(&mut self, single: bool, outer_var: &str) -> Option<String> {
        let step = match self.ir.reduce_kind()? {
            ReduceKind::Sum => ".reduce((acc, v) => acc + v, 0)".to_string(),
            ReduceKind::Prod => ".reduce((acc, v) => acc * v, 1)".to_string(),
            ReduceKind::Max => ".reduce((acc, v) => Math.max(acc, v), -Infinity)".to_string(),
            ReduceKind::Min => ".reduce((acc, v) => Math.min(acc, v), Infinity)".to_string(),
            kind @ (ReduceKind::Any | ReduceKind::All) => {
                let method = if kind == ReduceKind::Any { "some" } else { "every" };
                if single {
                    let test = self.printer.translate(self.ir.element_text());
                    format!(".{}(({}) => {})", method, outer_var, test)
                } else {
                    format!(".{}((v) => v)", method)
                }
            }
        };
        Some(step)
    }

    // ── Types ────────────────────────────────────────────────

    fn return_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "boolean".to_string(),
            Some(_) => "number".to_string(),
            None => match self.ir.kind {
                ComprehensionKind::Set => format!("Set<{}>", type_of(self.ir.element_text())),
                ComprehensionKind::Dict => format!(
                    "Map<{}, {}>",
                    type_of(self.ir.key_text()),
                    type_of(self.ir.value_text())
                ),
                ComprehensionKind::List | ComprehensionKind::Generator => {
                    format!("{}[]", type_of(self.ir.element_text()))
                }
            },
        }
    }

    /// Type of one produced item (a `[key, value]` pair for dicts).
    fn item_type(&self) -> String {
        match self.ir.kind {
            ComprehensionKind::Dict => format!(
                "[{}, {}]",
                type_of(self.ir.key_text()),
                type_of(self.ir.value_text())
            ),
            _ => type_of(self.ir.element_text()),
        }
    }

    /// Sets and maps are built from the produced item array.
    fn collection_wrapper(&self) -> Option<impl Fn(&str) -> String> {
        if self.ir.reduce.is_some() {
            return None;
        }
        let ctor = match self.ir.kind {
            ComprehensionKind::Set => format!("new Set<{}>", type_of(self.ir.element_text())),
            ComprehensionKind::Dict => format!(
                "new Map<{}, {}>",
                type_of(self.ir.key_text()),
                type_of(self.ir.value_text())
            ),
            ComprehensionKind::List | ComprehensionKind::Generator => return None,
        };
        Some(move |items: &str| format!("{}({})", ctor, items))
    }
}

fn type_of(text: &str) -> String {
    match tuple_arity(text) {
        Some(n) => format!("[{}]", vec!["number"; n].join(", ")),
        None => "number".to_string(),
    }
}

fn write_chain(w: &mut CodeWriter, lead: &str, steps: Vec<String>) {
    let last = steps.len().saturating_sub(1);
    for (i, step) in steps.into_iter().enumerate() {
        let end = if i == last { ";" } else { "" };
        if i == 0 {
            w.line(format!("{}{}{}", lead, step, end));
        } else {
            let mut cont = w.indented();
            cont.line(format!("{}{}", step, end));
        }
    }
}

/// Keep emitted code intact inside a template literal.
fn escape_template(steps: Vec<String>) -> Vec<String> {
    steps
        .into_iter()
        .map(|s| s.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;

    fn render(src: &str, opts: RenderOptions) -> String {
        TsRenderer.render(&parse(src).unwrap(), &opts).unwrap()
    }

    #[test]
    fn test_list_chain() {
        let out = render("[x**2 for x in range(5)]", RenderOptions::new());
        assert_eq!(
            out,
            "function program(): number[] {\n    return Array.from({ length: 5 }, (_, k) => k)\n        .map((x) => x ** 2);\n}\n"
        );
    }

    #[test]
    fn test_filtered_sum() {
        let out = render(
            "sum(x*x for x in range(1, 100) if x % 3 == 0)",
            RenderOptions::new(),
        );
        assert!(out.contains("function program(): number {"));
        assert!(out.contains("Array.from({ length: 99 }, (_, k) => 1 + k)"));
        assert!(out.contains(".filter((x) => x % 3 === 0)"));
        assert!(out.contains(".reduce((acc, v) => acc + v, 0);"));
    }

    #[test]
    fn test_dict_builds_map() {
        let out = render("{i: i*i for i in range(1, 6)}", RenderOptions::new());
        assert!(out.contains("): Map<number, number> {"));
        assert!(out.contains(".map((i) => [i, i * i] as [number, number]);"));
        assert!(out.contains("return new Map<number, number>(items);"));
    }

    #[test]
    fn test_nested_flat_map() {
        let out = render("[i * j for i in range(3) for j in range(3)]", RenderOptions::new());
        assert!(out.contains(".flatMap((i) => Array.from({ length: 3 }, (_, k) => k).map((j) => i * j));"));
    }

    #[test]
    fn test_parallel_workers() {
        let out = render("max(x for x in range(100))", RenderOptions::new().parallel(true));
        assert!(out.starts_with("const workerSource = `\n"));
        assert!(out.contains("Array.from({ length: hi - lo }, (_, k) => lo + k)"));
        assert!(out.contains("async function program(): Promise<number> {"));
        assert!(out.contains("const total = 100;"));
        assert!(out.contains("return Math.max(...parts);"));
    }

    #[test]
    fn test_parallel_opaque_source_is_simplified() {
        let out = render("[v for v in values]", RenderOptions::new().parallel(true));
        assert!(out.starts_with("// simplified"));
        assert!(out.contains("return Array.from(values);"));
        assert!(!out.contains("Worker"));
    }

    #[test]
    fn test_worker_source_is_plain_javascript() {
        for src in ["{i: i*i for i in range(1, 6)}", "[(i, i + 1) for i in range(4)]"] {
            let out = render(src, RenderOptions::new().parallel(true));
            let (worker, main) = out.split_once("`;").unwrap();
            assert!(!worker.contains(" as "), "type assertion in worker for '{}'", src);
            assert!(main.contains("new Promise<"));
        }
        let dict = render("{i: i*i for i in range(1, 6)}", RenderOptions::new().parallel(true));
        assert!(dict.contains(".map((i) => [i, i * i]);"));
        assert!(dict.contains("return new Map<number, number>(parts.flat());"));
    }
}
