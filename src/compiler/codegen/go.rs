//! Go back-end: explicit loops; `parallel` splits the outer generator across
//! a goroutine pool and merges per-worker partials in chunk order.

use super::options::RenderOptions;
use super::syntax::{Dialect, ExprPrinter};
use super::writer::CodeWriter;
use super::{affine, non_negative_vars, tuple_arity, RenderError, Renderer};
use crate::compiler::expr::parse_expr_text;
use crate::compiler::ir::{Comprehension, ComprehensionKind, GeneratorSource, ReduceKind};
use std::collections::BTreeSet;

pub struct GoRenderer;

impl Renderer for GoRenderer {
    fn name(&self) -> &'static str {
        "go"
    }

    fn accepted_options(&self) -> &'static [&'static str] {
        &["func_name", "parallel", "type_info"]
    }

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError> {
        let types = opts.type_info_or_default()?;
        let mut emitter = GoEmitter {
            ir,
            elem: go_type(&types.element_type, "element_type")?,
            key: go_type(&types.key_type, "key_type")?,
            value: go_type(&types.value_type, "value_type")?,
            printer: ExprPrinter::new(Dialect::Go).with_non_negative(non_negative_vars(ir)),
            imports: BTreeSet::new(),
        };
        Ok(emitter.emit(opts.func_name_or_default()?, opts.bool_or("parallel", false)?))
    }
}

fn go_type(name: &str, field: &str) -> Result<&'static str, RenderError> {
    match name {
        "int" => Ok("int"),
        "float" => Ok("float64"),
        "str" => Ok("string"),
        "bool" => Ok("bool"),
        other => Err(RenderError::InvalidOption {
            name: "type_info".to_string(),
            message: format!("unknown {} '{}'", field, other),
        }),
    }
}

/// One `for` level: header, optional binding line, then filters.
struct Loop {
    header: String,
    binding: Option<String>,
    filters: Vec<String>,
}

/// Statement executed once per produced item.
enum Leaf {
    Stmt(String),
    ExitIf { cond: String, body: Vec<String> },
}

struct GoEmitter<'a> {
    ir: &'a Comprehension,
    elem: &'static str,
    key: &'static str,
    value: &'static str,
    printer: ExprPrinter,
    imports: BTreeSet<&'static str>,
}

impl GoEmitter<'_> {
    fn emit(&mut self, func_name: &str, parallel: bool) -> String {
        let mut fw = CodeWriter::with_unit("\t");
        {
            let header = format!("func {}() {} {{", func_name, self.return_type());
            let mut f = fw.block(header, "}");
            if parallel {
                self.emit_parallel(&mut f);
            } else {
                self.emit_sequential(&mut f);
            }
        }
        let func = fw.finish();

        let mut imports = self.imports.clone();
        imports.extend(self.printer.imports().iter().copied());

        let mut w = CodeWriter::with_unit("\t");
        w.line("package main");
        w.blank();
        match imports.len() {
            0 => {}
            1 => {
                for pkg in &imports {
                    w.line(format!("import \"{}\"", pkg));
                }
                w.blank();
            }
            _ => {
                {
                    let mut block = w.block("import (", ")");
                    for pkg in &imports {
                        block.line(format!("\"{}\"", pkg));
                    }
                }
                w.blank();
            }
        }
        w.lines(func.lines());
        w.finish()
    }

    // ── Sequential ───────────────────────────────────────────

    fn emit_sequential(&mut self, w: &mut CodeWriter) {
        if let Some(init) = self.init() {
            w.line(init);
        }
        let loops = self.loops(None);
        let leaf = self.leaf(None);
        emit_nest(w, &loops, &leaf);
        w.line(match self.ir.reduce_kind() {
            Some(ReduceKind::Any) => "return false",
            Some(ReduceKind::All) => "return true",
            Some(_) => "return acc",
            None => "return result",
        });
    }

    // ── Parallel ─────────────────────────────────────────────

    fn emit_parallel(&mut self, w: &mut CodeWriter) {
        self.imports.insert("runtime");
        self.imports.insert("sync");

        let ir = self.ir;
        let count = match ir.generators.first().map(|g| &g.source) {
            Some(GeneratorSource::Range(r)) => r.len().to_string(),
            Some(GeneratorSource::Expr(text)) => format!("len({})", self.printer.translate(text)),
            None => "0".to_string(),
        };
        w.line(format!("n := {}", count));
        w.line("workers := runtime.NumCPU()");
        w.line("chunk := (n + workers - 1) / workers");
        w.line(format!("partials := make([]{}, workers)", self.part_type()));
        w.line("var wg sync.WaitGroup");
        {
            let mut spawn = w.block("for worker := 0; worker < workers; worker++ {", "}");
            spawn.line("wg.Add(1)");
            let mut task = spawn.block("go func(worker int) {", "}(worker)");
            task.line("defer wg.Done()");
            if let Some(init) = self.init() {
                task.line(init);
            }
            let loops = self.loops(Some("idx"));
            let leaf = self.leaf(Some("partials[worker]"));
            emit_nest(&mut task, &loops, &leaf);
            match self.ir.reduce_kind() {
                Some(ReduceKind::Any) => {}
                Some(ReduceKind::All) => task.line("partials[worker] = true"),
                Some(_) => task.line("partials[worker] = acc"),
                None => task.line("partials[worker] = result"),
            }
        }
        w.line("wg.Wait()");
        self.emit_merge(w);
    }

    fn emit_merge(&mut self, w: &mut CodeWriter) {
        match self.ir.reduce_kind() {
            Some(kind @ (ReduceKind::Any | ReduceKind::All)) => {
                let (test, hit, miss) = if kind == ReduceKind::Any {
                    ("part", "true", "false")
                } else {
                    ("!part", "false", "true")
                };
                {
                    let mut each = w.block("for _, part := range partials {", "}");
                    let mut exit = each.block(format!("if {} {{", test), "}");
                    exit.line(format!("return {}", hit));
                }
                w.line(format!("return {}", miss));
            }
            Some(kind) => {
                w.line(format!("acc := {}", self.identity(kind)));
                {
                    let mut each = w.block("for _, part := range partials {", "}");
                    each.line(combine(kind, "part"));
                }
                w.line("return acc");
            }
            None => {
                if let Some(init) = self.init() {
                    w.line(init);
                }
                {
                    let mut each = w.block("for _, part := range partials {", "}");
                    match self.ir.kind {
                        ComprehensionKind::Set => {
                            let mut keys = each.block("for k := range part {", "}");
                            keys.line("result[k] = struct{}{}");
                        }
                        ComprehensionKind::Dict => {
                            let mut pairs = each.block("for k, v := range part {", "}");
                            pairs.line("result[k] = v");
                        }
                        ComprehensionKind::List | ComprehensionKind::Generator => {
                            each.line("result = append(result, part...)");
                        }
                    }
                }
                w.line("return result");
            }
        }
    }

    // ── Pieces ───────────────────────────────────────────────

    /// Loop nest. With `split_index`, the outer loop walks this worker's
    /// chunk of indices and binds the generator variable from it.
    fn loops(&mut self, split_index: Option<&str>) -> Vec<Loop> {
        let ir = self.ir;
        let mut out = Vec::with_capacity(ir.generators.len());
        for (level, gen) in ir.generators.iter().enumerate() {
            let used = self.mentioned(&gen.var);
            let var = &gen.var;
            let (header, binding) = match (split_index.filter(|_| level == 0), &gen.source) {
                (Some(idx), source) => {
                    let header = format!(
                        "for {0} := worker * chunk; {0} < min((worker+1)*chunk, n); {0}++ {{",
                        idx
                    );
                    let value = match source {
                        GeneratorSource::Range(r) => affine(r.start, r.step, idx),
                        GeneratorSource::Expr(text) => {
                            format!("{}[{}]", self.printer.translate(text), idx)
                        }
                    };
                    (header, used.then(|| format!("{} := {}", var, value)))
                }
                (None, GeneratorSource::Range(r)) => {
                    let header = match r.step {
                        1 => format!("for {0} := {1}; {0} < {2}; {0}++ {{", var, r.start, r.stop),
                        -1 => format!("for {0} := {1}; {0} > {2}; {0}-- {{", var, r.start, r.stop),
                        s if s > 0 => format!(
                            "for {0} := {1}; {0} < {2}; {0} += {3} {{",
                            var, r.start, r.stop, s
                        ),
                        s => format!(
                            "for {0} := {1}; {0} > {2}; {0} -= {3} {{",
                            var,
                            r.start,
                            r.stop,
                            s.unsigned_abs()
                        ),
                    };
                    (header, None)
                }
                (None, GeneratorSource::Expr(text)) => {
                    let iterable = self.printer.translate(text);
                    let header = if used {
                        format!("for _, {} := range {} {{", var, iterable)
                    } else {
                        format!("for range {} {{", iterable)
                    };
                    (header, None)
                }
            };
            let filters = gen
                .filters
                .iter()
                .map(|f| self.printer.translate(f))
                .collect();
            out.push(Loop {
                header,
                binding,
                filters,
            });
        }
        out
    }

    /// Per-item statement. `flag` is the slot any/all write before leaving
    /// a worker; sequential code returns directly.
    fn leaf(&mut self, flag: Option<&str>) -> Leaf {
        let ir = self.ir;
        let e = self.printer.translate(ir.element_text());
        match (ir.kind, ir.reduce_kind()) {
            (_, Some(kind @ (ReduceKind::Any | ReduceKind::All))) => {
                let (cond, hit) = if kind == ReduceKind::Any {
                    (e, "true")
                } else {
                    (format!("!({})", e), "false")
                };
                let body = match flag {
                    Some(slot) => vec![format!("{} = {}", slot, hit), "return".to_string()],
                    None => vec![format!("return {}", hit)],
                };
                Leaf::ExitIf { cond, body }
            }
            (_, Some(kind)) => Leaf::Stmt(combine(kind, &e)),
            (ComprehensionKind::Dict, None) => {
                let k = self.printer.translate(ir.key_text());
                let v = self.printer.translate(ir.value_text());
                Leaf::Stmt(format!("result[{}] = {}", k, v))
            }
            (ComprehensionKind::Set, None) => Leaf::Stmt(format!("result[{}] = struct{{}}{{}}", e)),
            (_, None) => Leaf::Stmt(format!("result = append(result, {})", e)),
        }
    }

    fn init(&mut self) -> Option<String> {
        let ir = self.ir;
        match ir.reduce_kind() {
            Some(ReduceKind::Any | ReduceKind::All) => None,
            Some(kind) => Some(format!("acc := {}", self.identity(kind))),
            None => Some(match ir.kind {
                ComprehensionKind::Set => format!("result := make(map[{}]struct{{}})", self.item_type()),
                ComprehensionKind::Dict => format!("result := make({})", self.return_type()),
                ComprehensionKind::List | ComprehensionKind::Generator => {
                    format!("result := make([]{}, 0)", self.item_type())
                }
            }),
        }
    }

    fn identity(&mut self, kind: ReduceKind) -> &'static str {
        let float = self.elem == "float64";
        match kind {
            ReduceKind::Sum if float => "0.0",
            ReduceKind::Prod if float => "1.0",
            ReduceKind::Sum | ReduceKind::Any | ReduceKind::All => "0",
            ReduceKind::Prod => "1",
            ReduceKind::Max | ReduceKind::Min => {
                self.imports.insert("math");
                match (kind, float) {
                    (ReduceKind::Max, true) => "math.Inf(-1)",
                    (ReduceKind::Min, true) => "math.Inf(1)",
                    (ReduceKind::Max, false) => "math.MinInt",
                    _ => "math.MaxInt",
                }
            }
        }
    }

    // ── Types ────────────────────────────────────────────────

    fn return_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "bool".to_string(),
            Some(_) => self.elem.to_string(),
            None => match self.ir.kind {
                ComprehensionKind::Set => format!("map[{}]struct{{}}", self.item_type()),
                ComprehensionKind::Dict => format!(
                    "map[{}]{}",
                    scalar_or_array(self.ir.key_text(), self.key),
                    scalar_or_array(self.ir.value_text(), self.value)
                ),
                ComprehensionKind::List | ComprehensionKind::Generator => {
                    format!("[]{}", self.item_type())
                }
            },
        }
    }

    fn item_type(&self) -> String {
        scalar_or_array(self.ir.element_text(), self.elem)
    }

    /// Type of one worker's partial.
    fn part_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "bool".to_string(),
            Some(_) => self.elem.to_string(),
            None => self.return_type(),
        }
    }

    /// Whether `var` is referenced by any expression; unparseable text
    /// counts as a reference.
    fn mentioned(&self, var: &str) -> bool {
        let ir = self.ir;
        let sources = ir.generators.iter().filter_map(|g| match &g.source {
            GeneratorSource::Expr(text) => Some(text.as_str()),
            GeneratorSource::Range(_) => None,
        });
        ir.expression_texts()
            .into_iter()
            .chain(sources)
            .any(|text| parse_expr_text(text).map_or(true, |e| e.mentions(var)))
    }
}

fn scalar_or_array(text: &str, scalar: &str) -> String {
    match tuple_arity(text) {
        Some(n) => format!("[{}]int", n),
        None => scalar.to_string(),
    }
}

fn combine(kind: ReduceKind, value: &str) -> String {
    match kind {
        ReduceKind::Sum => format!("acc += {}", value),
        ReduceKind::Prod => format!("acc *= {}", value),
        ReduceKind::Max => format!("acc = max(acc, {})", value),
        ReduceKind::Min => format!("acc = min(acc, {})", value),
        ReduceKind::Any => format!("acc = acc || {}", value),
        ReduceKind::All => format!("acc = acc && {}", value),
    }
}

fn emit_nest(w: &mut CodeWriter, loops: &[Loop], leaf: &Leaf) {
    let Some((head, rest)) = loops.split_first() else {
        match leaf {
            Leaf::Stmt(s) => w.line(s),
            Leaf::ExitIf { cond, body } => {
                let mut exit = w.block(format!("if {} {{", cond), "}");
                exit.lines(body);
            }
        }
        return;
    };
    let mut body = w.block(&head.header, "}");
    if let Some(binding) = &head.binding {
        body.line(binding);
    }
    for filter in &head.filters {
        let mut skip = body.block(format!("if !({}) {{", filter), "}");
        skip.line("continue");
    }
    emit_nest(&mut body, rest, leaf);
}
