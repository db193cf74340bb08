//! Julia back-end, driven by the strategy engine.
//!
//! The decision picks explicit loops or broadcast expressions and, when a
//! parallel request was granted, either thread-local partials or
//! shard-then-merge. Strategy notes become `# NOTE:` comments.

use super::naming::NameGen;
use super::options::RenderOptions;
use super::syntax::{Dialect, ExprPrinter};
use super::writer::CodeWriter;
use super::{is_identity_map, non_negative_vars, tuple_arity, RenderError, Renderer};
use crate::compiler::expr::{parse_expr_text, Expr, Literal};
use crate::compiler::ir::{Comprehension, ComprehensionKind, GeneratorSource, Range, ReduceKind};
use crate::compiler::strategy::associativity::{AssocOp, Grant, NumericType};
use crate::compiler::strategy::{
    choose_strategy, Mode, ParallelFlavor, RequestedMode, StrategyRequest,
};

pub struct JuliaRenderer;

impl Renderer for JuliaRenderer {
    fn name(&self) -> &'static str {
        "julia"
    }

    fn accepted_options(&self) -> &'static [&'static str] {
        &["func_name", "parallel", "mode", "explain", "unsafe", "type_info"]
    }

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError> {
        let types = opts.type_info_or_default()?;
        let elem = julia_type(&types.element_type, "element_type")?;
        let mode = opts
            .str_or("mode", "auto")?
            .parse::<RequestedMode>()
            .map_err(|message| RenderError::InvalidOption {
                name: "mode".to_string(),
                message,
            })?;
        let unsafe_ = opts.bool_or("unsafe", false)?;
        let func_name = opts.func_name_or_default()?;
        let explain = opts.bool_or("explain", true)?;

        for text in ir.expression_texts() {
            if let Ok(expr) = parse_expr_text(text) {
                check_literals(&expr)?;
            }
        }

        let request = StrategyRequest {
            mode,
            elem_type: elem.to_string(),
            parallel_requested: opts.bool_or("parallel", false)?,
            unsafe_,
            ..StrategyRequest::for_ir(ir)
        };
        let decision = choose_strategy(ir, &request);

        let emitter = JuliaEmitter {
            ir,
            elem,
            key: julia_type(&types.key_type, "key_type")?,
            value: julia_type(&types.value_type, "value_type")?,
            unsafe_,
            scalar: ExprPrinter::new(Dialect::Julia).with_non_negative(non_negative_vars(ir)),
            dotted: ExprPrinter::new(Dialect::JuliaBroadcast)
                .with_non_negative(non_negative_vars(ir)),
            names: NameGen::new(),
        };
        Ok(emitter.emit(func_name, decision.mode, decision.flavor, decision.notes, explain))
    }
}

fn julia_type(name: &str, field: &str) -> Result<&'static str, RenderError> {
    match name {
        "int" => Ok("Int"),
        "float" => Ok("Float64"),
        "str" => Ok("String"),
        "bool" => Ok("Bool"),
        other => Err(RenderError::InvalidOption {
            name: "type_info".to_string(),
            message: format!("unknown {} '{}'", field, other),
        }),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Literals
// ═══════════════════════════════════════════════════════════════

/// Julia spelling of a scalar literal.
pub fn literal(lit: &Literal) -> Result<String, RenderError> {
    match lit {
        Literal::Int(n) => Ok(n.to_string()),
        Literal::Float(f) => Ok(format!("{:?}", f)),
        Literal::Bool(true) => Ok("true".to_string()),
        Literal::Bool(false) => Ok("false".to_string()),
        Literal::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' | '\\' | '$' => {
                        out.push('\\');
                        out.push(c);
                    }
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out.push('"');
            Ok(out)
        }
        Literal::None => Err(RenderError::UnsupportedLiteral("None".to_string())),
    }
}

/// Flat tuple or list display made only of literals.
pub fn literal_display(e: &Expr) -> Result<String, RenderError> {
    let items = |items: &[Expr]| -> Result<Vec<String>, RenderError> {
        items
            .iter()
            .map(|item| match item {
                Expr::Const(lit) => literal(lit),
                _ => Err(RenderError::UnsupportedLiteral("nested display".to_string())),
            })
            .collect()
    };
    match e {
        Expr::Const(lit) => literal(lit),
        Expr::Tuple(xs) if xs.len() == 1 => Ok(format!("({},)", items(xs)?.join(", "))),
        Expr::Tuple(xs) => Ok(format!("({})", items(xs)?.join(", "))),
        Expr::List(xs) => Ok(format!("[{}]", items(xs)?.join(", "))),
        _ => Err(RenderError::UnsupportedLiteral("expression".to_string())),
    }
}

fn is_literal_display(e: &Expr) -> bool {
    match e {
        Expr::Tuple(xs) | Expr::List(xs) => xs.iter().all(|x| matches!(x, Expr::Const(_))),
        _ => false,
    }
}

/// Reject literals Julia output cannot carry.
fn check_literals(e: &Expr) -> Result<(), RenderError> {
    match e {
        Expr::Const(lit) => literal(lit).map(drop),
        Expr::Name(_) => Ok(()),
        Expr::Unary(_, a) | Expr::Attribute(a, _) => check_literals(a),
        Expr::Binary(a, _, b)
        | Expr::BoolOp(_, a, b)
        | Expr::Compare(a, _, b)
        | Expr::Subscript(a, b) => {
            check_literals(a)?;
            check_literals(b)
        }
        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => {
            check_literals(cond)?;
            check_literals(then)?;
            check_literals(otherwise)
        }
        Expr::Call(f, args) => {
            check_literals(f)?;
            args.iter().try_for_each(check_literals)
        }
        display if is_literal_display(display) => literal_display(display).map(drop),
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check_literals),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Emitter
// ═══════════════════════════════════════════════════════════════

struct Loop {
    header: String,
    filters: Vec<String>,
}

enum Leaf {
    Stmt(String),
    ExitIf { cond: String, body: String },
}

struct JuliaEmitter<'a> {
    ir: &'a Comprehension,
    elem: &'static str,
    key: &'static str,
    value: &'static str,
    unsafe_: bool,
    scalar: ExprPrinter,
    dotted: ExprPrinter,
    names: NameGen,
}

impl JuliaEmitter<'_> {
    fn emit(
        mut self,
        func_name: &str,
        mut mode: Mode,
        flavor: ParallelFlavor,
        mut notes: Vec<String>,
        explain: bool,
    ) -> String {
        if mode == Mode::Broadcast && self.ir.is_nested() {
            notes.push("broadcast mode needs a single generator; using loops".to_string());
            mode = Mode::Loops;
        }

        let mut fw = CodeWriter::new();
        {
            let header = format!("function {}()::{}", func_name, self.return_type());
            let mut f = fw.block(header, "end");
            match (mode, flavor) {
                (Mode::Broadcast, _) => self.emit_broadcast(&mut f),
                (Mode::Loops, ParallelFlavor::Sequential) => self.emit_loops(&mut f),
                (Mode::Loops, ParallelFlavor::ThreadLocalPartials(grant)) => {
                    self.emit_partials(&mut f, grant)
                }
                (Mode::Loops, ParallelFlavor::Sharded) => self.emit_sharded(&mut f),
            }
        }

        let mut w = CodeWriter::new();
        if flavor.is_parallel() {
            w.line("using Base.Threads");
            w.blank();
        }
        if explain {
            for note in &notes {
                w.line(format!("# NOTE: {}", note));
            }
        }
        w.lines(fw.finish().lines());
        w.finish()
    }

    // ── Types ────────────────────────────────────────────────

    fn return_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "Bool".to_string(),
            Some(_) => self.elem.to_string(),
            None => match self.ir.kind {
                ComprehensionKind::Set => format!("Set{{{}}}", self.item_type()),
                ComprehensionKind::Dict => self.dict_type(),
                ComprehensionKind::List | ComprehensionKind::Generator => {
                    format!("Vector{{{}}}", self.item_type())
                }
            },
        }
    }

    fn item_type(&self) -> String {
        tuple_type(self.ir.element_text(), self.elem)
    }

    fn dict_type(&self) -> String {
        format!(
            "Dict{{{}, {}}}",
            tuple_type(self.ir.key_text(), self.key),
            tuple_type(self.ir.value_text(), self.value)
        )
    }

    fn numeric(&self) -> NumericType {
        self.elem.parse().unwrap_or(NumericType::Int)
    }

    // ── Loops ────────────────────────────────────────────────

    fn emit_loops(&mut self, w: &mut CodeWriter) {
        let ir = self.ir;
        match (ir.kind, ir.reduce_kind()) {
            (_, Some(kind)) if kind.is_boolean() => {}
            (_, Some(kind)) => {
                let identity = AssocOp::from_name(kind.name())
                    .map_or("0", |op| op.identity().julia_literal(self.numeric()));
                w.line(format!("acc = {}", identity));
            }
            (ComprehensionKind::Set, None) => w.line(format!("result = Set{{{}}}()", self.item_type())),
            (ComprehensionKind::Dict, None) => w.line(format!("result = {}()", self.dict_type())),
            (_, None) => w.line(format!("result = {}[]", self.item_type())),
        }

        let mut loops = self.loops();
        if self.unsafe_ {
            let simd = ir.generators.len() == 1
                && !ir.has_filters()
                && matches!(ir.reduce_kind(), Some(ReduceKind::Sum | ReduceKind::Prod));
            if let Some(outer) = loops.first_mut() {
                let prefix = if simd { "@inbounds @simd " } else { "@inbounds " };
                outer.header.insert_str(0, prefix);
            }
        }

        let leaf = match ir.reduce_kind() {
            Some(ReduceKind::Any) => Leaf::ExitIf {
                cond: self.scalar.translate(ir.element_text()),
                body: "return true".to_string(),
            },
            Some(ReduceKind::All) => Leaf::ExitIf {
                cond: format!("!({})", self.scalar.translate(ir.element_text())),
                body: "return false".to_string(),
            },
            Some(kind) => {
                let e = self.scalar.translate(ir.element_text());
                Leaf::Stmt(fold(kind, "acc", &e))
            }
            None => self.collect_leaf("result"),
        };
        emit_nest(w, &loops, &leaf);

        w.line(match ir.reduce_kind() {
            Some(ReduceKind::Any) => "return false",
            Some(ReduceKind::All) => "return true",
            Some(_) => "return acc",
            None => "return result",
        });
    }

    /// Each thread folds into its own slot; slots start at the identity.
    fn emit_partials(&mut self, w: &mut CodeWriter, grant: Grant) {
        let ir = self.ir;
        let parts = self.names.fresh("parts");
        w.line(format!("{} = fill({}, nthreads())", parts, grant.identity_literal()));

        let mut loops = self.loops();
        if let Some(outer) = loops.first_mut() {
            outer.header.insert_str(0, "@threads :static ");
        }
        let slot = format!("{}[threadid()]", parts);
        let e = self.scalar.translate(ir.element_text());
        let leaf = match ir.reduce_kind() {
            Some(kind) => Leaf::Stmt(fold(kind, &slot, &e)),
            None => Leaf::Stmt(format!("{} = {}", slot, grant.op.julia_combine(&slot, &e))),
        };
        emit_nest(w, &loops, &leaf);
        w.line(format!("return reduce({}, {})", grant.op.julia_reducer(), parts));
    }

    /// Per-thread dictionaries merged in thread order.
    fn emit_sharded(&mut self, w: &mut CodeWriter) {
        let shards = self.names.fresh("shards");
        let dict = self.dict_type();
        w.line(format!("{} = [{}() for _ in 1:nthreads()]", shards, dict));

        let mut loops = self.loops();
        if let Some(outer) = loops.first_mut() {
            outer.header.insert_str(0, "@threads :static ");
        }
        let leaf = self.collect_leaf(&format!("{}[threadid()]", shards));
        emit_nest(w, &loops, &leaf);

        w.line(format!("result = {}()", dict));
        {
            let mut each = w.block(format!("for shard in {}", shards), "end");
            each.line("merge!(result, shard)");
        }
        w.line("return result");
    }

    fn loops(&mut self) -> Vec<Loop> {
        let ir = self.ir;
        ir.generators
            .iter()
            .map(|gen| {
                let source = match &gen.source {
                    GeneratorSource::Range(r) => julia_range(r),
                    GeneratorSource::Expr(text) => self.scalar.translate(text),
                };
                Loop {
                    header: format!("for {} in {}", gen.var, source),
                    filters: gen.filters.iter().map(|f| self.scalar.translate(f)).collect(),
                }
            })
            .collect()
    }

    /// Insert one produced item into the collection named `target`.
    fn collect_leaf(&mut self, target: &str) -> Leaf {
        let ir = self.ir;
        if ir.kind == ComprehensionKind::Dict {
            let k = self.scalar.translate(ir.key_text());
            let v = self.scalar.translate(ir.value_text());
            Leaf::Stmt(format!("{}[{}] = {}", target, k, v))
        } else {
            let e = self.scalar.translate(ir.element_text());
            Leaf::Stmt(format!("push!({}, {})", target, e))
        }
    }

    // ── Broadcast ────────────────────────────────────────────

    fn emit_broadcast(&mut self, w: &mut CodeWriter) {
        let ir = self.ir;
        let Some(gen) = ir.generators.first() else {
            w.line(format!("return {}()", self.return_type()));
            return;
        };
        let var = gen.var.as_str();
        let source = match &gen.source {
            GeneratorSource::Range(r) => julia_range(r),
            GeneratorSource::Expr(text) => self.scalar.translate(text),
        };
        w.line(format!("{} = {}", var, source));

        for filter in &gen.filters {
            let mask = self.names.fresh("mask");
            let test = self.vectorized(filter, var);
            w.line(format!("{} = {}", mask, test));
            w.line(format!("{0} = {0}[{1}]", var, mask));
        }

        let result = match (ir.kind, ir.reduce_kind()) {
            (_, Some(kind)) => {
                let v = self.vectorized(ir.element_text(), var);
                match kind {
                    ReduceKind::Sum => format!("sum({})", v),
                    ReduceKind::Prod => format!("prod({})", v),
                    ReduceKind::Max | ReduceKind::Min => {
                        let (func, op) = if kind == ReduceKind::Max {
                            ("maximum", AssocOp::Max)
                        } else {
                            ("minimum", AssocOp::Min)
                        };
                        let init = op.identity().julia_literal(self.numeric());
                        format!("{}({}; init = {})", func, v, init)
                    }
                    ReduceKind::Any => format!("any({})", v),
                    ReduceKind::All => format!("all({})", v),
                }
            }
            (ComprehensionKind::Dict, None) => {
                let k = self.vectorized(ir.key_text(), var);
                let v = self.vectorized(ir.value_text(), var);
                format!("Dict(zip({}, {}))", k, v)
            }
            (ComprehensionKind::Set, None) => {
                format!("Set({})", self.vectorized(ir.element_text(), var))
            }
            (_, None) if is_identity_map(ir.element_text(), var) => format!("collect({})", var),
            (_, None) => self.vectorized(ir.element_text(), var),
        };
        w.line(format!("return {}", result));
    }

    /// Element-wise form of `text` over the collection bound to `var`.
    fn vectorized(&mut self, text: &str, var: &str) -> String {
        match parse_expr_text(text) {
            Ok(Expr::Tuple(items)) => {
                let parts: Vec<String> = items.iter().map(|i| self.vectorized_expr(i, var)).collect();
                format!("tuple.({})", parts.join(", "))
            }
            Ok(expr) => self.vectorized_expr(&expr, var),
            Err(_) => self.dotted.translate(text),
        }
    }

    fn vectorized_expr(&mut self, e: &Expr, var: &str) -> String {
        if e.mentions(var) {
            self.dotted.print(e)
        } else {
            format!("fill({}, length({}))", self.scalar.print(e), var)
        }
    }
}

/// Inclusive Julia range for a half-open one; empty ranges stay empty.
fn julia_range(r: &Range) -> String {
    match (r.step, r.last()) {
        (1, Some(last)) => format!("{}:{}", r.start, last),
        (step, Some(last)) => format!("{}:{}:{}", r.start, step, last),
        (1, None) => format!("{}:{}", r.start, r.start - 1),
        (step, None) => format!("{}:{}:{}", r.start, step, r.start - step),
    }
}

fn tuple_type(text: &str, scalar: &str) -> String {
    match tuple_arity(text) {
        Some(n) => format!("Tuple{{{}}}", vec![scalar; n].join(", ")),
        None => scalar.to_string(),
    }
}

fn fold(kind: ReduceKind, target: &str, value: &str) -> String {
    match kind {
        ReduceKind::Sum => format!("{} += {}", target, value),
        ReduceKind::Prod => format!("{} *= {}", target, value),
        ReduceKind::Max => format!("{} = max({}, {})", target, target, value),
        ReduceKind::Min => format!("{} = min({}, {})", target, target, value),
        ReduceKind::Any => format!("{} = {} || {}", target, target, value),
        ReduceKind::All => format!("{} = {} && {}", target, target, value),
    }
}

fn emit_nest(w: &mut CodeWriter, loops: &[Loop], leaf: &Leaf) {
    let Some((head, rest)) = loops.split_first() else {
        match leaf {
            Leaf::Stmt(s) => w.line(s),
            Leaf::ExitIf { cond, body } => {
                let mut exit = w.block(format!("if {}", cond), "end");
                exit.line(body);
            }
        }
        return;
    };
    let mut body = w.block(&head.header, "end");
    for filter in &head.filters {
        let mut skip = body.block(format!("if !({})", filter), "end");
        skip.line("continue");
    }
    emit_nest(&mut body, rest, leaf);
}
