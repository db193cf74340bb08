//! C# back-end: LINQ query chains, PLINQ for `parallel`.

use super::options::{IntSpelling, RenderOptions};
use super::syntax::{Dialect, ExprPrinter};
use super::writer::CodeWriter;
use super::{affine, is_identity_map, non_negative_vars, tuple_arity, RenderError, Renderer};
use crate::compiler::ir::{Comprehension, ComprehensionKind, Generator, GeneratorSource, ReduceKind, TypeInfo};

pub struct CSharpRenderer;

impl Renderer for CSharpRenderer {
    fn name(&self) -> &'static str {
        "csharp"
    }

    fn accepted_options(&self) -> &'static [&'static str] {
        &["func_name", "parallel", "int_type", "type_info"]
    }

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError> {
        let int_type = opts.int_type_or_default(IntSpelling::CSharp)?;
        let types = opts.type_info_or_default()?;
        let mut emitter = LinqEmitter {
            ir,
            int_type,
            types: ResolvedTypes::resolve(&types, int_type)?,
            parallel: opts.bool_or("parallel", false)?,
            printer: ExprPrinter::new(Dialect::CSharp)
                .with_int_type(int_type)
                .with_non_negative(non_negative_vars(ir)),
        };
        Ok(emitter.emit(opts.func_name_or_default()?))
    }
}

/// TypeInfo names mapped to C# primitives.
struct ResolvedTypes {
    element: String,
    key: String,
    value: String,
}

impl ResolvedTypes {
    fn resolve(info: &TypeInfo, int_type: &str) -> Result<Self, RenderError> {
        Ok(Self {
            element: primitive(&info.element_type, int_type)?,
            key: primitive(&info.key_type, int_type)?,
            value: primitive(&info.value_type, int_type)?,
        })
    }
}

fn primitive(name: &str, int_type: &str) -> Result<String, RenderError> {
    let ty = match name {
        "int" => int_type,
        "float" => "double",
        "str" => "string",
        "bool" => "bool",
        other => {
            return Err(RenderError::InvalidOption {
                name: "type_info".to_string(),
                message: format!("unknown type '{}'; expected int, float, str or bool", other),
            })
        }
    };
    Ok(ty.to_string())
}

struct LinqEmitter<'a> {
    ir: &'a Comprehension,
    int_type: &'a str,
    types: ResolvedTypes,
    parallel: bool,
    printer: ExprPrinter,
}

impl LinqEmitter<'_> {
    fn emit(&mut self, func_name: &str) -> String {
        let mut w = CodeWriter::new();
        w.line("using System;");
        w.line("using System.Collections.Generic;");
        w.line("using System.Linq;");
        w.blank();

        let steps = self.query();
        w.line(format!("public static class {}", pascal_case(func_name)));
        {
            let mut class = w.block("{", "}");
            class.line(format!("public static {} Execute()", self.return_type()));
            let mut body = class.block("{", "}");
            let last = steps.len().saturating_sub(1);
            for (i, step) in steps.into_iter().enumerate() {
                let end = if i == last { ";" } else { "" };
                if i == 0 {
                    body.line(format!("return {}{}", step, end));
                } else {
                    let mut cont = body.indented();
                    cont.line(format!("{}{}", step, end));
                }
            }
        }
        w.finish()
    }

    // ── Types ────────────────────────────────────────────────

    fn return_type(&self) -> String {
        match self.ir.reduce_kind() {
            Some(kind) if kind.is_boolean() => "bool".to_string(),
            Some(_) => self.types.element.clone(),
            None => match self.ir.kind {
                ComprehensionKind::Dict => format!(
                    "Dictionary<{}, {}>",
                    self.type_of(self.ir.key_text(), &self.types.key),
                    self.type_of(self.ir.value_text(), &self.types.value)
                ),
                ComprehensionKind::Set => {
                    format!("HashSet<{}>", self.type_of(self.ir.element_text(), &self.types.element))
                }
                ComprehensionKind::List | ComprehensionKind::Generator => {
                    format!("List<{}>", self.type_of(self.ir.element_text(), &self.types.element))
                }
            },
        }
    }

    fn type_of(&self, text: &str, scalar: &str) -> String {
        match tuple_arity(text) {
            Some(n) if n > 1 => format!("({})", vec![self.int_type; n].join(", ")),
            _ => scalar.to_string(),
        }
    }

    // ── Query ────────────────────────────────────────────────

    fn query(&mut self) -> Vec<String> {
        let ir = self.ir;
        let Some(outer) = ir.generators.first() else {
            return vec![format!("new {}()", self.return_type())];
        };

        let mut steps = vec![self.source(outer)];
        if self.parallel {
            steps.push(".AsParallel()".to_string());
            if matches!(
                ir.kind,
                ComprehensionKind::List | ComprehensionKind::Generator | ComprehensionKind::Dict
            ) && ir.reduce.is_none()
            {
                steps.push(".AsOrdered()".to_string());
            }
        }
        for filter in &outer.filters {
            let cond = self.printer.translate(filter);
            steps.push(format!(".Where({} => {})", outer.var, cond));
        }

        let single = ir.generators.len() == 1;
        if single {
            steps.extend(self.single_tail(outer));
        } else {
            let inner = self.nested(1);
            steps.push(format!(".SelectMany({} => {})", outer.var, inner));
            steps.extend(self.nested_terminal());
        }
        steps
    }

    fn nested(&mut self, level: usize) -> String {
        let ir = self.ir;
        let gen = &ir.generators[level];
        let mut out = self.source(gen);
        for filter in &gen.filters {
            let cond = self.printer.translate(filter);
            out.push_str(&format!(".Where({} => {})", gen.var, cond));
        }
        if level + 1 < ir.generators.len() {
            let inner = self.nested(level + 1);
            out.push_str(&format!(".SelectMany({} => {})", gen.var, inner));
        } else {
            let item = match ir.kind {
                ComprehensionKind::Dict => {
                    let key = self.printer.translate(ir.key_text());
                    let value = self.printer.translate(ir.value_text());
                    format!("({}, {})", key, value)
                }
                _ => self.printer.translate(ir.element_text()),
            };
            if !is_identity_map(&item, &gen.var) {
                out.push_str(&format!(".Select({} => {})", gen.var, item));
            }
        }
        out
    }

    fn source(&mut self, gen: &Generator) -> String {
        match &gen.source {
            GeneratorSource::Range(r) => {
                let mut src = if r.step == 1 {
                    format!("Enumerable.Range({}, {})", r.start, r.len())
                } else {
                    format!(
                        "Enumerable.Range(0, {}).Select(k => {})",
                        r.len(),
                        affine(r.start, r.step, "k")
                    )
                };
                if self.int_type != "int" {
                    src.push_str(&format!(".Select(k => ({})k)", self.int_type));
                }
                src
            }
            GeneratorSource::Expr(text) => self.printer.translate(text),
        }
    }

    /// Projection and terminal for a single generator; reductions take the
    /// element as a selector.
    fn single_tail(&mut self, gen: &Generator) -> Vec<String> {
        let ir = self.ir;
        let var = &gen.var;
        let element = ir.element_text();
        let identity = is_identity_map(element, var);
        let expr = self.printer.translate(element);
        let selector = |method: &str| {
            if identity {
                format!(".{}()", method)
            } else {
                format!(".{}({} => {})", method, var, expr)
            }
        };

        match (ir.kind, ir.reduce_kind()) {
            (_, Some(ReduceKind::Sum)) => vec![selector("Sum")],
            (_, Some(ReduceKind::Max)) => vec![selector("Max")],
            (_, Some(ReduceKind::Min)) => vec![selector("Min")],
            (_, Some(ReduceKind::Prod)) => vec![format!(
                ".Aggregate({}, (acc, {}) => acc * ({}))",
                self.one(),
                var,
                expr
            )],
            (_, Some(ReduceKind::Any)) => vec![format!(".Any({} => {})", var, expr)],
            (_, Some(ReduceKind::All)) => vec![format!(".All({} => {})", var, expr)],
            (ComprehensionKind::Dict, None) => {
                let key = self.printer.translate(ir.key_text());
                let value = self.printer.translate(ir.value_text());
                vec![
                    format!(".GroupBy({0} => {1}, {0} => {2})", var, key, value),
                    LAST_WINS.to_string(),
                ]
            }
            (kind, None) => {
                let mut steps = Vec::new();
                if !identity {
                    steps.push(format!(".Select({} => {})", var, expr));
                }
                steps.push(collect(kind).to_string());
                steps
            }
        }
    }

    /// Terminal after a `SelectMany` that already produced each item.
    fn nested_terminal(&self) -> Vec<String> {
        let step = match (self.ir.kind, self.ir.reduce_kind()) {
            (_, Some(ReduceKind::Sum)) => ".Sum()".to_string(),
            (_, Some(ReduceKind::Max)) => ".Max()".to_string(),
            (_, Some(ReduceKind::Min)) => ".Min()".to_string(),
            (_, Some(ReduceKind::Prod)) => {
                format!(".Aggregate({}, (acc, v) => acc * v)", self.one())
            }
            (_, Some(ReduceKind::Any)) => ".Any(v => v)".to_string(),
            (_, Some(ReduceKind::All)) => ".All(v => v)".to_string(),
            (ComprehensionKind::Dict, None) => {
                return vec![
                    ".GroupBy(p => p.Item1, p => p.Item2)".to_string(),
                    LAST_WINS.to_string(),
                ];
            }
            (kind, None) => collect(kind).to_string(),
        };
        vec![step]
    }

    fn one(&self) -> &'static str {
        match self.types.element.as_str() {
            "long" => "1L",
            "double" => "1.0",
            _ => "1",
        }
    }
}

/// A repeated key keeps its last value.
const LAST_WINS: &str = ".ToDictionary(g => g.Key, g => g.Last())";

fn collect(kind: ComprehensionKind) -> &'static str {
    match kind {
        ComprehensionKind::Set => ".ToHashSet()",
        ComprehensionKind::Dict | ComprehensionKind::List | ComprehensionKind::Generator => {
            ".ToList()"
        }
    }
}

/// Class name for `func_name`; all-underscore names become `Program`.
fn pascal_case(name: &str) -> String {
    let class: String = name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    if class.is_empty() {
        "Program".to_string()
    } else {
        class
    }
}
