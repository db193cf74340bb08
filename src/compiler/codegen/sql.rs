//! SQL back-end. Ranges become recursive CTEs (sqlite) or `generate_series`
//! (postgresql); nested generators become cross joins.

use super::options::RenderOptions;
use super::syntax::{Dialect, ExprPrinter};
use super::writer::CodeWriter;
use super::{non_negative_vars, RenderError, Renderer};
use crate::compiler::expr::{parse_expr_text, Expr};
use crate::compiler::ir::{Comprehension, ComprehensionKind, Generator, GeneratorSource, Range, ReduceKind};

pub const DIALECTS: &[&str] = &["sqlite", "postgresql"];

pub struct SqlRenderer;

impl Renderer for SqlRenderer {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn accepted_options(&self) -> &'static [&'static str] {
        &["dialect"]
    }

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError> {
        let dialect = match opts.choice_or("dialect", "sqlite", DIALECTS)? {
            "postgresql" => Dialect::Postgres,
            _ => Dialect::Sqlite,
        };
        let mut emitter = SqlEmitter {
            ir,
            dialect,
            printer: ExprPrinter::new(dialect).with_non_negative(non_negative_vars(ir)),
        };
        Ok(emitter.emit())
    }
}

struct SqlEmitter<'a> {
    ir: &'a Comprehension,
    dialect: Dialect,
    printer: ExprPrinter,
}

impl SqlEmitter<'_> {
    fn emit(&mut self) -> String {
        let ir = self.ir;
        let mut w = CodeWriter::new();

        if ir.reduce_kind() == Some(ReduceKind::Prod) {
            w.line("-- simplified: no portable product aggregate; EXP(SUM(LN(x))) holds for positive values only");
        }
        for gen in &ir.generators {
            if let GeneratorSource::Expr(text) = &gen.source {
                w.line(format!(
                    "-- simplified: '{}' is read as a table with a single 'value' column",
                    text
                ));
            }
        }

        if self.dialect == Dialect::Sqlite {
            self.emit_ctes(&mut w);
        }

        let from = self.from_clause();
        match ir.reduce_kind() {
            Some(kind @ (ReduceKind::Any | ReduceKind::All)) => {
                let test = self.printer.translate(ir.element_text());
                let (lead, extra) = if kind == ReduceKind::Any {
                    ("SELECT EXISTS (", format!("({})", test))
                } else {
                    ("SELECT NOT EXISTS (", format!("NOT ({})", test))
                };
                {
                    let mut sub = w.block(lead, ") AS result;");
                    sub.line("SELECT 1");
                    let mut conditions = self.conditions();
                    conditions.push(extra);
                    write_clauses(&mut sub, &from, &conditions, &[], false);
                }
            }
            _ => {
                let select = self.select_list();
                w.line(select);
                let conditions = self.conditions();
                let order = self.order_by();
                write_clauses(&mut w, &from, &conditions, &order, true);
            }
        }
        w.finish()
    }

    // ── Sources ──────────────────────────────────────────────

    /// `WITH RECURSIVE` definitions for every range generator.
    fn emit_ctes(&self, w: &mut CodeWriter) {
        let ranges: Vec<(&str, &Range)> = self
            .ir
            .generators
            .iter()
            .filter_map(|g| g.as_range().map(|r| (g.var.as_str(), r)))
            .collect();

        let last = ranges.len().saturating_sub(1);
        for (i, (var, r)) in ranges.into_iter().enumerate() {
            let lead = if i == 0 { "WITH RECURSIVE " } else { "" };
            let footer = if i == last { ")" } else { ")," };
            let mut cte = w.block(format!("{}range_{1}({1}) AS (", lead, var), footer);
            if r.is_empty() {
                cte.line(format!("SELECT {} WHERE 0", r.start));
            } else {
                cte.line(format!("SELECT {}", r.start));
            }
            cte.line("UNION ALL");
            let next = if r.step > 0 {
                format!("{} + {}", var, r.step)
            } else {
                format!("{} - {}", var, r.step.unsigned_abs())
            };
            let bound = if r.step > 0 { "<" } else { ">" };
            cte.line(format!(
                "SELECT {} FROM range_{} WHERE {} {} {}",
                next, var, next, bound, r.stop
            ));
        }
    }

    fn from_clause(&self) -> Vec<String> {
        self.ir
            .generators
            .iter()
            .enumerate()
            .map(|(i, gen)| {
                let source = self.source(gen);
                if i == 0 {
                    format!("FROM {}", source)
                } else {
                    format!("CROSS JOIN {}", source)
                }
            })
            .collect()
    }

    fn source(&self, gen: &Generator) -> String {
        match (&gen.source, self.dialect) {
            (GeneratorSource::Range(_), Dialect::Sqlite) => format!("range_{}", gen.var),
            (GeneratorSource::Range(r), _) => {
                // generate_series is inclusive
                let last = if r.step > 0 { r.stop - 1 } else { r.stop + 1 };
                if r.step == 1 {
                    format!("generate_series({}, {}) AS {}", r.start, last, gen.var)
                } else {
                    format!(
                        "generate_series({}, {}, {}) AS {}",
                        r.start, last, r.step, gen.var
                    )
                }
            }
            (GeneratorSource::Expr(text), _) => format!(
                "(SELECT value AS {0} FROM {1}) AS src_{0}",
                gen.var, text
            ),
        }
    }

    // ── Clauses ──────────────────────────────────────────────

    fn select_list(&mut self) -> String {
        let ir = self.ir;
        match (ir.kind, ir.reduce_kind()) {
            (_, Some(ReduceKind::Sum)) => {
                let e = self.printer.translate(ir.element_text());
                format!("SELECT COALESCE(SUM({}), 0) AS result", e)
            }
            (_, Some(ReduceKind::Prod)) => {
                let e = self.printer.translate(ir.element_text());
                format!("SELECT COALESCE(EXP(SUM(LN({}))), 1) AS result", e)
            }
            (_, Some(ReduceKind::Max)) => {
                let e = self.printer.translate(ir.element_text());
                format!("SELECT MAX({}) AS result", e)
            }
            (_, Some(ReduceKind::Min)) => {
                let e = self.printer.translate(ir.element_text());
                format!("SELECT MIN({}) AS result", e)
            }
            (ComprehensionKind::Dict, _) => {
                let key = self.printer.translate(ir.key_text());
                let value = self.printer.translate(ir.value_text());
                format!("SELECT {} AS key, {} AS value", key, value)
            }
            (kind, _) => {
                let distinct = if kind == ComprehensionKind::Set {
                    "DISTINCT "
                } else {
                    ""
                };
                format!("SELECT {}{}", distinct, self.value_columns(ir.element_text()))
            }
        }
    }

    /// A tuple element spreads over `value_1, value_2, ...`.
    fn value_columns(&mut self, element: &str) -> String {
        match parse_expr_text(element) {
            Ok(Expr::Tuple(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| format!("{} AS value_{}", self.printer.print(item), i + 1))
                .collect::<Vec<_>>()
                .join(", "),
            _ => format!("{} AS value", self.printer.translate(element)),
        }
    }

    fn conditions(&mut self) -> Vec<String> {
        let ir = self.ir;
        let filters: Vec<&String> = ir.generators.iter().flat_map(|g| &g.filters).collect();
        let several = filters.len() > 1;
        filters
            .into_iter()
            .map(|f| {
                let cond = self.printer.translate(f);
                if several && cond.contains(" OR ") {
                    format!("({})", cond)
                } else {
                    cond
                }
            })
            .collect()
    }

    /// Lists keep iteration order; other shapes are unordered.
    fn order_by(&self) -> Vec<String> {
        if self.ir.kind != ComprehensionKind::List || self.ir.reduce.is_some() {
            return Vec::new();
        }
        self.ir
            .generators
            .iter()
            .filter_map(|g| {
                g.as_range().map(|r| {
                    if r.step > 0 {
                        g.var.clone()
                    } else {
                        format!("{} DESC", g.var)
                    }
                })
            })
            .collect()
    }
}

fn write_clauses(
    w: &mut CodeWriter,
    from: &[String],
    conditions: &[String],
    order: &[String],
    terminate: bool,
) {
    let mut lines: Vec<String> = from.to_vec();
    for (i, cond) in conditions.iter().enumerate() {
        let kw = if i == 0 { "WHERE" } else { "  AND" };
        lines.push(format!("{} {}", kw, cond));
    }
    if !order.is_empty() {
        lines.push(format!("ORDER BY {}", order.join(", ")));
    }
    if terminate {
        if let Some(last) = lines.last_mut() {
            last.push(';');
        }
    }
    w.lines(lines);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse;

    fn render(src: &str, opts: RenderOptions) -> String {
        SqlRenderer.render(&parse(src).unwrap(), &opts).unwrap()
    }

    #[test]
    fn test_sqlite_sum_with_filter() {
        let out = render("sum(x*x for x in range(1, 100) if x%3==0)", RenderOptions::new());
        assert_eq!(
            out,
            "WITH RECURSIVE range_x(x) AS (\n    SELECT 1\n    UNION ALL\n    SELECT x + 1 FROM range_x WHERE x + 1 < 100\n)\nSELECT COALESCE(SUM(x * x), 0) AS result\nFROM range_x\nWHERE x % 3 = 0;\n"
        );
    }

    #[test]
    fn test_postgres_generate_series() {
        let out = render(
            "[x for x in range(0, 10, 3)]",
            RenderOptions::new().dialect("postgresql"),
        );
        assert_eq!(
            out,
            "SELECT x AS value\nFROM generate_series(0, 9, 3) AS x\nORDER BY x;\n"
        );
    }

    #[test]
    fn test_set_distinct_and_dict_columns() {
        let set = render("{x % 3 for x in range(9)}", RenderOptions::new().dialect("postgresql"));
        assert!(set.starts_with("SELECT DISTINCT x % 3 AS value\n"));
        assert!(!set.contains("ORDER BY"));

        let dict = render("{i: i*i for i in range(1, 6)}", RenderOptions::new());
        assert!(dict.contains("SELECT i AS key, i * i AS value\n"));
    }

    #[test]
    fn test_any_and_all_use_exists() {
        let any = render("any(x > 5 for x in range(10))", RenderOptions::new().dialect("postgresql"));
        assert_eq!(
            any,
            "SELECT EXISTS (\n    SELECT 1\n    FROM generate_series(0, 9) AS x\n    WHERE (x > 5)\n) AS result;\n"
        );
        let all = render("all(x >= 0 for x in range(10) if x != 3)", RenderOptions::new());
        assert!(all.contains("SELECT NOT EXISTS ("));
        assert!(all.contains("    WHERE x <> 3\n      AND NOT (x >= 0)\n"));
    }

    #[test]
    fn test_nested_cross_join() {
        let out = render(
            "[(i, j) for i in range(2) for j in range(3, 0, -1)]",
            RenderOptions::new(),
        );
        assert!(out.starts_with("WITH RECURSIVE range_i(i) AS (\n"));
        assert!(out.contains("),\nrange_j(j) AS (\n    SELECT 3\n"));
        assert!(out.contains("SELECT j - 1 FROM range_j WHERE j - 1 > 0"));
        assert!(out.contains("SELECT i AS value_1, j AS value_2\nFROM range_i\nCROSS JOIN range_j\nORDER BY i, j DESC;"));
    }

    #[test]
    fn test_degraded_forms_are_annotated() {
        let prod = render("prod(x for x in range(1, 5))", RenderOptions::new());
        assert!(prod.starts_with("-- simplified"));
        assert!(prod.contains("EXP(SUM(LN(x)))"));

        let opaque = render("[v for v in readings]", RenderOptions::new());
        assert!(opaque.starts_with("-- simplified"));
        assert!(opaque.contains("FROM (SELECT value AS v FROM readings) AS src_v"));
    }

    #[test]
    fn test_unknown_dialect() {
        let ir = parse("[x for x in range(3)]").unwrap();
        let err = SqlRenderer
            .render(&ir, &RenderOptions::new().dialect("oracle"))
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidOption { .. }));
    }
}
