//! Generation-mode and parallel-flavor selection.
//!
//! Decides, before any Julia text is emitted, whether a comprehension is
//! lowered to explicit loops or broadcast expressions, and whether a
//! requested parallelization is granted. Every denied request carries an
//! explanation naming the gate that failed.

pub mod associativity;

use crate::compiler::expr::parse_expr_text;
use crate::compiler::ir::{Comprehension, ComprehensionKind};
use associativity::Grant;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Estimated element counts at or below this favour broadcast mode.
pub const BROADCAST_THRESHOLD: u64 = 10_000;

static CONDITIONAL_WORD: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(if|else|and|or)\b").ok());

// ═══════════════════════════════════════════════════════════════
//  Request / decision types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestedMode {
    #[default]
    Auto,
    Loops,
    Broadcast,
}

impl FromStr for RequestedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(RequestedMode::Auto),
            "loops" => Ok(RequestedMode::Loops),
            "broadcast" => Ok(RequestedMode::Broadcast),
            other => Err(format!(
                "unknown mode '{}'; expected auto, loops or broadcast",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Loops,
    Broadcast,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Loops => f.write_str("loops"),
            Mode::Broadcast => f.write_str("broadcast"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelFlavor {
    Sequential,
    ThreadLocalPartials(Grant),
    Sharded,
}

impl ParallelFlavor {
    pub fn is_parallel(&self) -> bool {
        !matches!(self, ParallelFlavor::Sequential)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParallelFlavor::Sequential => "sequential",
            ParallelFlavor::ThreadLocalPartials(_) => "thread-local-partials",
            ParallelFlavor::Sharded => "sharded",
        }
    }
}

impl fmt::Display for ParallelFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to [`choose_strategy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyRequest {
    pub mode: RequestedMode,
    /// Caller-supplied element count; overrides the range estimate.
    pub elem_count_hint: Option<u64>,
    /// Reduction operator name as it appears in the associativity table.
    pub op_kind: Option<String>,
    pub elem_type: String,
    pub parallel_requested: bool,
    /// Skip the cross-iteration dependency check.
    pub unsafe_: bool,
}

impl Default for StrategyRequest {
    fn default() -> Self {
        Self {
            mode: RequestedMode::Auto,
            elem_count_hint: None,
            op_kind: None,
            elem_type: "Int".to_string(),
            parallel_requested: false,
            unsafe_: false,
        }
    }
}

impl StrategyRequest {
    /// Request derived from the IR: the operator is the reduction kind.
    pub fn for_ir(ir: &Comprehension) -> Self {
        Self {
            op_kind: ir.reduce_kind().map(|k| k.name().to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDecision {
    pub mode: Mode,
    pub flavor: ParallelFlavor,
    /// Human-readable notes, one decision per entry.
    pub notes: Vec<String>,
}

impl StrategyDecision {
    /// Notes rendered as `NOTE: ...` lines.
    pub fn explanation(&self) -> String {
        self.notes
            .iter()
            .map(|n| format!("NOTE: {}", n))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ═══════════════════════════════════════════════════════════════
//  Engine
// ═══════════════════════════════════════════════════════════════

pub fn choose_strategy(ir: &Comprehension, req: &StrategyRequest) -> StrategyDecision {
    let mut notes = Vec::new();

    // ── Mode ─────────────────────────────────────────────────
    let mut mode = match req.mode {
        RequestedMode::Loops => Mode::Loops,
        RequestedMode::Broadcast => Mode::Broadcast,
        RequestedMode::Auto => {
            let estimate = estimate_elements(ir, req.elem_count_hint);
            let shape_ok = matches!(ir.kind, ComprehensionKind::List | ComprehensionKind::Set)
                || ir.reduce.is_some();
            match estimate {
                Some(n) if n <= BROADCAST_THRESHOLD && shape_ok && !ir.has_filters() => {
                    notes.push(format!("auto-selected broadcast mode for small N={}", n));
                    Mode::Broadcast
                }
                _ => {
                    notes.push(format!("auto-selected loops mode for {} operation", ir.kind));
                    Mode::Loops
                }
            }
        }
    };

    // ── Parallel flavor ──────────────────────────────────────
    let flavor = if req.parallel_requested {
        select_flavor(ir, req, &mut notes)
    } else {
        ParallelFlavor::Sequential
    };

    if flavor.is_parallel() && mode == Mode::Broadcast {
        notes.push(format!(
            "{} parallelization requires loops; broadcast mode overridden",
            flavor
        ));
        mode = Mode::Loops;
    }

    debug!(
        "strategy for {} comprehension: mode={}, flavor={}",
        ir.kind, mode, flavor
    );
    StrategyDecision {
        mode,
        flavor,
        notes,
    }
}

fn select_flavor(
    ir: &Comprehension,
    req: &StrategyRequest,
    notes: &mut Vec<String>,
) -> ParallelFlavor {
    let deps_blocked = if req.unsafe_ {
        notes.push("unsafe mode: cross-iteration dependency check skipped".to_string());
        false
    } else {
        has_cross_iteration_deps(ir)
    };

    if ir.kind == ComprehensionKind::Dict {
        if deps_blocked {
            notes.push(
                "parallel fallback -> sequential: cross-iteration dependencies detected"
                    .to_string(),
            );
            return ParallelFlavor::Sequential;
        }
        notes.push(
            "dict parallelized with shard-then-merge pattern (thread-local writes)".to_string(),
        );
        return ParallelFlavor::Sharded;
    }

    let op = match &req.op_kind {
        Some(op) => op,
        None => {
            notes.push(format!(
                "parallel fallback -> sequential: no reduction operator for {} comprehension",
                ir.kind
            ));
            return ParallelFlavor::Sequential;
        }
    };

    let grant = match associativity::check(op, &req.elem_type) {
        Ok(grant) => grant,
        Err(denial) => {
            notes.push(format!("parallel fallback -> sequential: {}", denial));
            return ParallelFlavor::Sequential;
        }
    };

    if deps_blocked {
        notes.push(
            "parallel fallback -> sequential: cross-iteration dependencies detected".to_string(),
        );
        return ParallelFlavor::Sequential;
    }

    notes.push(format!(
        "parallelized with thread-local partials (op '{}', identity {}, type {})",
        grant.op.name(),
        grant.identity_literal(),
        grant.ty
    ));
    ParallelFlavor::ThreadLocalPartials(grant)
}

/// Element count used for mode selection.
///
/// A caller hint wins. Otherwise only a single range generator is
/// estimated, as `stop - start`, halved when filters are present.
pub fn estimate_elements(ir: &Comprehension, hint: Option<u64>) -> Option<u64> {
    if hint.is_some() {
        return hint;
    }
    if ir.generators.len() != 1 {
        return None;
    }
    let gen = &ir.generators[0];
    let range = gen.as_range()?;
    let span = range.stop.saturating_sub(range.start).max(0) as u64;
    if gen.filters.is_empty() {
        Some(span)
    } else {
        Some(span / 2)
    }
}

/// Conservative check for conditional logic in any carried expression.
///
/// Expressions that parse are inspected structurally for ternaries and
/// `and`/`or`; anything else falls back to a whole-word keyword match.
pub fn has_cross_iteration_deps(ir: &Comprehension) -> bool {
    ir.expression_texts()
        .into_iter()
        .any(|text| match parse_expr_text(text) {
            Ok(expr) => expr.has_conditional(),
            Err(_) => CONDITIONAL_WORD
                .as_ref()
                .map_or(true, |re| re.is_match(text)),
        })
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Generator, ReduceKind};
    use crate::compiler::parser::parse;

    fn parallel_request(op: &str, ty: &str) -> StrategyRequest {
        StrategyRequest {
            op_kind: Some(op.to_string()),
            elem_type: ty.to_string(),
            parallel_requested: true,
            ..StrategyRequest::default()
        }
    }

    fn sum_ir() -> Comprehension {
        parse("sum(x*x for x in range(1, 100))").unwrap()
    }

    #[test]
    fn test_sum_int_gets_thread_local_partials() {
        let decision = choose_strategy(&sum_ir(), &parallel_request("sum", "Int"));
        assert_eq!(decision.flavor.name(), "thread-local-partials");
        assert!(decision.explanation().contains("thread-local partials"));
        assert_eq!(decision.mode, Mode::Loops);
    }

    #[test]
    fn test_max_string_falls_back_with_type_named() {
        let decision = choose_strategy(&sum_ir(), &parallel_request("max", "String"));
        assert_eq!(decision.flavor, ParallelFlavor::Sequential);
        assert!(decision.explanation().contains("type 'String' not supported for 'max'"));
    }

    #[test]
    fn test_non_associative_op_explained() {
        let decision = choose_strategy(&sum_ir(), &parallel_request("any", "Int"));
        assert_eq!(decision.flavor, ParallelFlavor::Sequential);
        assert!(decision.explanation().contains("non-associative op 'any'"));
    }

    #[test]
    fn test_conditional_element_blocks_parallelism() {
        let ir = parse("sum(x if x > 3 else 0 for x in range(10))").unwrap();
        let decision = choose_strategy(&ir, &parallel_request("sum", "Int"));
        assert_eq!(decision.flavor, ParallelFlavor::Sequential);
        assert!(decision.explanation().contains("cross-iteration dependencies"));
    }

    #[test]
    fn test_unsafe_skips_dependency_check() {
        let ir = parse("sum(x if x > 3 else 0 for x in range(10))").unwrap();
        let mut req = parallel_request("sum", "Int");
        req.unsafe_ = true;
        let decision = choose_strategy(&ir, &req);
        assert!(decision.flavor.is_parallel());
        assert!(decision.explanation().contains("dependency check skipped"));
    }

    #[test]
    fn test_keyword_inside_identifier_is_not_a_dependency() {
        let ir = parse("sum(order + x for x in range(10))").unwrap();
        assert!(!has_cross_iteration_deps(&ir));
    }

    #[test]
    fn test_dict_is_sharded_regardless_of_operator() {
        let ir = parse("{i: i*i for i in range(1, 6)}").unwrap();
        let decision = choose_strategy(&ir, &parallel_request("whatever", "String"));
        assert_eq!(decision.flavor, ParallelFlavor::Sharded);
        assert_eq!(decision.mode, Mode::Loops);
    }

    #[test]
    fn test_list_without_reduction_stays_sequential() {
        let ir = parse("[x for x in range(5)]").unwrap();
        let mut req = StrategyRequest::for_ir(&ir);
        req.parallel_requested = true;
        let decision = choose_strategy(&ir, &req);
        assert_eq!(decision.flavor, ParallelFlavor::Sequential);
        assert!(!decision.explanation().is_empty());
    }

    #[test]
    fn test_auto_mode_prefers_broadcast_for_small_unfiltered() {
        let ir = parse("[x*2 for x in range(100)]").unwrap();
        let decision = choose_strategy(&ir, &StrategyRequest::for_ir(&ir));
        assert_eq!(decision.mode, Mode::Broadcast);
        assert!(decision.explanation().contains("N=100"));
    }

    #[test]
    fn test_auto_mode_uses_loops_for_filters_large_and_dict() {
        let filtered = parse("[x for x in range(100) if x % 2 == 0]").unwrap();
        assert_eq!(
            choose_strategy(&filtered, &StrategyRequest::default()).mode,
            Mode::Loops
        );
        let large = parse("[x for x in range(20000)]").unwrap();
        assert_eq!(choose_strategy(&large, &StrategyRequest::default()).mode, Mode::Loops);
        let dict = parse("{x: x for x in range(10)}").unwrap();
        assert_eq!(choose_strategy(&dict, &StrategyRequest::default()).mode, Mode::Loops);
    }

    #[test]
    fn test_hint_overrides_estimate() {
        let ir = parse("[x for x in range(20000)]").unwrap();
        let req = StrategyRequest {
            elem_count_hint: Some(50),
            ..StrategyRequest::default()
        };
        assert_eq!(choose_strategy(&ir, &req).mode, Mode::Broadcast);
    }

    #[test]
    fn test_pinned_mode_is_respected() {
        let ir = parse("[x for x in range(10)]").unwrap();
        let req = StrategyRequest {
            mode: RequestedMode::Loops,
            ..StrategyRequest::default()
        };
        let decision = choose_strategy(&ir, &req);
        assert_eq!(decision.mode, Mode::Loops);
        assert!(decision.notes.is_empty());
    }

    #[test]
    fn test_parallel_overrides_pinned_broadcast() {
        let mut req = parallel_request("sum", "Int");
        req.mode = RequestedMode::Broadcast;
        let decision = choose_strategy(&sum_ir(), &req);
        assert_eq!(decision.mode, Mode::Loops);
        assert!(decision.explanation().contains("broadcast mode overridden"));
    }

    #[test]
    fn test_estimate_halves_for_filters_and_skips_nested() {
        let filtered = Comprehension::reduction(
            ReduceKind::Sum,
            "x",
            vec![Generator::range("x", 0, 100, 1).with_filter("x > 1")],
        );
        assert_eq!(estimate_elements(&filtered, None), Some(50));
        let nested = parse("[i*j for i in range(3) for j in range(3)]").unwrap();
        assert_eq!(estimate_elements(&nested, None), None);
        let opaque = parse("[v for v in data]").unwrap();
        assert_eq!(estimate_elements(&opaque, None), None);
    }

    #[test]
    fn test_fallback_regex_on_unparsable_text() {
        let ir = Comprehension::reduction(
            ReduceKind::Sum,
            "[y for y in xs if y]",
            vec![Generator::range("x", 0, 3, 1)],
        );
        assert!(has_cross_iteration_deps(&ir));
    }
}
