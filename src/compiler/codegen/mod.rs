//! Back-end code generators and the dispatch registry.
//!
//! Each target is a [`Renderer`]: a pure function from IR plus options to
//! source text. [`render`] looks the target up, drops every option the
//! renderer does not declare, and invokes it.

pub mod csharp;
pub mod go;
pub mod julia;
pub mod naming;
pub mod options;
pub mod rust;
pub mod sql;
pub mod syntax;
pub mod ts;
pub mod writer;

use crate::compiler::expr::{parse_expr_text, Expr};
use crate::compiler::ir::Comprehension;
use log::debug;
use options::RenderOptions;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════
//  Error type
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unknown target '{target}'; known targets: {}", .known.join(", "))]
    InvalidTarget { target: String, known: Vec<String> },

    #[error("invalid value for option '{name}': {message}")]
    InvalidOption { name: String, message: String },

    #[error("unsupported literal type: {0}")]
    UnsupportedLiteral(String),
}

// ═══════════════════════════════════════════════════════════════
//  Renderer contract
// ═══════════════════════════════════════════════════════════════

pub trait Renderer: Sync {
    /// Target identifier used for dispatch.
    fn name(&self) -> &'static str;

    /// Option names this renderer reads; all others are dropped before
    /// [`Renderer::render`] is called.
    fn accepted_options(&self) -> &'static [&'static str];

    fn render(&self, ir: &Comprehension, opts: &RenderOptions) -> Result<String, RenderError>;
}

static REGISTRY: [&dyn Renderer; 6] = [
    &csharp::CSharpRenderer,
    &go::GoRenderer,
    &julia::JuliaRenderer,
    &rust::RustRenderer,
    &sql::SqlRenderer,
    &ts::TsRenderer,
];

/// Registered target identifiers, sorted.
pub fn targets() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.iter().map(|r| r.name()).collect();
    names.sort_unstable();
    names
}

pub fn renderer(target: &str) -> Option<&'static dyn Renderer> {
    REGISTRY.iter().copied().find(|r| r.name() == target)
}

/// Render `ir` for `target`, tolerating options meant for other renderers.
pub fn render(
    target: &str,
    ir: &Comprehension,
    opts: &RenderOptions,
) -> Result<String, RenderError> {
    let backend = renderer(target).ok_or_else(|| RenderError::InvalidTarget {
        target: target.to_string(),
        known: targets().into_iter().map(String::from).collect(),
    })?;

    let (accepted, dropped) = opts.split_accepted(backend.accepted_options());
    if !dropped.is_empty() {
        debug!(
            "target '{}' ignores option(s): {}",
            target,
            dropped.join(", ")
        );
    }
    debug!("rendering {} comprehension for '{}'", ir.kind, target);
    backend.render(ir, &accepted)
}

// ── Shared helpers ───────────────────────────────────────────

/// Number of components when the expression is a tuple display.
pub(crate) fn tuple_arity(text: &str) -> Option<usize> {
    match parse_expr_text(text) {
        Ok(Expr::Tuple(items)) => Some(items.len()),
        _ => None,
    }
}

/// `start + index * step`, simplified for the common cases.
pub(crate) fn affine(start: i64, step: i64, index: &str) -> String {
    let grouped = if index.contains(' ') {
        format!("({})", index)
    } else {
        index.to_string()
    };
    let magnitude = step.unsigned_abs();
    let term = if magnitude == 1 {
        index.to_string()
    } else {
        format!("{} * {}", grouped, magnitude)
    };
    match (start, step < 0) {
        (0, false) => term,
        (s, false) => format!("{} + {}", s, term),
        (0, true) if magnitude == 1 => format!("-{}", grouped),
        (0, true) => format!("-{}", term),
        (s, true) if magnitude == 1 => format!("{} - {}", s, grouped),
        (s, true) => format!("{} - {}", s, term),
    }
}

/// Generator variables whose range never yields a negative value.
pub(crate) fn non_negative_vars(ir: &Comprehension) -> Vec<String> {
    ir.generators
        .iter()
        .filter(|g| {
            g.as_range()
                .is_some_and(|r| r.start >= 0 && r.last().map_or(true, |last| last >= 0))
        })
        .map(|g| g.var.clone())
        .collect()
}

/// Whether the expression text is exactly the given variable.
pub(crate) fn is_identity_map(text: &str, var: &str) -> bool {
    matches!(parse_expr_text(text), Ok(Expr::Name(ref n)) if n == var)
}
