pub mod compiler;
pub mod config;

pub use compiler::codegen::options::{OptionValue, RenderOptions, KNOWN_OPTIONS};
pub use compiler::codegen::RenderError;
pub use compiler::ir::{
    Comprehension, ComprehensionKind, Generator, GeneratorSource, IrError, Range, Reduce,
    ReduceKind, TypeInfo,
};
pub use compiler::parser::ParseError;
pub use compiler::strategy::{
    Mode, ParallelFlavor, RequestedMode, StrategyDecision, StrategyRequest,
};
pub use config::{Config, ConfigError};

use log::debug;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════
//  Errors
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("IR JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

// ═══════════════════════════════════════════════════════════════
//  Public API
// ═══════════════════════════════════════════════════════════════

/// Parse one comprehension or reduction statement into IR.
pub fn parse(source: &str) -> Result<Comprehension> {
    Ok(compiler::parser::parse(source)?)
}

/// Render IR for a registered target.
///
/// Options a renderer does not declare are dropped before it runs, so the
/// union of every renderer's options is always safe to pass.
pub fn render(target: &str, ir: &Comprehension, opts: &RenderOptions) -> Result<String> {
    Ok(compiler::codegen::render(target, ir, opts)?)
}

/// Parse `source` and render it for `target`.
pub fn compile(source: &str, target: &str, opts: &RenderOptions) -> Result<String> {
    let ir = parse(source)?;
    debug!("parsed {} comprehension with {} generator(s)", ir.kind, ir.generators.len());
    render(target, &ir, opts)
}

/// Registered target identifiers, sorted.
pub fn targets() -> Vec<&'static str> {
    compiler::codegen::targets()
}

/// IR as pretty-printed JSON with `__type__` tags.
pub fn ir_to_json(ir: &Comprehension) -> Result<String> {
    Ok(serde_json::to_string_pretty(ir)?)
}

/// Load IR from JSON and check its structural invariants.
pub fn ir_from_json(json: &str) -> Result<Comprehension> {
    let ir: Comprehension = serde_json::from_str(json)?;
    ir.validate()?;
    Ok(ir)
}

/// Run the strategy engine without rendering.
pub fn explain(ir: &Comprehension, request: &StrategyRequest) -> StrategyDecision {
    compiler::strategy::choose_strategy(ir, request)
}
