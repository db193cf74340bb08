//! Intermediate representation for one comprehension or reduction.
//!
//! Every node serializes with a `__type__` discriminator (`IRComp`,
//! `IRGenerator`, `IRRange`, `IRReduce`, `TypeInfo`) so golden fixtures stay
//! readable and stable. Expression fields hold verbatim source text.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

/// An IR that violates a structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid IR: {0}")]
pub struct IrError(pub String);

// ═══════════════════════════════════════════════════════════════
//  Nodes
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

impl fmt::Display for ComprehensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComprehensionKind::List => "list",
            ComprehensionKind::Set => "set",
            ComprehensionKind::Dict => "dict",
            ComprehensionKind::Generator => "generator",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceKind {
    Sum,
    Prod,
    Max,
    Min,
    Any,
    All,
}

impl ReduceKind {
    pub fn from_name(name: &str) -> Option<ReduceKind> {
        match name {
            "sum" => Some(ReduceKind::Sum),
            "prod" => Some(ReduceKind::Prod),
            "max" => Some(ReduceKind::Max),
            "min" => Some(ReduceKind::Min),
            "any" => Some(ReduceKind::Any),
            "all" => Some(ReduceKind::All),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Prod => "prod",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
            ReduceKind::Any => "any",
            ReduceKind::All => "all",
        }
    }

    /// `any`/`all` produce a boolean; the rest produce a number.
    pub fn is_boolean(self) -> bool {
        matches!(self, ReduceKind::Any | ReduceKind::All)
    }
}

impl fmt::Display for ReduceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open integer range `start..stop` advancing by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "IRRange")]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

impl Range {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        Self { start, stop, step }
    }

    /// Number of values the range yields, as Python's `len(range(...))`.
    pub fn len(&self) -> u64 {
        if self.step > 0 && self.start < self.stop {
            let span = (self.stop as i128) - (self.start as i128);
            ((span + self.step as i128 - 1) / self.step as i128) as u64
        } else if self.step < 0 && self.start > self.stop {
            let span = (self.start as i128) - (self.stop as i128);
            let step = -(self.step as i128);
            ((span + step - 1) / step) as u64
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last value yielded, if any.
    pub fn last(&self) -> Option<i64> {
        let n = self.len();
        if n == 0 {
            return None;
        }
        Some(((self.start as i128) + (n as i128 - 1) * self.step as i128) as i64)
    }

    /// Iterate the values; used by tests that simulate emitted code.
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.len()).map(move |i| self.start + (i as i64) * self.step)
    }
}

/// Where a generator draws its values from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeneratorSource {
    Range(Range),
    /// An iterable the compiler does not understand, named by its source text.
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "IRGenerator")]
pub struct Generator {
    pub var: String,
    pub source: GeneratorSource,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl Generator {
    pub fn range(var: &str, start: i64, stop: i64, step: i64) -> Self {
        Self {
            var: var.to_string(),
            source: GeneratorSource::Range(Range::new(start, stop, step)),
            filters: Vec::new(),
        }
    }

    pub fn opaque(var: &str, source: &str) -> Self {
        Self {
            var: var.to_string(),
            source: GeneratorSource::Expr(source.to_string()),
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filters.push(filter.to_string());
        self
    }

    pub fn as_range(&self) -> Option<&Range> {
        match &self.source {
            GeneratorSource::Range(r) => Some(r),
            GeneratorSource::Expr(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "IRReduce")]
pub struct Reduce {
    pub kind: ReduceKind,
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub initial: Option<String>,
}

impl Reduce {
    pub fn new(kind: ReduceKind) -> Self {
        Self {
            kind,
            op: None,
            initial: None,
        }
    }
}

/// Advisory element/key/value types for type-aware renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "TypeInfo")]
pub struct TypeInfo {
    #[serde(default = "default_type")]
    pub element_type: String,
    #[serde(default = "default_type")]
    pub key_type: String,
    #[serde(default = "default_type")]
    pub value_type: String,
}

fn default_type() -> String {
    "int".to_string()
}

impl Default for TypeInfo {
    fn default() -> Self {
        Self {
            element_type: default_type(),
            key_type: default_type(),
            value_type: default_type(),
        }
    }
}

/// Root IR node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type__", rename = "IRComp")]
pub struct Comprehension {
    pub kind: ComprehensionKind,
    pub generators: Vec<Generator>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub key_expr: Option<String>,
    #[serde(default)]
    pub val_expr: Option<String>,
    #[serde(default)]
    pub reduce: Option<Reduce>,
    #[serde(default)]
    pub provenance: BTreeMap<String, String>,
}

impl Comprehension {
    /// A list/set/generator comprehension producing `element`.
    pub fn with_element(kind: ComprehensionKind, element: &str, generators: Vec<Generator>) -> Self {
        Self {
            kind,
            generators,
            element: Some(element.to_string()),
            key_expr: None,
            val_expr: None,
            reduce: None,
            provenance: BTreeMap::new(),
        }
    }

    /// A dict comprehension producing `key: value` pairs.
    pub fn dict(key: &str, value: &str, generators: Vec<Generator>) -> Self {
        Self {
            kind: ComprehensionKind::Dict,
            generators,
            element: None,
            key_expr: Some(key.to_string()),
            val_expr: Some(value.to_string()),
            reduce: None,
            provenance: BTreeMap::new(),
        }
    }

    /// A reduction over a generator expression.
    pub fn reduction(kind: ReduceKind, element: &str, generators: Vec<Generator>) -> Self {
        let mut comp = Self::with_element(ComprehensionKind::Generator, element, generators);
        comp.reduce = Some(Reduce::new(kind));
        comp
    }

    pub fn reduce_kind(&self) -> Option<ReduceKind> {
        self.reduce.as_ref().map(|r| r.kind)
    }

    /// The element expression, or the first generator variable when absent.
    pub fn element_text(&self) -> &str {
        match &self.element {
            Some(e) => e,
            None => self.generators.first().map(|g| g.var.as_str()).unwrap_or("0"),
        }
    }

    pub fn key_text(&self) -> &str {
        self.key_expr.as_deref().unwrap_or("0")
    }

    pub fn value_text(&self) -> &str {
        self.val_expr.as_deref().unwrap_or("0")
    }

    pub fn has_filters(&self) -> bool {
        self.generators.iter().any(|g| !g.filters.is_empty())
    }

    pub fn is_nested(&self) -> bool {
        self.generators.len() > 1
    }

    /// Every expression string carried by the node, for text heuristics.
    pub fn expression_texts(&self) -> Vec<&str> {
        let mut out: Vec<&str> = [&self.element, &self.key_expr, &self.val_expr]
            .into_iter()
            .filter_map(|e| e.as_deref())
            .collect();
        for gen in &self.generators {
            out.extend(gen.filters.iter().map(String::as_str));
        }
        out
    }

    /// Check the structural invariants of the data model.
    pub fn validate(&self) -> Result<(), IrError> {
        if self.generators.is_empty() {
            return Err(IrError("comprehension has no generators".to_string()));
        }

        match self.kind {
            ComprehensionKind::Dict => {
                if self.key_expr.is_none() || self.val_expr.is_none() {
                    return Err(IrError(
                        "dict comprehension requires key_expr and val_expr".to_string(),
                    ));
                }
                if self.element.is_some() {
                    return Err(IrError(
                        "dict comprehension must not carry an element".to_string(),
                    ));
                }
                if self.reduce.is_some() {
                    return Err(IrError(
                        "a reduction cannot consume a dict comprehension".to_string(),
                    ));
                }
            }
            kind => {
                if self.element.is_none() {
                    return Err(IrError(format!("{} comprehension requires an element", kind)));
                }
                if self.key_expr.is_some() || self.val_expr.is_some() {
                    return Err(IrError(format!(
                        "{} comprehension must not carry key/value expressions",
                        kind
                    )));
                }
                if self.reduce.is_some() && kind == ComprehensionKind::Set {
                    return Err(IrError(
                        "a reduction cannot consume a set comprehension".to_string(),
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for gen in &self.generators {
            if !is_identifier(&gen.var) {
                return Err(IrError(format!(
                    "generator variable '{}' is not an identifier",
                    gen.var
                )));
            }
            if !seen.insert(gen.var.as_str()) {
                return Err(IrError(format!(
                    "generator variable '{}' is bound twice",
                    gen.var
                )));
            }
            if let GeneratorSource::Range(r) = &gen.source {
                if r.step == 0 {
                    return Err(IrError(format!(
                        "range for '{}' has a zero step",
                        gen.var
                    )));
                }
            }
        }

        Ok(())
    }
}

/// ASCII identifier check shared by IR validation and option parsing.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
