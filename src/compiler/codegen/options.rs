//! Uniform option bag passed to every renderer.

use super::RenderError;
use crate::compiler::ir::{is_identifier, TypeInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every option name any renderer understands.
pub const KNOWN_OPTIONS: &[&str] = &[
    "dialect",
    "explain",
    "func_name",
    "int_type",
    "mode",
    "parallel",
    "type_info",
    "unsafe",
];

pub const DEFAULT_FUNC_NAME: &str = "program";

/// Integer widths as (Rust, C#) spellings. `int_type` accepts either
/// spelling on every target.
const INT_WIDTHS: &[(&str, &str)] = &[
    ("i8", "sbyte"),
    ("i16", "short"),
    ("i32", "int"),
    ("i64", "long"),
    ("i128", "Int128"),
    ("isize", "nint"),
    ("u8", "byte"),
    ("u16", "ushort"),
    ("u32", "uint"),
    ("u64", "ulong"),
    ("u128", "UInt128"),
    ("usize", "nuint"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSpelling {
    Rust,
    CSharp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Str(String),
    Types(TypeInfo),
}

impl OptionValue {
    fn kind(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "a boolean",
            OptionValue::Str(_) => "a string",
            OptionValue::Types(_) => "type info",
        }
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

impl From<TypeInfo> for OptionValue {
    fn from(t: TypeInfo) -> Self {
        OptionValue::Types(t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderOptions {
    values: BTreeMap<String, OptionValue>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Builders ─────────────────────────────────────────────

    pub fn set(mut self, name: &str, value: impl Into<OptionValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn parallel(self, on: bool) -> Self {
        self.set("parallel", on)
    }

    pub fn mode(self, mode: &str) -> Self {
        self.set("mode", mode)
    }

    pub fn explain(self, on: bool) -> Self {
        self.set("explain", on)
    }

    pub fn unsafe_mode(self, on: bool) -> Self {
        self.set("unsafe", on)
    }

    pub fn dialect(self, dialect: &str) -> Self {
        self.set("dialect", dialect)
    }

    pub fn int_type(self, ty: &str) -> Self {
        self.set("int_type", ty)
    }

    pub fn func_name(self, name: &str) -> Self {
        self.set("func_name", name)
    }

    pub fn type_info(self, info: TypeInfo) -> Self {
        self.set("type_info", info)
    }

    // ── Map access ───────────────────────────────────────────

    pub fn insert(&mut self, name: &str, value: impl Into<OptionValue>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` on top of `self`; values in `other` win.
    pub fn merged(mut self, other: &RenderOptions) -> Self {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
        self
    }

    /// Split into the options named in `accepted` and the names dropped.
    pub fn split_accepted(&self, accepted: &[&str]) -> (RenderOptions, Vec<String>) {
        let mut kept = RenderOptions::new();
        let mut dropped = Vec::new();
        for (name, value) in &self.values {
            if accepted.contains(&name.as_str()) {
                kept.values.insert(name.clone(), value.clone());
            } else {
                dropped.push(name.clone());
            }
        }
        (kept, dropped)
    }

    // ── Typed accessors ──────────────────────────────────────

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, RenderError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(OptionValue::Bool(b)) => Ok(*b),
            Some(other) => Err(wrong_type(name, "a boolean", other)),
        }
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str, RenderError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(OptionValue::Str(s)) => Ok(s),
            Some(other) => Err(wrong_type(name, "a string", other)),
        }
    }

    pub fn type_info_or_default(&self) -> Result<TypeInfo, RenderError> {
        match self.values.get("type_info") {
            None => Ok(TypeInfo::default()),
            Some(OptionValue::Types(t)) => Ok(t.clone()),
            Some(other) => Err(wrong_type("type_info", "type info", other)),
        }
    }

    /// `func_name`, validated as an identifier.
    pub fn func_name_or_default(&self) -> Result<&str, RenderError> {
        let name = self.str_or("func_name", DEFAULT_FUNC_NAME)?;
        if !is_identifier(name) {
            return Err(RenderError::InvalidOption {
                name: "func_name".to_string(),
                message: format!("'{}' is not an identifier", name),
            });
        }
        Ok(name)
    }

    /// `int_type` in the target's spelling; defaults to 32 bits.
    pub fn int_type_or_default(&self, spelling: IntSpelling) -> Result<&'static str, RenderError> {
        let value = self.str_or("int_type", "i32")?;
        let &(rust, csharp) = INT_WIDTHS
            .iter()
            .find(|(rust, csharp)| *rust == value || *csharp == value)
            .ok_or_else(|| RenderError::InvalidOption {
                name: "int_type".to_string(),
                message: format!("'{}' is not a known integer type", value),
            })?;
        Ok(match spelling {
            IntSpelling::Rust => rust,
            IntSpelling::CSharp => csharp,
        })
    }

    /// A string option restricted to `allowed`.
    pub fn choice_or<'a>(
        &'a self,
        name: &str,
        default: &'a str,
        allowed: &[&str],
    ) -> Result<&'a str, RenderError> {
        let value = self.str_or(name, default)?;
        if !allowed.contains(&value) {
            return Err(RenderError::InvalidOption {
                name: name.to_string(),
                message: format!("'{}' is not one of {}", value, allowed.join(", ")),
            });
        }
        Ok(value)
    }
}

fn wrong_type(name: &str, expected: &str, got: &OptionValue) -> RenderError {
    RenderError::InvalidOption {
        name: name.to_string(),
        message: format!("expected {}, got {}", expected, got.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_and_defaults() {
        let opts = RenderOptions::new().parallel(true).func_name("squares");
        assert!(opts.bool_or("parallel", false).unwrap());
        assert!(opts.bool_or("explain", true).unwrap());
        assert_eq!(opts.func_name_or_default().unwrap(), "squares");
        assert_eq!(RenderOptions::new().func_name_or_default().unwrap(), "program");
    }

    #[test]
    fn test_wrong_type_is_invalid_option() {
        let opts = RenderOptions::new().set("parallel", "yes");
        let err = opts.bool_or("parallel", false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for option 'parallel': expected a boolean, got a string"
        );
    }

    #[test]
    fn test_func_name_must_be_identifier() {
        let opts = RenderOptions::new().func_name("not valid");
        assert!(matches!(
            opts.func_name_or_default(),
            Err(RenderError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_split_accepted() {
        let opts = RenderOptions::new().parallel(true).dialect("sqlite").mode("loops");
        let (kept, dropped) = opts.split_accepted(&["parallel", "mode"]);
        assert_eq!(kept.names().collect::<Vec<_>>(), vec!["mode", "parallel"]);
        assert_eq!(dropped, vec!["dialect".to_string()]);
    }

    #[test]
    fn test_choice_rejects_unknown() {
        let opts = RenderOptions::new().dialect("oracle");
        assert!(opts.choice_or("dialect", "sqlite", &["sqlite", "postgresql"]).is_err());
    }

    #[test]
    fn test_int_type_accepts_either_spelling() {
        let long = RenderOptions::new().int_type("long");
        assert_eq!(long.int_type_or_default(IntSpelling::Rust).unwrap(), "i64");
        assert_eq!(long.int_type_or_default(IntSpelling::CSharp).unwrap(), "long");

        let byte = RenderOptions::new().int_type("u8");
        assert_eq!(byte.int_type_or_default(IntSpelling::CSharp).unwrap(), "byte");

        let default = RenderOptions::new();
        assert_eq!(default.int_type_or_default(IntSpelling::Rust).unwrap(), "i32");
        assert_eq!(default.int_type_or_default(IntSpelling::CSharp).unwrap(), "int");

        let err = RenderOptions::new()
            .int_type("bigint")
            .int_type_or_default(IntSpelling::Rust)
            .unwrap_err();
        assert!(err.to_string().contains("'bigint' is not a known integer type"));
    }

    #[test]
    fn test_merged_prefers_overlay() {
        let base = RenderOptions::new().parallel(false).dialect("sqlite");
        let merged = base.merged(&RenderOptions::new().parallel(true));
        assert!(merged.bool_or("parallel", false).unwrap());
        assert_eq!(merged.str_or("dialect", "").unwrap(), "sqlite");
    }

    #[test]
    fn test_json_form_is_plain_map() {
        let opts = RenderOptions::new().parallel(true).mode("loops");
        let json = serde_json::to_string(&opts).unwrap();
        assert_eq!(json, r#"{"mode":"loops","parallel":true}"#);
    }
}
