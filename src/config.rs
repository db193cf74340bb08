//! `polyglot.toml`: default target and render options.
//!
//! ```toml
//! [render]
//! target = "julia"
//! parallel = true
//! mode = "loops"
//!
//! [render.type_info]
//! element_type = "float"
//! ```

use crate::compiler::codegen::options::RenderOptions;
use crate::compiler::ir::TypeInfo;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const CONFIG_FILE: &str = "polyglot.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse polyglot.toml: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub render: RenderSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RenderSection {
    pub target: Option<String>,
    pub parallel: Option<bool>,
    pub mode: Option<String>,
    pub explain: Option<bool>,
    #[serde(rename = "unsafe")]
    pub unsafe_: Option<bool>,
    pub dialect: Option<String>,
    pub int_type: Option<String>,
    pub func_name: Option<String>,
    pub type_info: Option<TypeInfoSection>,
}

/// `TypeInfo` without the JSON type tag.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TypeInfoSection {
    pub element_type: Option<String>,
    pub key_type: Option<String>,
    pub value_type: Option<String>,
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        text.parse()
    }

    /// Load `polyglot.toml` from `dir` if present; defaults otherwise.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.render.target.as_deref()
    }

    /// Options set in the file; unset keys are left for renderer defaults.
    pub fn to_options(&self) -> RenderOptions {
        let r = &self.render;
        let mut opts = RenderOptions::new();
        if let Some(v) = r.parallel {
            opts.insert("parallel", v);
        }
        if let Some(v) = &r.mode {
            opts.insert("mode", v.as_str());
        }
        if let Some(v) = r.explain {
            opts.insert("explain", v);
        }
        if let Some(v) = r.unsafe_ {
            opts.insert("unsafe", v);
        }
        if let Some(v) = &r.dialect {
            opts.insert("dialect", v.as_str());
        }
        if let Some(v) = &r.int_type {
            opts.insert("int_type", v.as_str());
        }
        if let Some(v) = &r.func_name {
            opts.insert("func_name", v.as_str());
        }
        if let Some(t) = &r.type_info {
            let mut info = TypeInfo::default();
            if let Some(e) = &t.element_type {
                info.element_type = e.clone();
            }
            if let Some(k) = &t.key_type {
                info.key_type = k.clone();
            }
            if let Some(v) = &t.value_type {
                info.value_type = v.clone();
            }
            opts.insert("type_info", info);
        }
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_section() {
        let toml_str = r#"
[render]
target = "julia"
parallel = true
mode = "loops"
unsafe = true
"#;
        let config: Config = toml_str.parse().unwrap();
        assert_eq!(config.target(), Some("julia"));
        let opts = config.to_options();
        assert!(opts.bool_or("parallel", false).unwrap());
        assert!(opts.bool_or("unsafe", false).unwrap());
        assert_eq!(opts.str_or("mode", "auto").unwrap(), "loops");
        assert!(!opts.contains("dialect"));
    }

    #[test]
    fn test_type_info_table() {
        let toml_str = r#"
[render.type_info]
element_type = "float"
"#;
        let config: Config = toml_str.parse().unwrap();
        let info = config.to_options().type_info_or_default().unwrap();
        assert_eq!(info.element_type, "float");
        assert_eq!(info.key_type, "int");
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
        assert!(config.to_options().is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = "[render]\nparalel = true\n".parse::<Config>().unwrap_err();
        assert!(err.to_string().contains("failed to parse polyglot.toml"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = std::env::temp_dir().join("polyglot-config-test-missing");
        assert_eq!(Config::discover(&dir).unwrap(), Config::default());
    }
}
