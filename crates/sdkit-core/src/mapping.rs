//! Flag mapping table for the server executor.
//!
//! The backend's CLI flags do not map one-to-one onto its HTTP API. This
//! table declares, per flag, whether it is a server startup argument, a
//! standard API field, an injected (side-channel) field, or unsupported
//! in server mode, plus the API key name and the value type to coerce to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::RequestParam;

/// How a flag is carried to the server backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Passed on the server command line; a change forces a restart.
    StartupArg,
    /// A field the generation API accepts natively.
    ApiStandard,
    /// Smuggled to the backend inside the prompt text.
    #[default]
    ApiInjected,
    /// Not usable in server mode at all.
    Unsupported,
}

/// Value type a flag's API field is coerced to before serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Text,
    Int,
    Float,
}

/// Mapping entry for one flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagRule {
    /// Transport class of the flag.
    #[serde(rename = "type")]
    pub kind: FlagKind,
    /// API key name; derived from the flag when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Declared value type for coercion.
    #[serde(default)]
    pub value_type: ValueType,
}

/// Errors raised while loading the mapping file.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read flags mapping {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse flags mapping {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk shape: `{ "flags": { "--steps": { ... } } }`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingDocument {
    #[serde(default)]
    flags: HashMap<String, FlagRule>,
}

/// Flag -> rule lookup table.
#[derive(Debug, Clone, Default)]
pub struct FlagMap {
    rules: HashMap<String, FlagRule>,
}

impl FlagMap {
    /// Build a map directly from rules (used by tests and embedders).
    #[must_use]
    pub fn from_rules(rules: HashMap<String, FlagRule>) -> Self {
        Self { rules }
    }

    /// Load the mapping from a JSON document. A missing file yields an
    /// empty map, which routes every parameter through the side channel.
    pub fn load(path: &Path) -> Result<Self, MappingError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "flags mapping file not found, using empty map");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| MappingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: MappingDocument =
            serde_json::from_str(&raw).map_err(|source| MappingError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { rules: doc.flags })
    }

    /// Look up the rule for a flag.
    #[must_use]
    pub fn get(&self, flag: &str) -> Option<&FlagRule> {
        self.rules.get(flag)
    }

    /// API key for a flag: the declared key, or the flag name with
    /// leading dashes stripped and inner dashes underscored.
    #[must_use]
    pub fn api_key(&self, flag: &str) -> String {
        self.get(flag)
            .and_then(|r| r.key.clone())
            .unwrap_or_else(|| derive_key(flag))
    }

    /// True when any parameter is marked unsupported in server mode.
    #[must_use]
    pub fn has_unsupported(&self, params: &[RequestParam]) -> bool {
        params
            .iter()
            .any(|p| matches!(self.get(&p.flag), Some(r) if r.kind == FlagKind::Unsupported))
    }
}

fn derive_key(flag: &str) -> String {
    flag.trim_start_matches('-').replace('-', "_")
}
