//! Declarative function list.
//!
//! Functions are declared in JSON, loaded once at startup:
//!
//! ```json
//! { "functions": [
//!     { "name": "greet", "parameters": ["string"], "returns": ["string"] }
//! ] }
//! ```
//!
//! Type strings use the descriptor grammar (`array<int>`,
//! `object<string,array<string>>`). Every problem is reported here, at load
//! time, never when a function is called.

use crate::error::SignatureError;
use crate::schema::{FunctionSignature, TypeDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Dotted identifiers, e.g. `greet` or `strings.split`.
static FUNCTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid function declarations: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid function name `{0}`")]
    InvalidName(String),
    #[error("Function `{0}` is declared more than once")]
    DuplicateName(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// One declared guest function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<TypeDescriptor>,
    pub returns: Vec<TypeDescriptor>,
}

impl FunctionDeclaration {
    pub fn signature(&self) -> Result<FunctionSignature, ConfigError> {
        if !FUNCTION_NAME.is_match(&self.name) {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        Ok(FunctionSignature::new(
            self.name.clone(),
            self.parameters.clone(),
            self.returns.clone(),
        )?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub functions: Vec<FunctionDeclaration>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate declarations.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.signatures()?;
        Ok(config)
    }

    /// Validated signatures, in declaration order.
    pub fn signatures(&self) -> Result<Vec<FunctionSignature>, ConfigError> {
        let mut seen = HashSet::new();
        self.functions
            .iter()
            .map(|decl| {
                if !seen.insert(decl.name.as_str()) {
                    return Err(ConfigError::DuplicateName(decl.name.clone()));
                }
                decl.signature()
            })
            .collect()
    }
}
