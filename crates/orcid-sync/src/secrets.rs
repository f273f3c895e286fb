//! Resolution of the ORCID client secret.
//!
//! A secret can be given inline, read from a file (Docker/Kubernetes secret
//! mounts) or read from an environment variable. The first non-empty source
//! in that order wins.

use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No source configured for {what} (set a value, a file or an env var)")]
    NoSourceProvided { what: String },

    #[error("Failed to read {what} from file '{path}': {source}")]
    FileRead {
        what: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} file '{path}' is empty")]
    EmptyFile { what: String, path: String },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a secret comes from, as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretSource {
    pub value: Option<String>,
    pub file: Option<String>,
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn from_env_var(name: impl Into<String>) -> Self {
        Self {
            env_var: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        [&self.value, &self.file, &self.env_var]
            .iter()
            .any(|s| s.as_deref().is_some_and(|s| !s.is_empty()))
    }

    /// `what` names the secret in error messages.
    pub fn resolve(&self, what: &str) -> Result<SecretString> {
        resolve_secret(
            what,
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }
}

/// Resolves a secret from an inline value, a file, or an environment variable.
/// File and env values are trimmed.
pub fn resolve_secret(
    what: &str,
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileRead {
            what: what.to_string(),
            path: expanded.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::EmptyFile {
                what: what.to_string(),
                path: expanded,
            });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided {
        what: what.to_string(),
    })
}

/// Expands a leading `~` or `~/` to the home directory. `~user` is not supported.
pub fn expand_home(path: &str) -> String {
    if path != "~" && !path.starts_with("~/") {
        return path.to_string();
    }
    match dirs::home_dir() {
        Some(home) if path == "~" => home.to_string_lossy().into_owned(),
        Some(home) => home.join(&path[2..]).to_string_lossy().into_owned(),
        None => path.to_string(),
    }
}

/// Like `expand_home`, returning a path.
pub fn expand_home_path(path: &str) -> PathBuf {
    PathBuf::from(expand_home(path))
}
