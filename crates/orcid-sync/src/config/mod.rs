//! YAML configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::secrets::SecretError;

pub mod loader;
pub mod schema;

pub use loader::{
    default_config_path, load_config, load_config_from_str, load_or_default, resolve_config_path,
    CONFIG_ENV_VAR,
};
pub use schema::{DatabaseConfig, HttpConfig, OrcidConfig, SchedulerConfig, SyncConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Cannot determine the home directory for the default config path")]
    NoHomeDirectory,

    #[error(transparent)]
    Secret(#[from] SecretError),
}
