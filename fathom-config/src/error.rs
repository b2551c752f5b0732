use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("invalid storage root '{root}': {message}")]
    Root { root: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
