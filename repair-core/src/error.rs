//! Repair error types
//!
//! Configuration problems are fatal and surface at construction time.
//! Build failures are not errors at all: they are the steady state that
//! drives the repair loop and travel inside `BuildResult`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for repair-core operations
pub type RepairResult<T> = Result<T, RepairError>;

/// Errors raised while constructing or wiring repair components
#[derive(Error, Debug)]
pub enum RepairError {
    /// Backend selection was ambiguous or unresolved, a required toolchain
    /// is missing, or the configuration is otherwise unusable.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Configuration file could not be parsed
    #[error("Invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RepairError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should stop a session before it starts.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::ConfigParse { .. })
    }
}
