//! CLI error type.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// A file could not be read or written.
    #[error("cannot access {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The scenario file is not valid JSON for a scenario.
    #[error("invalid scenario {path}: {source}")]
    Scenario {
        /// File path.
        path: PathBuf,
        /// Parse error.
        source: serde_json::Error,
    },

    /// A saved state could not be written.
    #[error("cannot encode state: {0}")]
    Encode(String),

    /// A saved state could not be read back.
    #[error("cannot decode state {path}: {message}")]
    Decode {
        /// File path.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// A command-line value is out of range.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// JSON output failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
