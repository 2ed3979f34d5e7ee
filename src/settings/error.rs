//! Settings error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during settings loading.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read a settings file.
    #[error("failed to read settings file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a TOML settings file.
    #[error("failed to parse settings file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },
}
