//! Errors raised while loading `kiln.toml`.

use std::path::PathBuf;

/// Why a configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("can't read {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the expected shape.
    #[error("malformed configuration: {0}")]
    Parse(String),

    /// A required setting is absent or empty.
    #[error("`{0}` must be set")]
    MissingField(&'static str),

    /// Settings that are individually valid but contradict each other.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
