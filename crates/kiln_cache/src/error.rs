//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// Reads of cached artifacts are fail-safe and never produce these errors:
/// a missing or damaged artifact is a cache miss. Everything else (stat
/// failures, frozen-snapshot misses, writes, compiler failures) propagates
/// to the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A frozen tracker was asked about a file that is not in its snapshot.
    #[error("asked for {path} but it was not precompiled")]
    NotPrecompiled {
        /// The requested path.
        path: PathBuf,
    },

    /// The file could not be stat'ed or is not a regular file.
    #[error("can't stat {path}: {source}")]
    Stat {
        /// The path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The injected compile callback failed.
    #[error("failed to compile {path}: {source}")]
    Compile {
        /// The file being compiled.
        path: PathBuf,
        /// The error reported by the compiler.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The cache configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] kiln_config::ConfigError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
