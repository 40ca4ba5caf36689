//! Error types for docbuilder.
//!
//! Library crates use [`DocBuilderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docbuilder operations.
#[derive(Debug, thiserror::Error)]
pub enum DocBuilderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed registry metadata.
    #[error("registry error: {message}")]
    Registry { message: String },

    /// Build script could not be parsed or rewritten.
    #[error("script error: {message}")]
    Script { message: String },

    /// The package could not be fetched or installed at all.
    #[error("package {package} is unusable: {reason}")]
    Install { package: String, reason: String },

    /// A git operation (clone/checkout) failed.
    #[error("git error: {0}")]
    Git(String),

    /// Spawning or supervising a subprocess failed.
    #[error("process error: {0}")]
    Process(String),

    /// Network/HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// Data validation error (invalid version, bad path, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The batch was cancelled before this operation finished.
    #[error("cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocBuilderError>;

impl DocBuilderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a registry error from any displayable message.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry {
            message: msg.into(),
        }
    }

    /// Create a script error from any displayable message.
    pub fn script(msg: impl Into<String>) -> Self {
        Self::Script {
            message: msg.into(),
        }
    }

    /// Create the job-fatal "package unusable" error.
    pub fn install(package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Install {
            package: package.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
