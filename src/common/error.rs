//! Engine error types with permanent/recoverable classification

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer/domain.
///
/// Payloads are plain strings so errors can be cloned: a failed build is
/// recorded on the manifest state *and* may be returned up from the loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Action channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Watcher Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Watch error: {message}")]
    Watch { message: String },

    // ─────────────────────────────────────────────────────────────
    // Manifest Evaluation Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Manifest evaluation error: {message}")]
    Evaluate { message: String },

    #[error("Expected there to be 1 manifest for {name}, got {count}")]
    ManifestCount { name: String, count: usize },

    // ─────────────────────────────────────────────────────────────
    // Build/Deploy Errors
    // ─────────────────────────────────────────────────────────────
    #[error("build failed: {message}")]
    Build { message: String, permanent: bool },

    // ─────────────────────────────────────────────────────────────
    // Cluster Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Cluster error: {message}")]
    Cluster { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch {
            message: message.into(),
        }
    }

    pub fn evaluate(message: impl Into<String>) -> Self {
        Self::Evaluate {
            message: message.into(),
        }
    }

    /// A transient build failure: retried on the next file change.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            permanent: false,
        }
    }

    /// A build failure that no retry will fix (e.g. an unbuildable recipe).
    pub fn permanent_build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            permanent: true,
        }
    }

    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
        }
    }

    /// Check if this error should abort the engine even in watch mode.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Build { permanent: true, .. })
    }

    /// Check if this error is recoverable by a later rebuild.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Build {
                permanent: false,
                ..
            } | Error::Evaluate { .. }
                | Error::ManifestCount { .. }
                | Error::Cluster { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
