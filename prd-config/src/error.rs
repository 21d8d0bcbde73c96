//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling the release configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A configuration file is not valid JSON or has the wrong shape.
    #[error("malformed {}: {reason}", path.display())]
    Format {
        /// Offending path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
    /// The configuration is well-formed but unusable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Additional context for the failure.
        reason: String,
    },
}

impl ConfigError {
    /// Convenience constructor for semantic configuration errors.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
