//! Error types for override parsing and resolution.

use thiserror::Error;

/// Result alias for override operations.
pub type OverrideResult<T> = Result<T, OverrideError>;

/// Errors produced while parsing or evaluating attribute overrides.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OverrideError {
    /// A field path could not be parsed.
    #[error("invalid field path `{path}`: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A reference expression was malformed.
    #[error("invalid override expression `{expression}`: {reason}")]
    InvalidExpression {
        /// The raw expression text.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A reference could not be resolved against the available data.
    #[error("cannot resolve override for `{path}`: {reason}")]
    Resolution {
        /// Field path whose value could not be produced.
        path: String,
        /// Human-readable reason.
        reason: String,
    },
}

impl OverrideError {
    /// Convenience constructor for resolution failures.
    #[must_use]
    pub fn resolution(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for path parse failures.
    #[must_use]
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the field path the error refers to, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::InvalidPath { path, .. } | Self::Resolution { path, .. } => Some(path),
            Self::InvalidExpression { .. } => None,
        }
    }
}
