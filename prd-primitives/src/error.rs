//! Shared error definitions for primitive types.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used by the primitive types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided run identifier could not be parsed.
    #[error("invalid run id: {source}")]
    InvalidRunId {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Object identifier was not a positive integer.
    #[error("invalid object id `{value}`")]
    InvalidObjectId {
        /// The offending input.
        value: String,
    },

    /// Resource kind could not be derived from a name or URL.
    #[error("unknown object kind `{value}`")]
    UnknownKind {
        /// The offending input.
        value: String,
    },
}
