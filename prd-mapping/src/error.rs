//! Error types for the mapping subsystem.

use prd_primitives::ObjectId;
use thiserror::Error;

/// Errors emitted while reading, validating, or querying the mapping.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The requested source id has no node among the searched siblings.
    #[error("object {id} has no mapping entry")]
    NotFound {
        /// Source id that was looked up.
        id: ObjectId,
    },
    /// The same source id appears more than once in the tree.
    #[error("object {id} is mapped more than once")]
    DuplicateId {
        /// The repeated source id.
        id: ObjectId,
    },
    /// Underlying I/O failure while reading or writing the mapping file.
    #[error("i/o error: {source}")]
    Io {
        /// Source [`std::io::Error`].
        #[from]
        source: std::io::Error,
    },
    /// The mapping document could not be parsed or rendered.
    #[error("mapping format error: {source}")]
    Format {
        /// Source [`serde_yaml::Error`].
        #[from]
        source: serde_yaml::Error,
    },
}

/// Result type alias for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;
