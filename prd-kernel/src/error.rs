//! Error types for release coordination.

use prd_adapters::prompt::PromptError;
use prd_adapters::source::SourceError;
use prd_adapters::store::StoreError;
use prd_mapping::MappingError;
use prd_override::OverrideError;
use prd_primitives::{ObjectId, ObjectKind};
use thiserror::Error;

use crate::phase::PhaseError;
use crate::report::UnitFailure;

/// Errors that stop a release, or that describe why a single unit failed.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// An id is absent from the mapping, the lookup table, or the source.
    #[error("{kind} {id} not found: {reason}")]
    NotFound {
        /// Kind of the missing object.
        kind: ObjectKind,
        /// Source id of the missing object.
        id: ObjectId,
        /// Where it was looked up.
        reason: String,
    },
    /// An override reference could not be resolved.
    #[error(transparent)]
    Resolution(#[from] OverrideError),
    /// A remote store call failed.
    #[error(transparent)]
    Remote(#[from] StoreError),
    /// The override dry run failed; nothing was released.
    #[error("attribute override validation failed ({} problem(s))", .failures.len())]
    Validation {
        /// Every failing node and path.
        failures: Vec<UnitFailure>,
    },
    /// The source environment could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The mapping could not be loaded, queried, or saved.
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// The operator could not be asked.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// The release cannot start with the given configuration.
    #[error("release not configured: {reason}")]
    Config {
        /// Additional context for the failure.
        reason: String,
    },
    /// The phase controller rejected a transition.
    #[error(transparent)]
    Phase(#[from] PhaseError),
}

impl ReleaseError {
    /// Convenience constructor for configuration problems.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for missing objects.
    #[must_use]
    pub fn not_found(kind: ObjectKind, id: ObjectId, reason: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id,
            reason: reason.into(),
        }
    }
}

/// Result alias for release operations.
pub type ReleaseResult<T> = Result<T, ReleaseError>;
