//! Core shared types for the cross-environment release engine.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod kind;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Source/target object identities and the per-run identifier.
pub use ids::{ObjectId, RunId};
/// Remote resource kinds and URL helpers.
pub use kind::{ObjectKind, extract_id_from_url, replace_id_in_url};
