//! Remote object store contract shared by the HTTP and in-memory backends.

use async_trait::async_trait;
use prd_primitives::{ObjectId, ObjectKind};
use serde_json::Value;
use thiserror::Error;

/// Result alias used by object stores.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type shared by object store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store is misconfigured or missing credentials.
    #[error("store not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// Transport-level failures (network, TLS, timeouts).
    #[error("store transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The remote side answered with a non-success status.
    #[error("store returned {status}: {reason}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or other detail.
        reason: String,
    },

    /// The remote side answered with a body that could not be interpreted.
    #[error("store response error: {reason}")]
    Response {
        /// Additional context about the response failure.
        reason: String,
    },

    /// The addressed object does not exist.
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// Kind of the missing object.
        kind: ObjectKind,
        /// Identity of the missing object.
        id: ObjectId,
    },
}

impl StoreError {
    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for malformed responses.
    #[must_use]
    pub fn response(reason: impl Into<String>) -> Self {
        Self::Response {
            reason: reason.into(),
        }
    }
}

/// Remote system of record for configuration objects.
///
/// Payloads are opaque JSON objects. Every successful write returns the
/// object as stored remotely, including its `id` and `url`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Base API URL without a trailing slash, e.g. `https://host/api/v1`.
    fn base_url(&self) -> &str;

    /// Creates a new object.
    async fn create(&self, kind: ObjectKind, payload: &Value) -> StoreResult<Value>;

    /// Partially updates an existing object.
    async fn update(&self, kind: ObjectKind, id: ObjectId, payload: &Value) -> StoreResult<Value>;

    /// Fetches a single object.
    async fn get(&self, kind: ObjectKind, id: ObjectId) -> StoreResult<Value>;

    /// Fetches every object of `kind`, following pagination.
    async fn list_all(&self, kind: ObjectKind) -> StoreResult<Vec<Value>>;

    /// Instantiates a hook from the template referenced by `payload.hook_template`.
    async fn create_from_template(&self, payload: &Value) -> StoreResult<Value>;

    /// Returns the user the store's API token belongs to, or `None` when the
    /// remote side does not disclose it.
    async fn token_owner(&self) -> StoreResult<Option<ObjectId>>;

    /// Builds the canonical URL of an object in this store.
    fn object_url(&self, kind: ObjectKind, id: ObjectId) -> String {
        format!("{}/{}/{id}", self.base_url(), kind.collection())
    }
}

/// Reads the `id` field of a stored object.
///
/// # Errors
///
/// Returns [`StoreError::Response`] when the field is missing or not an
/// unsigned integer.
pub fn object_id(object: &Value) -> StoreResult<ObjectId> {
    object
        .get("id")
        .and_then(Value::as_u64)
        .map(ObjectId::new)
        .ok_or_else(|| StoreError::response("stored object carries no numeric `id`"))
}
