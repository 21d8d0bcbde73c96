//! Deterministic in-process object store.
//!
//! Used by tests and offline rehearsals. Every call is recorded, and failures
//! can be scheduled for specific calls to exercise error isolation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use prd_primitives::{ObjectId, ObjectKind};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{ObjectStore, StoreError, StoreResult};

const DEFAULT_BASE_URL: &str = "https://memory.invalid/api/v1";

/// Store operation, as recorded in the call log.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StoreOp {
    /// [`ObjectStore::create`].
    Create,
    /// [`ObjectStore::update`].
    Update,
    /// [`ObjectStore::get`].
    Get,
    /// [`ObjectStore::list_all`].
    List,
    /// [`ObjectStore::create_from_template`].
    CreateFromTemplate,
    /// [`ObjectStore::token_owner`].
    TokenOwner,
}

/// One recorded store call.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreCall {
    /// Operation invoked.
    pub op: StoreOp,
    /// Kind addressed by the call.
    pub kind: ObjectKind,
    /// Addressed id for updates and gets; assigned id for successful creates.
    pub id: Option<ObjectId>,
    /// Payload sent with the call, if any.
    pub payload: Option<Value>,
    /// Whether the call failed.
    pub failed: bool,
}

/// A scheduled failure.
///
/// Matches calls by operation, kind and optionally id. The first `skip`
/// matching calls succeed, the next one fails, and the rule is then spent.
#[derive(Clone, Debug)]
pub struct Failure {
    op: StoreOp,
    kind: ObjectKind,
    id: Option<ObjectId>,
    skip: usize,
}

impl Failure {
    /// Fails the next matching call.
    #[must_use]
    pub fn on(op: StoreOp, kind: ObjectKind) -> Self {
        Self {
            op,
            kind,
            id: None,
            skip: 0,
        }
    }

    /// Restricts the rule to calls addressing `id`.
    #[must_use]
    pub fn for_id(mut self, id: ObjectId) -> Self {
        self.id = Some(id);
        self
    }

    /// Lets `count` matching calls through before failing.
    #[must_use]
    pub fn after(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    fn matches(&self, op: StoreOp, kind: ObjectKind, id: Option<ObjectId>) -> bool {
        self.op == op && self.kind == kind && (self.id.is_none() || self.id == id)
    }
}

#[derive(Debug)]
struct MemoryState {
    objects: BTreeMap<(ObjectKind, ObjectId), Value>,
    next_id: u64,
    calls: Vec<StoreCall>,
    failures: Vec<Failure>,
    token_owner: Option<ObjectId>,
}

/// In-memory [`ObjectStore`] with sequential id assignment.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    base_url: String,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Creates an empty store assigning ids from 1000 upwards.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            state: Mutex::new(MemoryState {
                objects: BTreeMap::new(),
                next_id: 1000,
                calls: Vec::new(),
                failures: Vec::new(),
                token_owner: None,
            }),
        }
    }

    /// Overrides the base URL used to build object URLs.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Reports `owner` as the user behind the store's token.
    #[must_use]
    pub fn with_token_owner(mut self, owner: ObjectId) -> Self {
        self.state.get_mut().token_owner = Some(owner);
        self
    }

    /// Seeds an object under `id` without recording a call.
    ///
    /// `id` and `url` are filled in on the stored payload.
    pub async fn insert(&self, kind: ObjectKind, id: ObjectId, payload: Value) -> Value {
        let stored = self.stamp(kind, id, payload);
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(id.get() + 1);
        state.objects.insert((kind, id), stored.clone());
        stored
    }

    /// Schedules a failure.
    pub async fn fail(&self, failure: Failure) {
        self.state.lock().await.failures.push(failure);
    }

    /// Returns the call log in invocation order.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    /// Returns the stored object, without recording a call.
    pub async fn object(&self, kind: ObjectKind, id: ObjectId) -> Option<Value> {
        self.state.lock().await.objects.get(&(kind, id)).cloned()
    }

    /// Returns every stored object of `kind`, ordered by id.
    pub async fn objects(&self, kind: ObjectKind) -> Vec<Value> {
        self.state
            .lock()
            .await
            .objects
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn stamp(&self, kind: ObjectKind, id: ObjectId, payload: Value) -> Value {
        let mut object = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        object.insert("id".to_owned(), Value::from(id.get()));
        object.insert("url".to_owned(), Value::String(self.object_url(kind, id)));
        Value::Object(object)
    }

    fn record(
        state: &mut MemoryState,
        op: StoreOp,
        kind: ObjectKind,
        id: Option<ObjectId>,
        payload: Option<&Value>,
    ) -> StoreResult<()> {
        let failed = match state
            .failures
            .iter()
            .position(|failure| failure.matches(op, kind, id))
        {
            Some(index) if state.failures[index].skip == 0 => {
                state.failures.remove(index);
                true
            }
            Some(index) => {
                state.failures[index].skip -= 1;
                false
            }
            None => false,
        };

        state.calls.push(StoreCall {
            op,
            kind,
            id,
            payload: payload.cloned(),
            failed,
        });

        if failed {
            debug!(?op, %kind, ?id, "injected store failure");
            return Err(StoreError::Status {
                status: 500,
                reason: format!("injected failure for {op:?} {kind}"),
            });
        }
        Ok(())
    }

    async fn insert_new(&self, op: StoreOp, kind: ObjectKind, payload: &Value) -> StoreResult<Value> {
        let mut state = self.state.lock().await;
        Self::record(&mut state, op, kind, None, Some(payload))?;

        let id = ObjectId::new(state.next_id);
        state.next_id += 1;
        let stored = self.stamp(kind, id, payload.clone());
        state.objects.insert((kind, id), stored.clone());
        if let Some(call) = state.calls.last_mut() {
            call.id = Some(id);
        }
        Ok(stored)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn create(&self, kind: ObjectKind, payload: &Value) -> StoreResult<Value> {
        self.insert_new(StoreOp::Create, kind, payload).await
    }

    async fn update(&self, kind: ObjectKind, id: ObjectId, payload: &Value) -> StoreResult<Value> {
        let mut state = self.state.lock().await;
        Self::record(&mut state, StoreOp::Update, kind, Some(id), Some(payload))?;

        let existing = state
            .objects
            .get_mut(&(kind, id))
            .ok_or(StoreError::NotFound { kind, id })?;
        if let (Value::Object(target), Value::Object(changes)) = (&mut *existing, payload) {
            for (key, value) in changes {
                if key != "id" && key != "url" {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(existing.clone())
    }

    async fn get(&self, kind: ObjectKind, id: ObjectId) -> StoreResult<Value> {
        let mut state = self.state.lock().await;
        Self::record(&mut state, StoreOp::Get, kind, Some(id), None)?;
        state
            .objects
            .get(&(kind, id))
            .cloned()
            .ok_or(StoreError::NotFound { kind, id })
    }

    async fn list_all(&self, kind: ObjectKind) -> StoreResult<Vec<Value>> {
        let mut state = self.state.lock().await;
        Self::record(&mut state, StoreOp::List, kind, None, None)?;
        Ok(state
            .objects
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn create_from_template(&self, payload: &Value) -> StoreResult<Value> {
        self.insert_new(StoreOp::CreateFromTemplate, ObjectKind::Hook, payload)
            .await
    }

    async fn token_owner(&self) -> StoreResult<Option<ObjectId>> {
        let mut state = self.state.lock().await;
        let owner = state.token_owner;
        Self::record(&mut state, StoreOp::TokenOwner, ObjectKind::User, owner, None)?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_assigns_ids_and_urls() {
        let store = InMemoryObjectStore::new().with_base_url("https://t/api/v1/");
        let created = store
            .create(ObjectKind::Schema, &json!({"name": "s"}))
            .await
            .unwrap();
        assert_eq!(created["id"], 1000);
        assert_eq!(created["url"], "https://t/api/v1/schemas/1000");

        let calls = store.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, Some(ObjectId::new(1000)));
    }

    #[tokio::test]
    async fn update_merges_top_level_keys() {
        let store = InMemoryObjectStore::new();
        let id = ObjectId::new(5);
        store
            .insert(ObjectKind::Hook, id, json!({"name": "h", "active": true}))
            .await;

        let updated = store
            .update(ObjectKind::Hook, id, &json!({"active": false, "id": 99}))
            .await
            .unwrap();
        assert_eq!(updated["name"], "h");
        assert_eq!(updated["active"], false);
        assert_eq!(updated["id"], 5);

        let missing = store
            .update(ObjectKind::Hook, ObjectId::new(6), &json!({}))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn scheduled_failures_fire_once() {
        let store = InMemoryObjectStore::new();
        let id = ObjectId::new(1);
        store.insert(ObjectKind::Hook, id, json!({})).await;
        store
            .fail(Failure::on(StoreOp::Update, ObjectKind::Hook).for_id(id).after(1))
            .await;

        let payload = json!({"run_after": []});
        assert!(store.update(ObjectKind::Hook, id, &payload).await.is_ok());
        assert!(store.update(ObjectKind::Hook, id, &payload).await.is_err());
        assert!(store.update(ObjectKind::Hook, id, &payload).await.is_ok());

        let failed: Vec<_> = store.calls().await.iter().map(|c| c.failed).collect();
        assert_eq!(failed, [false, true, false]);
    }

    #[tokio::test]
    async fn token_owner_is_recorded() {
        let anonymous = InMemoryObjectStore::new();
        assert_eq!(anonymous.token_owner().await.unwrap(), None);

        let store = InMemoryObjectStore::new().with_token_owner(ObjectId::new(42));
        assert_eq!(store.token_owner().await.unwrap(), Some(ObjectId::new(42)));
        let calls = store.calls().await;
        assert_eq!(calls[0].op, StoreOp::TokenOwner);
        assert_eq!(calls[0].kind, ObjectKind::User);
    }

    #[tokio::test]
    async fn seeded_ids_are_not_reused() {
        let store = InMemoryObjectStore::new();
        store
            .insert(ObjectKind::Queue, ObjectId::new(2000), json!({}))
            .await;
        let created = store.create(ObjectKind::Queue, &json!({})).await.unwrap();
        assert_eq!(created["id"], 2001);
        assert_eq!(store.objects(ObjectKind::Queue).await.len(), 2);
    }
}
