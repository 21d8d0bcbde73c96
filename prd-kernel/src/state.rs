//! Coordinator-owned maps rebuilt on every release.

use std::collections::HashMap;

use prd_adapters::store::object_id;
use prd_override::TargetRecords;
use prd_primitives::{ObjectId, extract_id_from_url, replace_id_in_url};
use serde_json::Value;

/// Source id to the object produced on the target side.
#[derive(Debug, Clone, Default)]
pub struct PairTable {
    records: HashMap<ObjectId, Value>,
}

impl PairTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the target object of `source_id`, returning the previous one.
    pub fn insert(&mut self, source_id: ObjectId, record: Value) -> Option<Value> {
        self.records.insert(source_id, record)
    }

    /// Target object of `source_id`.
    #[must_use]
    pub fn get(&self, source_id: ObjectId) -> Option<&Value> {
        self.records.get(&source_id)
    }

    /// Returns `true` when `source_id` was released in this run.
    #[must_use]
    pub fn contains(&self, source_id: ObjectId) -> bool {
        self.records.contains_key(&source_id)
    }

    /// Target id of `source_id`.
    #[must_use]
    pub fn target_id(&self, source_id: ObjectId) -> Option<ObjectId> {
        self.get(source_id).and_then(|record| object_id(record).ok())
    }

    /// Target URL of `source_id`.
    #[must_use]
    pub fn target_url(&self, source_id: ObjectId) -> Option<&str> {
        self.get(source_id)
            .and_then(|record| record.get("url"))
            .and_then(Value::as_str)
    }

    /// Rewrites a source object URL to its target counterpart.
    ///
    /// Prefers the target record's `url`; falls back to substituting the
    /// target id into the source URL. Returns `None` when the referenced
    /// object was not released.
    #[must_use]
    pub fn translate_url(&self, url: &str) -> Option<String> {
        let source_id = extract_id_from_url(url)?;
        if let Some(target_url) = self.target_url(source_id) {
            return Some(target_url.to_owned());
        }
        replace_id_in_url(url, self.target_id(source_id)?)
    }

    /// Re-keys the table by target id, as needed by override resolution.
    #[must_use]
    pub fn target_records(&self) -> TargetRecords {
        self.records
            .values()
            .filter_map(|record| object_id(record).ok().map(|id| (id, record.clone())))
            .collect()
    }

    /// Number of released objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when nothing has been released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source id to the payload read from the source during this run.
#[derive(Debug, Clone, Default)]
pub struct SourceCache {
    payloads: HashMap<ObjectId, Value>,
}

impl SourceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the payload most recently read for `source_id`.
    pub fn insert(&mut self, source_id: ObjectId, payload: Value) {
        self.payloads.insert(source_id, payload);
    }

    /// Payload of `source_id`.
    #[must_use]
    pub fn get(&self, source_id: ObjectId) -> Option<&Value> {
        self.payloads.get(&source_id)
    }

    /// Number of cached payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Returns `true` when nothing has been read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translates_urls_through_records() {
        let mut pairs = PairTable::new();
        pairs.insert(
            ObjectId::new(1),
            json!({"id": 101, "url": "https://dst/api/v1/hooks/101"}),
        );
        pairs.insert(ObjectId::new(2), json!({"id": 102}));

        assert_eq!(
            pairs.translate_url("https://src/api/v1/hooks/1").as_deref(),
            Some("https://dst/api/v1/hooks/101")
        );
        assert_eq!(
            pairs.translate_url("https://src/api/v1/hooks/2").as_deref(),
            Some("https://src/api/v1/hooks/102")
        );
        assert_eq!(pairs.translate_url("https://src/api/v1/hooks/3"), None);
    }

    #[test]
    fn target_records_are_keyed_by_target_id() {
        let mut pairs = PairTable::new();
        pairs.insert(ObjectId::new(42), json!({"id": 99, "name": "x"}));
        let records = pairs.target_records();
        assert_eq!(records[&ObjectId::new(99)]["name"], "x");
        assert_eq!(pairs.target_id(ObjectId::new(42)), Some(ObjectId::new(99)));
    }
}
