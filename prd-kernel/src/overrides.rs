//! Pushes resolved attribute overrides to released objects.

use std::sync::Arc;

use prd_adapters::store::{ObjectStore, object_id};
use prd_mapping::{LookupTable, Mapping, NodeRef};
use prd_override::{ResolveMode, resolve};
use prd_primitives::{ObjectId, ObjectKind};
use serde_json::Value;
use tracing::debug;

use crate::phase::Phase;
use crate::report::UnitFailure;
use crate::state::{PairTable, SourceCache};

/// A resolved override ready to be uploaded.
#[derive(Debug)]
pub(crate) struct OverrideJob {
    pub kind: ObjectKind,
    pub source_id: ObjectId,
    pub target_id: ObjectId,
    pub payload: Value,
}

/// Resolves every active override table against this run's target records.
///
/// Only objects released in this run are eligible. The resolved subset is
/// completed with the target `id` and `url` so the update addresses the right
/// object.
pub(crate) fn plan_overrides(
    mapping: &Mapping,
    cache: &SourceCache,
    pairs: &PairTable,
) -> (Vec<OverrideJob>, Vec<UnitFailure>) {
    let lookup = LookupTable::from_mapping(mapping);
    let records = pairs.target_records();
    let mut jobs = Vec::new();
    let mut failures = Vec::new();

    for NodeRef { kind, node } in mapping.traverse_active() {
        let Some(overrides) = node.overrides().filter(|overrides| !overrides.is_empty()) else {
            continue;
        };
        let fail = |message: &dyn std::fmt::Display| {
            UnitFailure::new(Phase::Overrides, kind, node.id, message)
        };

        let (Some(record), Some(source)) = (pairs.get(node.id), cache.get(node.id)) else {
            failures.push(fail(&"object was not released in this run"));
            continue;
        };
        let target_id = match object_id(record) {
            Ok(id) => id,
            Err(err) => {
                failures.push(fail(&err));
                continue;
            }
        };

        match resolve(overrides, source, &lookup, ResolveMode::Apply(&records)) {
            Ok(mut payload) => {
                payload.insert("id".to_owned(), Value::from(target_id.get()));
                if let Some(url) = record.get("url") {
                    payload.insert("url".to_owned(), url.clone());
                }
                jobs.push(OverrideJob {
                    kind,
                    source_id: node.id,
                    target_id,
                    payload: Value::Object(payload),
                });
            }
            Err(err) => {
                let mut failure = fail(&err);
                if let Some(path) = err.path() {
                    failure = failure.at_path(path);
                }
                failures.push(failure);
            }
        }
    }

    (jobs, failures)
}

/// Uploads one resolved override.
pub(crate) async fn apply_override(
    store: Arc<dyn ObjectStore>,
    job: OverrideJob,
) -> Result<(ObjectId, Value), UnitFailure> {
    match store.update(job.kind, job.target_id, &job.payload).await {
        Ok(record) => {
            debug!(kind = %job.kind, source_id = %job.source_id, target_id = %job.target_id, "override applied");
            Ok((job.source_id, record))
        }
        Err(err) => Err(UnitFailure::new(
            Phase::Overrides,
            job.kind,
            job.source_id,
            &err,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prd_adapters::memory::InMemoryObjectStore;
    use prd_mapping::MappingNode;
    use serde_json::json;

    fn id(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    fn mapping() -> Mapping {
        let mut org = MappingNode::new(id(1), "org").with_target(id(100));
        org.hooks = vec![
            MappingNode::new(id(42), "a").with_target(id(99)),
            MappingNode::new(id(43), "b")
                .with_target(id(98))
                .with_override(
                    serde_json::from_value(json!({
                        "config.url": "$prd_ref:42.config.url",
                        "name": "renamed"
                    }))
                    .unwrap(),
                ),
        ];
        Mapping::new(org)
    }

    fn state() -> (SourceCache, PairTable) {
        let mut cache = SourceCache::new();
        cache.insert(id(43), json!({"id": 43, "name": "b", "config": {"url": "old", "x": 1}}));
        let mut pairs = PairTable::new();
        pairs.insert(id(42), json!({"id": 99, "config": {"url": "https://x"}}));
        pairs.insert(id(43), json!({"id": 98, "url": "https://dst/api/v1/hooks/98"}));
        (cache, pairs)
    }

    #[test]
    fn resolved_subset_addresses_target() {
        let (cache, pairs) = state();
        let (jobs, failures) = plan_overrides(&mapping(), &cache, &pairs);
        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target_id, id(98));
        assert_eq!(
            jobs[0].payload,
            json!({
                "config": {"url": "https://x", "x": 1},
                "name": "renamed",
                "id": 98,
                "url": "https://dst/api/v1/hooks/98"
            })
        );
    }

    #[test]
    fn unreleased_objects_fail_individually() {
        let (cache, released) = state();
        let mut pairs = PairTable::new();
        pairs.insert(id(42), released.get(id(42)).cloned().unwrap());

        let (jobs, failures) = plan_overrides(&mapping(), &cache, &pairs);
        assert!(jobs.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].phase, Phase::Overrides);
    }

    #[tokio::test]
    async fn apply_updates_target_record() {
        let store = Arc::new(InMemoryObjectStore::new());
        store
            .insert(ObjectKind::Hook, id(98), json!({"name": "b"}))
            .await;
        let job = OverrideJob {
            kind: ObjectKind::Hook,
            source_id: id(43),
            target_id: id(98),
            payload: json!({"name": "renamed"}),
        };
        let (source_id, record) = apply_override(store, job).await.unwrap();
        assert_eq!(source_id, id(43));
        assert_eq!(record["name"], "renamed");
    }
}
