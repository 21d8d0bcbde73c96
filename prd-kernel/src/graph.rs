//! Re-links hook predecessor lists once every hook exists on the target.

use std::sync::Arc;

use prd_adapters::store::ObjectStore;
use prd_primitives::{ObjectId, ObjectKind};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::phase::Phase;
use crate::report::UnitFailure;
use crate::state::PairTable;

/// One released hook and the predecessor URLs from its source payload.
#[derive(Debug, Clone)]
pub(crate) struct GraphJob {
    pub source_id: ObjectId,
    pub target_id: ObjectId,
    pub predecessors: Vec<String>,
}

impl GraphJob {
    /// Builds a job when `payload` lists predecessors.
    pub(crate) fn from_payload(source_id: ObjectId, target_id: ObjectId, payload: &Value) -> Option<Self> {
        let predecessors: Vec<String> = payload
            .get("run_after")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
        (!predecessors.is_empty()).then_some(Self {
            source_id,
            target_id,
            predecessors,
        })
    }
}

/// What happened to one hook's predecessor list.
#[derive(Debug)]
pub(crate) struct GraphOutcome {
    pub source_id: ObjectId,
    /// Latest target record, when at least one edge was uploaded.
    pub record: Option<Value>,
    pub linked: usize,
    pub failures: Vec<UnitFailure>,
}

/// Uploads the translated predecessor list one edge at a time.
///
/// Predecessors that were not released in this run are dropped. A failed
/// upload removes its edge from the list and the next edge carries on, so the
/// target keeps every edge that succeeded before it.
pub(crate) async fn link_predecessors(
    store: Arc<dyn ObjectStore>,
    pairs: Arc<PairTable>,
    job: GraphJob,
) -> GraphOutcome {
    let mut run_after: Vec<Value> = Vec::with_capacity(job.predecessors.len());
    let mut record = None;
    let mut failures = Vec::new();

    for predecessor in &job.predecessors {
        let Some(url) = pairs.translate_url(predecessor) else {
            debug!(source_id = %job.source_id, %predecessor, "predecessor not released; edge dropped");
            continue;
        };
        run_after.push(Value::String(url));
        match store
            .update(
                ObjectKind::Hook,
                job.target_id,
                &json!({ "run_after": run_after }),
            )
            .await
        {
            Ok(updated) => record = Some(updated),
            Err(err) => {
                warn!(source_id = %job.source_id, %predecessor, error = %err, "predecessor edge failed");
                run_after.pop();
                failures.push(
                    UnitFailure::new(Phase::HookGraph, ObjectKind::Hook, job.source_id, &err)
                        .at_path("run_after"),
                );
            }
        }
    }

    GraphOutcome {
        source_id: job.source_id,
        record,
        linked: run_after.len(),
        failures,
    }
}
