//! Override dry run over the whole mapping, before anything is released.

use prd_adapters::source::ObjectSource;
use prd_mapping::{LookupTable, Mapping, NodeRef};
use prd_override::{ResolveMode, resolve};
use tracing::{debug, warn};

use crate::error::ReleaseError;
use crate::phase::Phase;
use crate::report::UnitFailure;

/// Resolves every active override table against the pre-release lookup table.
///
/// Cross-references are only checked for presence in `lookup`; nothing is
/// written anywhere. Returns every problem found, in traversal order.
pub(crate) async fn validate_overrides(
    mapping: &Mapping,
    source: &dyn ObjectSource,
    lookup: &LookupTable,
) -> Vec<UnitFailure> {
    let mut failures = Vec::new();
    let mut checked = 0usize;

    for NodeRef { kind, node } in mapping.traverse_active() {
        let Some(overrides) = node.overrides().filter(|overrides| !overrides.is_empty()) else {
            continue;
        };
        checked += 1;

        let payload = match source.load(kind, node.id).await {
            Ok(Some(object)) => object.payload,
            Ok(None) => {
                failures.push(UnitFailure::new(
                    Phase::Validating,
                    kind,
                    node.id,
                    ReleaseError::not_found(kind, node.id, "not present in the source"),
                ));
                continue;
            }
            Err(err) => {
                failures.push(UnitFailure::new(Phase::Validating, kind, node.id, err));
                continue;
            }
        };

        if let Err(err) = resolve(overrides, &payload, lookup, ResolveMode::DryRun) {
            warn!(%kind, source_id = %node.id, error = %err, "attribute override does not resolve");
            let mut failure = UnitFailure::new(Phase::Validating, kind, node.id, &err);
            if let Some(path) = err.path() {
                failure = failure.at_path(path);
            }
            failures.push(failure);
        }
    }

    debug!(checked, failed = failures.len(), "attribute overrides validated");
    failures
}
