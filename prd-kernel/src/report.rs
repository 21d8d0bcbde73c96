//! Per-run outcome summary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use prd_primitives::{ObjectId, ObjectKind, RunId};
use serde::Serialize;

use crate::phase::Phase;

/// A failure confined to one object (or one dependency edge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    /// Phase in which the failure happened.
    pub phase: Phase,
    /// Kind of the affected object.
    pub kind: ObjectKind,
    /// Source id of the affected object.
    pub source_id: ObjectId,
    /// Field path involved, when the failure concerns a single field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Human-readable cause.
    pub message: String,
}

impl UnitFailure {
    /// Creates a failure without a field path.
    #[must_use]
    pub fn new(
        phase: Phase,
        kind: ObjectKind,
        source_id: ObjectId,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            phase,
            kind,
            source_id,
            path: None,
            message: message.to_string(),
        }
    }

    /// Attaches the field path involved.
    #[must_use]
    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.phase, self.kind, self.source_id)?;
        if let Some(path) = &self.path {
            write!(f, " at `{path}`")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Hook left pointing at the private-hook placeholder URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderHook {
    /// Source id.
    pub source_id: ObjectId,
    /// Target id.
    pub target_id: ObjectId,
    /// Hook name on the target.
    pub name: String,
    /// Target object URL.
    pub url: String,
}

impl fmt::Display for PlaceholderHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.target_id, self.url)
    }
}

/// Summary returned by a release.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    /// Run identifier, also present on every log line of the run.
    pub run_id: RunId,
    /// The run stopped after validation.
    pub dry_run: bool,
    /// Number of objects released per kind.
    pub released: BTreeMap<ObjectKind, usize>,
    /// Objects skipped because of an `ignore` directive.
    pub ignored: Vec<(ObjectKind, ObjectId)>,
    /// Target ids that did not exist in the mapping before the run.
    pub created: BTreeSet<ObjectId>,
    /// Number of objects whose overrides were applied.
    pub overrides_applied: usize,
    /// Private hooks still pointing at the placeholder URL.
    pub placeholder_hooks: Vec<PlaceholderHook>,
    /// Every isolated failure, in the order it was folded.
    pub failures: Vec<UnitFailure>,
}

impl ReleaseReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(run_id: RunId, dry_run: bool) -> Self {
        Self {
            run_id,
            dry_run,
            released: BTreeMap::new(),
            ignored: Vec::new(),
            created: BTreeSet::new(),
            overrides_applied: 0,
            placeholder_hooks: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Returns `true` when no unit failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures recorded in `phase`.
    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &UnitFailure> {
        self.failures
            .iter()
            .filter(move |failure| failure.phase == phase)
    }

    pub(crate) fn record_released(&mut self, kind: ObjectKind) {
        *self.released.entry(kind).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_includes_path() {
        let failure = UnitFailure::new(
            Phase::Overrides,
            ObjectKind::Hook,
            ObjectId::new(7),
            "no record",
        )
        .at_path("config.url");
        assert_eq!(
            failure.to_string(),
            "[overrides] hook 7 at `config.url`: no record"
        );
    }

    #[test]
    fn counts_released_objects() {
        let mut report = ReleaseReport::new(RunId::random(), false);
        report.record_released(ObjectKind::Queue);
        report.record_released(ObjectKind::Queue);
        assert_eq!(report.released[&ObjectKind::Queue], 2);
        assert!(report.is_clean());
    }
}
