//! Evaluation of override tables against a source payload.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use prd_primitives::ObjectId;
use serde_json::{Map, Value};
use tracing::trace;

use crate::{AttributeOverride, OverrideError, OverrideExpr, OverrideResult};

/// Source id to target id projection consulted by cross-references.
pub trait TargetLookup {
    /// Returns the target identity of `source_id`, if it has one.
    fn target_of(&self, source_id: ObjectId) -> Option<ObjectId>;
}

impl<S: BuildHasher> TargetLookup for HashMap<ObjectId, ObjectId, S> {
    fn target_of(&self, source_id: ObjectId) -> Option<ObjectId> {
        self.get(&source_id).copied()
    }
}

impl TargetLookup for BTreeMap<ObjectId, ObjectId> {
    fn target_of(&self, source_id: ObjectId) -> Option<ObjectId> {
        self.get(&source_id).copied()
    }
}

/// Target-side records keyed by target id.
pub type TargetRecords = HashMap<ObjectId, Value>;

/// How cross-references are evaluated.
#[derive(Clone, Copy, Debug)]
pub enum ResolveMode<'a> {
    /// Validation before anything is released. Target records do not exist
    /// yet, so a cross-reference only has to be present in the lookup table.
    DryRun,
    /// Evaluation against the records produced by the release.
    Apply(&'a TargetRecords),
}

/// Copies every root key touched by `overrides` from `source`.
///
/// A root key is fetched once even when several rules share it.
///
/// # Errors
///
/// Returns [`OverrideError::Resolution`] when the source object lacks a root key.
pub fn select_root_keys(
    overrides: &AttributeOverride,
    source: &Value,
) -> OverrideResult<Map<String, Value>> {
    let mut subset = Map::new();
    for rule in overrides.rules() {
        let root = rule.path().root();
        if subset.contains_key(root) {
            continue;
        }
        let value = source.get(root).ok_or_else(|| {
            OverrideError::resolution(
                rule.path().as_str(),
                format!("source object has no `{root}` attribute"),
            )
        })?;
        subset.insert(root.to_owned(), value.clone());
    }
    Ok(subset)
}

/// Resolves `overrides` against `source`, returning only the touched root keys.
///
/// Rules are applied in table order, so when two rules write the same path
/// the later one wins.
///
/// # Errors
///
/// Returns the first [`OverrideError`] encountered. No partial result is
/// produced.
pub fn resolve<L>(
    overrides: &AttributeOverride,
    source: &Value,
    lookup: &L,
    mode: ResolveMode<'_>,
) -> OverrideResult<Map<String, Value>>
where
    L: TargetLookup + ?Sized,
{
    let mut resolved = Value::Object(select_root_keys(overrides, source)?);

    for rule in overrides.rules() {
        let path = rule.path();
        let value = match rule.expr() {
            OverrideExpr::Literal(value) => value.clone(),
            OverrideExpr::SourceValue => path.get(source).cloned().ok_or_else(|| {
                OverrideError::resolution(path.as_str(), "source object has no value at this path")
            })?,
            OverrideExpr::CrossRef {
                source_id,
                path: remote_path,
            } => {
                let target_id = lookup.target_of(*source_id).ok_or_else(|| {
                    OverrideError::resolution(
                        path.as_str(),
                        format!("object {source_id} has no target in the lookup table"),
                    )
                })?;

                match mode {
                    ResolveMode::DryRun => Value::Null,
                    ResolveMode::Apply(records) => {
                        let record = records.get(&target_id).ok_or_else(|| {
                            OverrideError::resolution(
                                path.as_str(),
                                format!("no record for target object {target_id}"),
                            )
                        })?;
                        match remote_path {
                            Some(remote_path) => {
                                remote_path.get(record).cloned().ok_or_else(|| {
                                    OverrideError::resolution(
                                        path.as_str(),
                                        format!(
                                            "target object {target_id} has no value at `{remote_path}`"
                                        ),
                                    )
                                })?
                            }
                            None => Value::from(target_id.get()),
                        }
                    }
                }
            }
        };

        trace!(path = %path, "override resolved");
        path.set(&mut resolved, value)?;
    }

    match resolved {
        Value::Object(map) => Ok(map),
        // seeded as an object and set() never replaces the root
        _ => Ok(Map::new()),
    }
}
