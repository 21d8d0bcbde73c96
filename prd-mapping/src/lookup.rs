//! Flat source-to-target projection of the mapping tree.

use std::collections::HashMap;

use prd_override::TargetLookup;
use prd_primitives::ObjectId;

use crate::Mapping;

/// Source id to target id table derived from a [`Mapping`].
///
/// Only nodes that are reachable without crossing an ignored node and that
/// already carry a target appear in the table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LookupTable {
    entries: HashMap<ObjectId, ObjectId>,
}

impl LookupTable {
    /// Flattens `mapping` into a lookup table.
    #[must_use]
    pub fn from_mapping(mapping: &Mapping) -> Self {
        let entries = mapping
            .traverse_active()
            .filter_map(|entry| entry.node.target_object.map(|target| (entry.node.id, target)))
            .collect();
        Self { entries }
    }

    /// Returns the target of `source_id`, if it has one.
    #[must_use]
    pub fn get(&self, source_id: ObjectId) -> Option<ObjectId> {
        self.entries.get(&source_id).copied()
    }

    /// Returns `true` when `source_id` has a target.
    #[must_use]
    pub fn contains(&self, source_id: ObjectId) -> bool {
        self.entries.contains_key(&source_id)
    }

    /// Number of resolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the target ids.
    pub fn values(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.entries.values().copied()
    }
}

impl TargetLookup for LookupTable {
    fn target_of(&self, source_id: ObjectId) -> Option<ObjectId> {
        self.get(source_id)
    }
}

impl From<&Mapping> for LookupTable {
    fn from(mapping: &Mapping) -> Self {
        Self::from_mapping(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MappingNode;

    fn id(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    fn mapping() -> Mapping {
        let mut org = MappingNode::new(id(1), "org").with_target(id(101));
        org.schemas
            .push(MappingNode::new(id(2), "schema").with_target(id(102)));
        org.schemas.push(MappingNode::new(id(3), "unreleased"));
        org.hooks
            .push(MappingNode::new(id(4), "hook").with_target(id(104)).ignored());

        let mut workspace = MappingNode::new(id(5), "ws").with_target(id(105)).ignored();
        let mut queue = MappingNode::new(id(6), "queue").with_target(id(106));
        queue.inbox = Some(Box::new(
            MappingNode::new(id(7), "inbox").with_target(id(107)),
        ));
        workspace.queues.push(queue);
        org.workspaces.push(workspace);

        let mut live = MappingNode::new(id(8), "live").with_target(id(108));
        live.queues
            .push(MappingNode::new(id(9), "q").with_target(id(109)));
        org.workspaces.push(live);

        Mapping::new(org)
    }

    #[test]
    fn one_entry_per_resolved_active_node() {
        let table = LookupTable::from_mapping(&mapping());
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(id(1)), Some(id(101)));
        assert_eq!(table.get(id(2)), Some(id(102)));
        assert_eq!(table.get(id(9)), Some(id(109)));
        assert!(!table.contains(id(3)));
    }

    #[test]
    fn ignored_subtrees_never_appear() {
        let table = LookupTable::from_mapping(&mapping());
        for ignored in [4, 5, 6, 7] {
            assert_eq!(table.target_of(id(ignored)), None);
        }
        let mut targets: Vec<_> = table.values().map(ObjectId::get).collect();
        targets.sort_unstable();
        assert_eq!(targets, [101, 102, 108, 109]);
    }
}
