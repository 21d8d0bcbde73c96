//! Mapping tree nodes.

use std::collections::{BTreeSet, HashSet};

use prd_override::AttributeOverride;
use prd_primitives::{ObjectId, ObjectKind};
use serde::{Deserialize, Serialize};

use crate::traverse::{NodeRef, Traverse};
use crate::{MappingError, MappingResult};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// One known source object and the release directives attached to it.
///
/// Fields serialize in a fixed order (`id`, `name`, `target_object`, then
/// directives, then children) so the mapping file diffs cleanly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingNode {
    /// Source-side identity.
    pub id: ObjectId,
    /// Display label; not authoritative.
    #[serde(default)]
    pub name: String,
    /// Target-side identity, `None` until the object has been created.
    #[serde(default)]
    pub target_object: Option<ObjectId>,
    /// Excludes this object and everything below it from the release.
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore: bool,
    /// Field overrides applied after the release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_override: Option<AttributeOverride>,
    /// Schemas owned by an organization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<MappingNode>,
    /// Hooks owned by an organization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<MappingNode>,
    /// Workspaces owned by an organization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<MappingNode>,
    /// Queues contained in a workspace.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queues: Vec<MappingNode>,
    /// Inbox attached to a queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox: Option<Box<MappingNode>>,
}

impl MappingNode {
    /// Creates a leaf node with no target and no directives.
    #[must_use]
    pub fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            target_object: None,
            ignore: false,
            attribute_override: None,
            schemas: Vec::new(),
            hooks: Vec::new(),
            workspaces: Vec::new(),
            queues: Vec::new(),
            inbox: None,
        }
    }

    /// Sets the target identity.
    #[must_use]
    pub fn with_target(mut self, target: ObjectId) -> Self {
        self.target_object = Some(target);
        self
    }

    /// Marks the node as ignored.
    #[must_use]
    pub fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    /// Attaches an override table.
    #[must_use]
    pub fn with_override(mut self, table: AttributeOverride) -> Self {
        self.attribute_override = Some(table);
        self
    }

    /// Returns the override table when it has at least one rule.
    #[must_use]
    pub fn overrides(&self) -> Option<&AttributeOverride> {
        self.attribute_override
            .as_ref()
            .filter(|table| !table.is_empty())
    }

    /// Returns the direct children with their kinds, in file order.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = NodeRef<'_>> {
        let lists = [
            (ObjectKind::Schema, self.schemas.as_slice()),
            (ObjectKind::Hook, self.hooks.as_slice()),
            (ObjectKind::Workspace, self.workspaces.as_slice()),
            (ObjectKind::Queue, self.queues.as_slice()),
            (ObjectKind::Inbox, self.inbox.as_deref().map_or(&[][..], std::slice::from_ref)),
        ];
        lists
            .into_iter()
            .flat_map(|(kind, nodes)| nodes.iter().map(move |node| NodeRef { kind, node }))
    }
}

/// Locates a node by source id among siblings.
///
/// # Errors
///
/// Returns [`MappingError::NotFound`] when no sibling has the id.
pub fn find(nodes: &[MappingNode], id: ObjectId) -> MappingResult<&MappingNode> {
    nodes
        .iter()
        .find(|node| node.id == id)
        .ok_or(MappingError::NotFound { id })
}

/// Mutable twin of [`find`].
///
/// # Errors
///
/// Returns [`MappingError::NotFound`] when no sibling has the id.
pub fn find_mut(nodes: &mut [MappingNode], id: ObjectId) -> MappingResult<&mut MappingNode> {
    nodes
        .iter_mut()
        .find(|node| node.id == id)
        .ok_or(MappingError::NotFound { id })
}

/// The whole persisted mapping, rooted at the organization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Root node.
    pub organization: MappingNode,
}

impl Mapping {
    /// Wraps an organization node.
    #[must_use]
    pub fn new(organization: MappingNode) -> Self {
        Self { organization }
    }

    /// Depth-first traversal of every node, including ignored ones.
    #[must_use]
    pub fn traverse(&self) -> Traverse<'_> {
        Traverse::new(&self.organization, ObjectKind::Organization, true)
    }

    /// Depth-first traversal that skips ignored subtrees entirely.
    #[must_use]
    pub fn traverse_active(&self) -> Traverse<'_> {
        Traverse::new(&self.organization, ObjectKind::Organization, false)
    }

    /// Locates any node by source id, regardless of depth.
    #[must_use]
    pub fn locate(&self, id: ObjectId) -> Option<NodeRef<'_>> {
        self.traverse().find(|entry| entry.node.id == id)
    }

    /// Mutable twin of [`locate`](Self::locate).
    pub fn locate_mut(&mut self, id: ObjectId) -> Option<&mut MappingNode> {
        locate_in(&mut self.organization, id)
    }

    /// Returns every target id currently recorded, ignored nodes included.
    #[must_use]
    pub fn targets(&self) -> BTreeSet<ObjectId> {
        self.traverse()
            .filter_map(|entry| entry.node.target_object)
            .collect()
    }

    /// Checks that every source id occurs once.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::DuplicateId`] for the first repeated id.
    pub fn validate(&self) -> MappingResult<()> {
        let mut seen = HashSet::new();
        for entry in self.traverse() {
            if !seen.insert(entry.node.id) {
                return Err(MappingError::DuplicateId { id: entry.node.id });
            }
        }
        Ok(())
    }
}

fn locate_in(node: &mut MappingNode, id: ObjectId) -> Option<&mut MappingNode> {
    if node.id == id {
        return Some(node);
    }
    node.schemas
        .iter_mut()
        .chain(node.hooks.iter_mut())
        .chain(node.workspaces.iter_mut())
        .chain(node.queues.iter_mut())
        .chain(node.inbox.as_deref_mut())
        .find_map(|child| locate_in(child, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ObjectId {
        ObjectId::new(raw)
    }

    #[test]
    fn find_reports_missing_ids() {
        let nodes = vec![MappingNode::new(id(1), "a"), MappingNode::new(id(2), "b")];
        assert_eq!(find(&nodes, id(2)).unwrap().name, "b");
        assert!(matches!(
            find(&nodes, id(3)),
            Err(MappingError::NotFound { id }) if id == ObjectId::new(3)
        ));
    }

    #[test]
    fn find_mut_updates_in_place() {
        let mut nodes = vec![MappingNode::new(id(1), "a")];
        find_mut(&mut nodes, id(1)).unwrap().target_object = Some(id(10));
        assert_eq!(nodes[0].target_object, Some(id(10)));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let mut org = MappingNode::new(id(1), "org");
        org.schemas.push(MappingNode::new(id(5), "s"));
        org.hooks.push(MappingNode::new(id(5), "h"));
        let err = Mapping::new(org).validate().unwrap_err();
        assert!(matches!(err, MappingError::DuplicateId { .. }));
    }

    #[test]
    fn targets_include_ignored_nodes() {
        let mut org = MappingNode::new(id(1), "org").with_target(id(100));
        org.hooks
            .push(MappingNode::new(id(2), "h").with_target(id(200)).ignored());
        let mapping = Mapping::new(org);
        assert_eq!(mapping.targets(), BTreeSet::from([id(100), id(200)]));
        assert_eq!(mapping.locate(id(2)).unwrap().kind, ObjectKind::Hook);
    }

    #[test]
    fn locate_mut_reaches_nested_inbox() {
        let mut queue = MappingNode::new(id(3), "q");
        queue.inbox = Some(Box::new(MappingNode::new(id(4), "i")));
        let mut workspace = MappingNode::new(id(2), "w");
        workspace.queues.push(queue);
        let mut org = MappingNode::new(id(1), "org");
        org.workspaces.push(workspace);
        let mut mapping = Mapping::new(org);

        mapping.locate_mut(id(4)).unwrap().target_object = Some(id(40));
        assert_eq!(
            mapping.organization.workspaces[0].queues[0]
                .inbox
                .as_ref()
                .unwrap()
                .target_object,
            Some(id(40))
        );
        assert!(mapping.locate_mut(id(5)).is_none());
    }
}
