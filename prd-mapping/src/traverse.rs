//! Lazy depth-first traversal of the mapping tree.

use prd_primitives::ObjectKind;

use crate::MappingNode;

/// A node together with the kind implied by its position in the tree.
#[derive(Clone, Copy, Debug)]
pub struct NodeRef<'a> {
    /// Kind of the object the node describes.
    pub kind: ObjectKind,
    /// The node itself.
    pub node: &'a MappingNode,
}

/// Pre-order iterator over a mapping subtree.
///
/// Order follows the tree's own child order, so it is stable for a given
/// mapping file.
#[derive(Debug)]
pub struct Traverse<'a> {
    stack: Vec<NodeRef<'a>>,
    include_ignored: bool,
}

impl<'a> Traverse<'a> {
    pub(crate) fn new(root: &'a MappingNode, kind: ObjectKind, include_ignored: bool) -> Self {
        let stack = if include_ignored || !root.ignore {
            vec![NodeRef { kind, node: root }]
        } else {
            Vec::new()
        };
        Self {
            stack,
            include_ignored,
        }
    }
}

impl<'a> Iterator for Traverse<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        let include_ignored = self.include_ignored;
        self.stack.extend(
            current
                .node
                .children()
                .rev()
                .filter(|child| include_ignored || !child.node.ignore),
        );
        Some(current)
    }
}
