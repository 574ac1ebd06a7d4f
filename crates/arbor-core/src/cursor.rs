//! Cursor navigation shared by read and write node transactions.

use arbor_error::{ArborError, Result};
use arbor_types::{AtomicValue, NodeKey, NodeKind, NodeRecord, Path, PathStep, QName};
use smallvec::SmallVec;

pub(crate) mod sealed {
    use arbor_error::Result;
    use arbor_types::{NodeKey, NodeRecord};

    pub trait CursorState {
        fn current_node(&self) -> &NodeRecord;
        fn set_current(&mut self, node: NodeRecord);
        fn fetch(&self, key: NodeKey) -> Result<Option<NodeRecord>>;
    }
}

/// Navigation over the nodes of one revision.
///
/// Every `move_to_*` method returns `Ok(false)` and leaves the cursor where
/// it was when the target does not exist.
pub trait NodeCursor: sealed::CursorState {
    fn node(&self) -> &NodeRecord {
        self.current_node()
    }

    fn node_key(&self) -> NodeKey {
        self.current_node().key
    }

    fn kind(&self) -> NodeKind {
        self.current_node().kind
    }

    fn name(&self) -> Option<&QName> {
        self.current_node().name.as_ref()
    }

    fn value(&self) -> Option<&AtomicValue> {
        self.current_node().value.as_ref()
    }

    fn child_count(&self) -> u64 {
        self.current_node().child_count
    }

    fn descendant_count(&self) -> u64 {
        self.current_node().descendant_count
    }

    fn attribute_count(&self) -> usize {
        self.current_node().attributes.len()
    }

    fn has_children(&self) -> bool {
        self.current_node().first_child.is_some()
    }

    fn has_parent(&self) -> bool {
        self.current_node().parent.is_some()
    }

    /// Node with `key` without moving the cursor.
    fn get_node(&self, key: NodeKey) -> Result<Option<NodeRecord>> {
        self.fetch(key)
    }

    fn contains(&self, key: NodeKey) -> Result<bool> {
        Ok(self.fetch(key)?.is_some())
    }

    fn move_to(&mut self, key: NodeKey) -> Result<bool> {
        match self.fetch(key)? {
            Some(node) => {
                self.set_current(node);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn move_to_document_root(&mut self) -> Result<bool> {
        self.move_to(NodeKey::DOCUMENT_ROOT)
    }

    fn move_to_parent(&mut self) -> Result<bool> {
        move_to_link(self, |n| n.parent)
    }

    fn move_to_first_child(&mut self) -> Result<bool> {
        move_to_link(self, |n| n.first_child)
    }

    fn move_to_last_child(&mut self) -> Result<bool> {
        move_to_link(self, |n| n.last_child)
    }

    fn move_to_left_sibling(&mut self) -> Result<bool> {
        move_to_link(self, |n| n.left_sibling)
    }

    fn move_to_right_sibling(&mut self) -> Result<bool> {
        move_to_link(self, |n| n.right_sibling)
    }

    fn move_to_attribute(&mut self, index: usize) -> Result<bool> {
        move_to_link(self, |n| n.attributes.get(index).copied())
    }

    fn move_to_attribute_by_name(&mut self, name: &QName) -> Result<bool> {
        let keys = self.current_node().attributes.clone();
        for key in keys {
            if let Some(attr) = self.fetch(key)? {
                if attr.name.as_ref() == Some(name) {
                    self.set_current(attr);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Keys of the current node's children in document order.
    fn children(&self) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        let mut next = self.current_node().first_child;
        while let Some(key) = next {
            let child = self.fetch(key)?.ok_or(ArborError::NodeNotFound { key: key.get() })?;
            out.push(key);
            next = child.right_sibling;
        }
        Ok(out)
    }

    /// Structural path of the current node.
    fn path(&self) -> Result<Path> {
        structural_path(|key| self.fetch(key), self.current_node())
    }
}

fn move_to_link<C: NodeCursor + ?Sized>(
    cursor: &mut C,
    link: impl FnOnce(&NodeRecord) -> Option<NodeKey>,
) -> Result<bool> {
    match link(cursor.current_node()) {
        Some(key) => cursor.move_to(key),
        None => Ok(false),
    }
}

fn step_of(node: &NodeRecord) -> Option<PathStep> {
    let name = node.name.as_ref()?.to_string();
    match node.kind {
        NodeKind::Element | NodeKind::ObjectKey => Some(PathStep::child(name)),
        NodeKind::Attribute => Some(PathStep::attribute(name)),
        _ => None,
    }
}

/// Path made of the names of `node` and its named ancestors. Unnamed nodes
/// (values, text, arrays, objects) add no step, so a value's path is the
/// path of the node that names it.
pub(crate) fn structural_path(
    fetch: impl Fn(NodeKey) -> Result<Option<NodeRecord>>,
    node: &NodeRecord,
) -> Result<Path> {
    let mut steps: SmallVec<[PathStep; 8]> = SmallVec::new();
    steps.extend(step_of(node));
    let mut parent = node.parent;
    while let Some(key) = parent {
        let ancestor = fetch(key)?.ok_or(ArborError::NodeNotFound { key: key.get() })?;
        steps.extend(step_of(&ancestor));
        parent = ancestor.parent;
    }
    steps.reverse();
    Ok(Path::from_steps(steps))
}
