//! The write transaction of a resource.
//!
//! Edits are staged in the transaction's page overlay and become a new
//! revision on [`NodeWriteTrx::commit`]. Every edit validates before it
//! writes, so a rejected edit leaves the overlay as it was while the edits
//! applied before it stay staged. A storage failure in the middle of an edit
//! leaves the overlay in an unknown state; the transaction then refuses
//! further work and can only be dropped.

use std::sync::Arc;

use arbor_error::{ArborError, ErrorCategory, Result};
use arbor_index::{IndexDef, IndexDefs};
use arbor_types::cx::Cx;
use arbor_types::{
    AtomicType, AtomicValue, IndexType, NodeKey, NodeKind, NodeRecord, Path, QName, Revision,
};
use tracing::{error, info, warn};

use crate::cursor::NodeCursor;
use crate::cursor::sealed::CursorState;
use crate::index::{
    IndexQuery, build_indexes, index_subtree, staged_lookup, subtree_nodes, unindex_subtree,
};
use crate::page_trx::PageWriteTrx;
use crate::resource::WriterGuard;

/// Where a node goes relative to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    FirstChild,
    LastChild,
    LeftSibling,
    RightSibling,
}

/// A node to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<AtomicValue>,
}

impl NewNode {
    fn bare(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            value: None,
        }
    }

    fn valued(kind: NodeKind, value: AtomicValue) -> Self {
        Self {
            kind,
            name: None,
            value: Some(value),
        }
    }

    #[must_use]
    pub fn element(name: impl Into<QName>) -> Self {
        Self {
            kind: NodeKind::Element,
            name: Some(name.into()),
            value: None,
        }
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::valued(NodeKind::Text, AtomicValue::Str(text.into()))
    }

    #[must_use]
    pub fn comment(text: impl Into<String>) -> Self {
        Self::valued(NodeKind::Comment, AtomicValue::Str(text.into()))
    }

    #[must_use]
    pub fn object() -> Self {
        Self::bare(NodeKind::Object)
    }

    #[must_use]
    pub fn array() -> Self {
        Self::bare(NodeKind::Array)
    }

    #[must_use]
    pub fn object_key(name: impl Into<QName>) -> Self {
        Self {
            kind: NodeKind::ObjectKey,
            name: Some(name.into()),
            value: None,
        }
    }

    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::valued(NodeKind::StringValue, AtomicValue::Str(value.into()))
    }

    /// A JSON number. Non-numeric values are rejected on insert.
    #[must_use]
    pub fn number(value: impl Into<AtomicValue>) -> Self {
        Self::valued(NodeKind::NumberValue, value.into())
    }

    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::valued(NodeKind::BooleanValue, AtomicValue::Bool(value))
    }

    #[must_use]
    pub fn null() -> Self {
        Self::bare(NodeKind::NullValue)
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }
}

/// The single write transaction of a resource.
///
/// Dropping it without committing discards every staged edit and releases
/// the resource's write lock.
#[derive(Debug)]
pub struct NodeWriteTrx {
    pages: PageWriteTrx,
    current: NodeRecord,
    poisoned: bool,
    guard: WriterGuard,
}

impl NodeWriteTrx {
    pub(crate) fn new(pages: PageWriteTrx, guard: WriterGuard) -> Result<Self> {
        let current = pages.node(NodeKey::DOCUMENT_ROOT)?.ok_or_else(|| {
            ArborError::corrupt(format!("{} has no document root", pages.base_revision()))
        })?;
        info!(
            resource = %guard.shared().name(),
            trx = guard.id(),
            revision = pages.revision().get(),
            "write transaction opened"
        );
        Ok(Self {
            pages,
            current,
            poisoned: false,
            guard,
        })
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.guard.id()
    }

    /// Revision number this transaction commits as.
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.pages.revision()
    }

    /// Revision the staged content builds on.
    #[must_use]
    pub fn base_revision(&self) -> Revision {
        self.pages.base_revision()
    }

    #[must_use]
    pub fn max_node_key(&self) -> NodeKey {
        self.pages.max_node_key()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.pages.is_dirty()
    }

    /// Cancellation context of this transaction.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        self.pages.cx()
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(ArborError::TransactionClosed);
        }
        Ok(())
    }

    fn fail<T>(&mut self, op: &'static str, err: ArborError) -> Result<T> {
        let fatal = matches!(err.category(), ErrorCategory::Io | ErrorCategory::Internal)
            || matches!(err, ArborError::Interrupted);
        if fatal {
            self.poisoned = true;
            error!(trx = self.id(), op, error = %err, "write transaction aborted");
        } else {
            warn!(trx = self.id(), op, error = %err, "edit rejected");
        }
        Err(err)
    }

    /// Run one edit against the overlay and move the cursor to the node
    /// key it returns.
    fn edit(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut PageWriteTrx, &NodeRecord) -> Result<NodeKey>,
    ) -> Result<NodeKey> {
        self.ensure_usable()?;
        let anchor = self.current.clone();
        let landed = f(&mut self.pages, &anchor).and_then(|key| load(&self.pages, key));
        match landed {
            Ok(node) => {
                let key = node.key;
                self.current = node;
                Ok(key)
            }
            Err(err) => self.fail(op, err),
        }
    }

    // -----------------------------------------------------------------------
    // Edits
    // -----------------------------------------------------------------------

    /// Insert `node` at `position` relative to the cursor and move onto it.
    pub fn insert(&mut self, position: InsertPosition, node: NewNode) -> Result<NodeKey> {
        self.edit("insert", |pages, anchor| insert(pages, anchor, position, node))
    }

    /// Add an attribute to the element under the cursor and move onto it.
    pub fn insert_attribute(
        &mut self,
        name: impl Into<QName>,
        value: impl Into<String>,
    ) -> Result<NodeKey> {
        let (name, value) = (name.into(), AtomicValue::Str(value.into()));
        self.edit("insert_attribute", |pages, anchor| {
            insert_attribute(pages, anchor, name, value)
        })
    }

    /// Remove the node under the cursor with its subtree and move to its
    /// parent.
    pub fn remove(&mut self) -> Result<()> {
        let key = self.current.key;
        self.remove_node(key)
    }

    /// Remove node `key` with its subtree. The cursor moves to the removed
    /// node's parent if it was inside the subtree.
    pub fn remove_node(&mut self, key: NodeKey) -> Result<()> {
        self.edit("remove", |pages, anchor| {
            let parent = remove(pages, key)?;
            Ok(if pages.node(anchor.key)?.is_some() {
                anchor.key
            } else {
                parent
            })
        })
        .map(drop)
    }

    /// Rename the element, attribute or object key under the cursor.
    pub fn set_name(&mut self, name: impl Into<QName>) -> Result<()> {
        let name = name.into();
        self.edit("set_name", |pages, anchor| set_name(pages, anchor, name))
            .map(drop)
    }

    /// Replace the value of the node under the cursor.
    pub fn set_value(&mut self, value: impl Into<AtomicValue>) -> Result<()> {
        let value = value.into();
        self.edit("set_value", |pages, anchor| set_value(pages, anchor, value))
            .map(drop)
    }

    /// Move node `key` with its subtree to `position` relative to the cursor
    /// and move onto it.
    pub fn move_subtree(&mut self, key: NodeKey, position: InsertPosition) -> Result<NodeKey> {
        self.edit("move_subtree", |pages, anchor| {
            move_subtree(pages, key, anchor, position)
        })
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn index_defs(&self) -> &IndexDefs {
        self.pages.catalog()
    }

    #[must_use]
    pub fn find_index(&self, index_type: IndexType, path: Option<&Path>) -> Option<&IndexDef> {
        self.pages.catalog().find_index(index_type, path)
    }

    #[must_use]
    pub fn find_cas_index(&self, path: &Path, content_type: Option<AtomicType>) -> Option<&IndexDef> {
        self.pages.catalog().find_cas_index(path, content_type)
    }

    /// Define indexes and build them over the staged document.
    ///
    /// A definition structurally equal to an existing one yields the existing
    /// definition. The returned definitions carry their assigned ids, in
    /// input order. If building fails no definition of this call remains;
    /// a storage failure also ends the transaction.
    pub fn create_indexes(
        &mut self,
        defs: impl IntoIterator<Item = IndexDef>,
    ) -> Result<Vec<IndexDef>> {
        self.ensure_usable()?;
        let savepoint = self.pages.savepoint();
        match register_indexes(&mut self.pages, defs) {
            Ok(defs) => Ok(defs),
            Err(err) => {
                self.pages.restore(savepoint);
                self.fail("create_indexes", err)
            }
        }
    }

    /// Lookup against the staged index state.
    pub fn lookup(&mut self, def: &IndexDef, query: &IndexQuery) -> Result<Vec<NodeKey>> {
        self.ensure_usable()?;
        match staged_lookup(&mut self.pages, def, query) {
            Ok(keys) => Ok(keys),
            Err(err) => self.fail("lookup", err),
        }
    }

    // -----------------------------------------------------------------------
    // Transaction control
    // -----------------------------------------------------------------------

    /// Discard every staged edit and continue from the content of
    /// `revision`. The transaction still commits as [`Self::revision`], and
    /// node keys handed out before the revert are not reused.
    pub fn revert_to(&mut self, revision: Revision) -> Result<()> {
        self.ensure_usable()?;
        let shared = Arc::clone(self.guard.shared());
        let reverted = shared
            .load_root(revision)
            .and_then(|root| self.pages.reset_to(root))
            .and_then(|()| load(&self.pages, NodeKey::DOCUMENT_ROOT));
        match reverted {
            Ok(root) => {
                self.current = root;
                info!(
                    trx = self.id(),
                    revision = self.pages.revision().get(),
                    reverted_to = revision.get(),
                    "write transaction reverted"
                );
                Ok(())
            }
            Err(err @ ArborError::RevisionNotFound { .. }) => Err(err),
            Err(err) => self.fail("revert_to", err),
        }
    }

    /// Publish the staged edits as a new revision.
    pub fn commit(self) -> Result<Revision> {
        self.commit_inner(None)
    }

    pub fn commit_with_message(self, message: impl Into<String>) -> Result<Revision> {
        self.commit_inner(Some(message.into()))
    }

    fn commit_inner(self, message: Option<String>) -> Result<Revision> {
        self.ensure_usable()?;
        let Self { pages, guard, .. } = self;
        let shared = Arc::clone(guard.shared());
        let revision = pages.revision();
        let start = shared.store().end_offset();
        match pages.commit(message) {
            Ok(report) => {
                shared.publish(&report);
                drop(guard);
                Ok(report.revision)
            }
            Err(err) => {
                shared.commit_failed(revision, start, &err);
                Err(err)
            }
        }
    }

    /// Discard every staged edit and release the write lock.
    pub fn rollback(self) {
        info!(
            trx = self.id(),
            revision = self.pages.revision().get(),
            dirty = self.pages.is_dirty(),
            "write transaction rolled back"
        );
    }

    /// Same as [`Self::rollback`].
    pub fn close(self) {
        self.rollback();
    }
}

impl CursorState for NodeWriteTrx {
    fn current_node(&self) -> &NodeRecord {
        &self.current
    }

    fn set_current(&mut self, node: NodeRecord) {
        self.current = node;
    }

    fn fetch(&self, key: NodeKey) -> Result<Option<NodeRecord>> {
        self.ensure_usable()?;
        self.pages.node(key)
    }
}

impl NodeCursor for NodeWriteTrx {}

// ---------------------------------------------------------------------------
// Edit primitives over the overlay
// ---------------------------------------------------------------------------

fn load(pages: &PageWriteTrx, key: NodeKey) -> Result<NodeRecord> {
    pages
        .node(key)?
        .ok_or(ArborError::NodeNotFound { key: key.get() })
}

fn load_target(pages: &PageWriteTrx, key: NodeKey, op: &str) -> Result<NodeRecord> {
    pages
        .node(key)?
        .ok_or_else(|| ArborError::structural(format!("cannot {op} {key}: no such node")))
}

fn check_value(kind: NodeKind, value: Option<&AtomicValue>) -> Result<()> {
    let ok = match (kind, value) {
        (
            NodeKind::Text | NodeKind::Comment | NodeKind::Attribute | NodeKind::StringValue,
            Some(AtomicValue::Str(_)),
        )
        | (NodeKind::NumberValue, Some(AtomicValue::Int(_) | AtomicValue::Dbl(_)))
        | (NodeKind::BooleanValue, Some(AtomicValue::Bool(_))) => true,
        (kind, None) => !kind.has_value(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ArborError::structural(format!(
            "{kind:?} node cannot hold {}",
            value.map_or_else(|| "no value".to_owned(), |v| format!("{v:?}"))
        )))
    }
}

/// Parent and neighbours of a node placed at `position` relative to `anchor`.
struct Slot {
    parent: NodeRecord,
    left: Option<NodeKey>,
    right: Option<NodeKey>,
}

fn resolve_slot(pages: &PageWriteTrx, anchor: &NodeRecord, position: InsertPosition) -> Result<Slot> {
    if anchor.kind == NodeKind::Attribute {
        return Err(ArborError::structural(format!(
            "attribute {} has neither children nor siblings",
            anchor.key
        )));
    }
    match position {
        InsertPosition::FirstChild => Ok(Slot {
            parent: anchor.clone(),
            left: None,
            right: anchor.first_child,
        }),
        InsertPosition::LastChild => Ok(Slot {
            parent: anchor.clone(),
            left: anchor.last_child,
            right: None,
        }),
        InsertPosition::LeftSibling | InsertPosition::RightSibling => {
            let parent = anchor.parent.ok_or_else(|| {
                ArborError::structural("the document root has no siblings")
            })?;
            let parent = load(pages, parent)?;
            Ok(if position == InsertPosition::LeftSibling {
                Slot {
                    parent,
                    left: anchor.left_sibling,
                    right: Some(anchor.key),
                }
            } else {
                Slot {
                    parent,
                    left: Some(anchor.key),
                    right: anchor.right_sibling,
                }
            })
        }
    }
}

/// Reject placing a `kind` node under `parent`. `moving` is the node being
/// moved, which does not count against an object key's single value.
fn check_placement(parent: &NodeRecord, kind: NodeKind, moving: Option<NodeKey>) -> Result<()> {
    if !kind.allowed_under(parent.kind) {
        return Err(ArborError::structural(format!(
            "{kind:?} node cannot be placed under {:?} node {}",
            parent.kind, parent.key
        )));
    }
    if parent.kind == NodeKind::ObjectKey
        && parent.child_count > 0
        && (moving.is_none() || parent.first_child != moving)
    {
        return Err(ArborError::structural(format!(
            "object key {} already has a value",
            parent.key
        )));
    }
    Ok(())
}

fn adjust_descendants(pages: &mut PageWriteTrx, from: NodeKey, size: u64, grow: bool) -> Result<()> {
    let mut at = Some(from);
    while let Some(key) = at {
        let mut node = load(pages, key)?;
        node.descendant_count = if grow {
            node.descendant_count + size
        } else {
            node.descendant_count.saturating_sub(size)
        };
        pages.put_node(&node)?;
        at = node.parent;
    }
    Ok(())
}

/// Splice `node`, the root of a subtree of `size` nodes, between `left` and
/// `right` under `parent`.
fn link(
    pages: &mut PageWriteTrx,
    node: &mut NodeRecord,
    parent: NodeKey,
    left: Option<NodeKey>,
    right: Option<NodeKey>,
    size: u64,
) -> Result<()> {
    node.parent = Some(parent);
    node.left_sibling = left;
    node.right_sibling = right;
    pages.put_node(node)?;
    if let Some(left) = left {
        let mut l = load(pages, left)?;
        l.right_sibling = Some(node.key);
        pages.put_node(&l)?;
    }
    if let Some(right) = right {
        let mut r = load(pages, right)?;
        r.left_sibling = Some(node.key);
        pages.put_node(&r)?;
    }
    let mut p = load(pages, parent)?;
    if left.is_none() {
        p.first_child = Some(node.key);
    }
    if right.is_none() {
        p.last_child = Some(node.key);
    }
    p.child_count += 1;
    pages.put_node(&p)?;
    adjust_descendants(pages, parent, size, true)
}

/// Detach `node` and its subtree from its parent and siblings.
fn unlink(pages: &mut PageWriteTrx, node: &NodeRecord) -> Result<()> {
    let parent = node
        .parent
        .ok_or_else(|| ArborError::internal(format!("unlink of parentless node {}", node.key)))?;
    if let Some(left) = node.left_sibling {
        let mut l = load(pages, left)?;
        l.right_sibling = node.right_sibling;
        pages.put_node(&l)?;
    }
    if let Some(right) = node.right_sibling {
        let mut r = load(pages, right)?;
        r.left_sibling = node.left_sibling;
        pages.put_node(&r)?;
    }
    let mut p = load(pages, parent)?;
    if p.first_child == Some(node.key) {
        p.first_child = node.right_sibling;
    }
    if p.last_child == Some(node.key) {
        p.last_child = node.left_sibling;
    }
    p.child_count = p.child_count.saturating_sub(1);
    pages.put_node(&p)?;
    adjust_descendants(pages, parent, 1 + node.descendant_count, false)
}

fn insert(
    pages: &mut PageWriteTrx,
    anchor: &NodeRecord,
    position: InsertPosition,
    new: NewNode,
) -> Result<NodeKey> {
    if matches!(new.kind, NodeKind::Document | NodeKind::Attribute) {
        return Err(ArborError::structural(format!(
            "{:?} nodes cannot be inserted as children",
            new.kind
        )));
    }
    check_value(new.kind, new.value.as_ref())?;
    let slot = resolve_slot(pages, anchor, position)?;
    check_placement(&slot.parent, new.kind, None)?;

    let key = pages.allocate_node_key();
    let mut node = NodeRecord::new(key, new.kind);
    node.name = new.name;
    node.value = new.value;
    link(pages, &mut node, slot.parent.key, slot.left, slot.right, 1)?;
    index_subtree(pages, key)?;
    Ok(key)
}

fn insert_attribute(
    pages: &mut PageWriteTrx,
    element: &NodeRecord,
    name: QName,
    value: AtomicValue,
) -> Result<NodeKey> {
    if element.kind != NodeKind::Element {
        return Err(ArborError::structural(format!(
            "{:?} node {} cannot carry attributes",
            element.kind, element.key
        )));
    }
    for &attr in &element.attributes {
        if load(pages, attr)?.name.as_ref() == Some(&name) {
            return Err(ArborError::structural(format!(
                "element {} already has attribute {name}",
                element.key
            )));
        }
    }
    let key = pages.allocate_node_key();
    let mut attr = NodeRecord::new(key, NodeKind::Attribute)
        .with_name(name)
        .with_value(value);
    attr.parent = Some(element.key);
    pages.put_node(&attr)?;
    let mut owner = load(pages, element.key)?;
    owner.attributes.push(key);
    pages.put_node(&owner)?;
    index_subtree(pages, key)?;
    Ok(key)
}

/// Remove `key` and its subtree; returns the removed node's parent.
fn remove(pages: &mut PageWriteTrx, key: NodeKey) -> Result<NodeKey> {
    if key == NodeKey::DOCUMENT_ROOT {
        return Err(ArborError::structural("the document root cannot be removed"));
    }
    let node = load_target(pages, key, "remove")?;
    let parent = node
        .parent
        .ok_or_else(|| ArborError::corrupt(format!("node {key} has no parent")))?;
    unindex_subtree(pages, key)?;
    if node.kind == NodeKind::Attribute {
        let mut owner = load(pages, parent)?;
        owner.attributes.retain(|&a| a != key);
        pages.put_node(&owner)?;
        pages.delete_node(key)?;
    } else {
        let doomed = subtree_nodes(pages, key)?;
        unlink(pages, &node)?;
        for n in &doomed {
            pages.delete_node(n.key)?;
        }
    }
    Ok(parent)
}

fn set_name(pages: &mut PageWriteTrx, node: &NodeRecord, name: QName) -> Result<NodeKey> {
    if !node.kind.has_name() {
        return Err(ArborError::structural(format!(
            "{:?} node {} has no name",
            node.kind, node.key
        )));
    }
    if node.name.as_ref() == Some(&name) {
        return Ok(node.key);
    }
    if node.kind == NodeKind::Attribute {
        let owner = node
            .parent
            .ok_or_else(|| ArborError::corrupt(format!("attribute {} has no owner", node.key)))?;
        for attr in load(pages, owner)?.attributes {
            if attr != node.key && load(pages, attr)?.name.as_ref() == Some(&name) {
                return Err(ArborError::structural(format!(
                    "element {owner} already has attribute {name}"
                )));
            }
        }
    }
    unindex_subtree(pages, node.key)?;
    let mut renamed = load(pages, node.key)?;
    renamed.name = Some(name);
    pages.put_node(&renamed)?;
    index_subtree(pages, node.key)?;
    Ok(node.key)
}

fn set_value(pages: &mut PageWriteTrx, node: &NodeRecord, value: AtomicValue) -> Result<NodeKey> {
    if !node.kind.has_value() {
        return Err(ArborError::structural(format!(
            "{:?} node {} has no value",
            node.kind, node.key
        )));
    }
    check_value(node.kind, Some(&value))?;
    unindex_subtree(pages, node.key)?;
    let mut updated = load(pages, node.key)?;
    updated.value = Some(value);
    pages.put_node(&updated)?;
    index_subtree(pages, node.key)?;
    Ok(node.key)
}

fn move_subtree(
    pages: &mut PageWriteTrx,
    key: NodeKey,
    anchor: &NodeRecord,
    position: InsertPosition,
) -> Result<NodeKey> {
    if key == NodeKey::DOCUMENT_ROOT {
        return Err(ArborError::structural("the document root cannot be moved"));
    }
    let moving = load_target(pages, key, "move")?;
    if moving.kind == NodeKind::Attribute {
        return Err(ArborError::structural(format!("attribute {key} cannot be moved")));
    }
    if key == anchor.key {
        return Err(ArborError::structural(format!(
            "node {key} cannot be moved relative to itself"
        )));
    }
    let slot = resolve_slot(pages, anchor, position)?;
    check_placement(&slot.parent, moving.kind, Some(key))?;
    let mut at = Some(slot.parent.key);
    while let Some(ancestor) = at {
        if ancestor == key {
            return Err(ArborError::structural(format!(
                "moving {key} under {} would create a cycle",
                slot.parent.key
            )));
        }
        at = load(pages, ancestor)?.parent;
    }

    unindex_subtree(pages, key)?;
    unlink(pages, &moving)?;
    // Unlinking may have changed the anchor's neighbours.
    let anchor = load(pages, anchor.key)?;
    let slot = resolve_slot(pages, &anchor, position)?;
    let mut node = load(pages, key)?;
    let size = 1 + node.descendant_count;
    link(pages, &mut node, slot.parent.key, slot.left, slot.right, size)?;
    index_subtree(pages, key)?;
    Ok(key)
}

fn register_indexes(
    pages: &mut PageWriteTrx,
    defs: impl IntoIterator<Item = IndexDef>,
) -> Result<Vec<IndexDef>> {
    let mut all = Vec::new();
    let mut fresh = Vec::new();
    for def in defs {
        let (def, created) = pages.catalog_mut().add(def)?;
        if created {
            info!(index = %def, revision = pages.revision().get(), "index defined");
            fresh.push(def.clone());
        }
        all.push(def);
    }
    build_indexes(pages, &fresh)?;
    Ok(all)
}
