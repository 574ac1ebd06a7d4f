//! Index lookups and index maintenance.
//!
//! Index entries are maintained eagerly: every node edit of a write
//! transaction removes the node's old entries and files its new ones in the
//! same overlay, so an index committed with a revision always describes that
//! revision.

use std::ops::Bound;

use arbor_error::Result;
use arbor_index::{AvlTree, IndexDef, IndexDefs, IndexKey, RecordStore, entry_key};
use arbor_types::cx::Cx;
use arbor_types::{AtomicType, IndexType, NodeKey, NodeRecord, Path, Revision};
use tracing::{debug, debug_span, info};

use crate::cursor::structural_path;
use crate::node_write::NodeWriteTrx;
use crate::page_trx::{PageReadTrx, PageWriteTrx};

/// An index lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    Exact(IndexKey),
    Range {
        lower: Bound<IndexKey>,
        upper: Bound<IndexKey>,
    },
}

impl IndexQuery {
    #[must_use]
    pub fn exact(key: impl Into<IndexKey>) -> Self {
        Self::Exact(key.into())
    }

    #[must_use]
    pub fn range(lower: Bound<IndexKey>, upper: Bound<IndexKey>) -> Self {
        Self::Range { lower, upper }
    }

    /// Keys in `low..=high`.
    #[must_use]
    pub fn between(low: impl Into<IndexKey>, high: impl Into<IndexKey>) -> Self {
        Self::Range {
            lower: Bound::Included(low.into()),
            upper: Bound::Included(high.into()),
        }
    }
}

/// Cast a value key to the index's declared type. `None` means no entry
/// can match.
fn normalize(def: &IndexDef, key: &IndexKey) -> Option<IndexKey> {
    match (def.content_type(), key) {
        (Some(ty), IndexKey::Value(v)) => v.cast(ty).map(IndexKey::Value),
        _ => Some(key.clone()),
    }
}

fn normalize_bound(def: &IndexDef, bound: &Bound<IndexKey>) -> Option<Bound<IndexKey>> {
    Some(match bound {
        Bound::Included(k) => Bound::Included(normalize(def, k)?),
        Bound::Excluded(k) => Bound::Excluded(normalize(def, k)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

pub(crate) fn lookup_in<S: RecordStore>(
    cx: &Cx,
    records: S,
    def: &IndexDef,
    query: &IndexQuery,
) -> Result<Vec<NodeKey>> {
    let mut tree = AvlTree::new(records);
    match query {
        IndexQuery::Exact(key) => match normalize(def, key) {
            Some(key) => tree.get(cx, &key),
            None => Ok(Vec::new()),
        },
        IndexQuery::Range { lower, upper } => {
            let (Some(lower), Some(upper)) =
                (normalize_bound(def, lower), normalize_bound(def, upper))
            else {
                return Ok(Vec::new());
            };
            let mut out: Vec<NodeKey> = tree
                .range(cx, lower.as_ref(), upper.as_ref())?
                .into_iter()
                .flat_map(|(_, refs)| refs)
                .collect();
            out.sort_unstable();
            out.dedup();
            Ok(out)
        }
    }
}

/// Whether `def` is live in `defs` with the same structure.
fn is_live(defs: &IndexDefs, def: &IndexDef) -> bool {
    defs.get(def.index_type(), def.id())
        .is_some_and(|d| d.same_structure(def))
}

/// Index access for one committed revision.
#[derive(Debug, Clone)]
pub struct IndexController {
    pages: PageReadTrx,
    defs: IndexDefs,
}

impl IndexController {
    pub(crate) fn new(pages: PageReadTrx) -> Result<Self> {
        let defs = pages.index_defs()?;
        Ok(Self { pages, defs })
    }

    #[must_use]
    pub fn revision(&self) -> Revision {
        self.pages.revision()
    }

    #[must_use]
    pub fn index_defs(&self) -> &IndexDefs {
        &self.defs
    }

    #[must_use]
    pub fn find_index(&self, index_type: IndexType, path: Option<&Path>) -> Option<&IndexDef> {
        self.defs.find_index(index_type, path)
    }

    #[must_use]
    pub fn find_cas_index(&self, path: &Path, content_type: Option<AtomicType>) -> Option<&IndexDef> {
        self.defs.find_cas_index(path, content_type)
    }

    /// Node keys matching `query`, ascending. An index that does not exist
    /// in this revision yields no keys.
    pub fn lookup(&self, def: &IndexDef, query: &IndexQuery) -> Result<Vec<NodeKey>> {
        if !is_live(&self.defs, def) {
            debug!(index = %def, revision = self.revision().get(), "lookup on absent index");
            return Ok(Vec::new());
        }
        let records = self.pages.index_records(def.index_type(), def.id());
        lookup_in(self.pages.cx(), records, def, query)
    }

    /// Define and build `defs` in `wtx`. See [`NodeWriteTrx::create_indexes`].
    pub fn create_indexes(
        &self,
        defs: impl IntoIterator<Item = IndexDef>,
        wtx: &mut NodeWriteTrx,
    ) -> Result<Vec<IndexDef>> {
        wtx.create_indexes(defs)
    }
}

// ---------------------------------------------------------------------------
// Maintenance on the write overlay
// ---------------------------------------------------------------------------

/// Lookup against staged index state.
pub(crate) fn staged_lookup(
    pages: &mut PageWriteTrx,
    def: &IndexDef,
    query: &IndexQuery,
) -> Result<Vec<NodeKey>> {
    if !is_live(pages.catalog(), def) {
        return Ok(Vec::new());
    }
    let cx = pages.cx().clone();
    let records = pages.index_records(def.index_type(), def.id());
    lookup_in(&cx, records, def, query)
}

/// File (`insert`) or withdraw the entries of `node` in every index of
/// `defs`.
fn apply_entries(
    pages: &mut PageWriteTrx,
    defs: &[IndexDef],
    node: &NodeRecord,
    path: &Path,
    insert: bool,
) -> Result<()> {
    let cx = pages.cx().clone();
    for def in defs {
        let Some(key) = entry_key(def, node, path) else {
            continue;
        };
        let mut tree = AvlTree::new(pages.index_records(def.index_type(), def.id()));
        if insert {
            tree.insert(&cx, &key, node.key)?;
        } else {
            tree.remove(&cx, &key, node.key)?;
        }
    }
    Ok(())
}

/// Nodes of the subtree rooted at `root` including attributes, in document
/// order.
pub(crate) fn subtree_nodes(pages: &PageWriteTrx, root: NodeKey) -> Result<Vec<NodeRecord>> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        pages.cx().checkpoint()?;
        let node = pages
            .node(key)?
            .ok_or(arbor_error::ArborError::NodeNotFound { key: key.get() })?;
        let mut children = Vec::new();
        let mut next = node.first_child;
        while let Some(child) = next {
            let record = pages
                .node(child)?
                .ok_or(arbor_error::ArborError::NodeNotFound { key: child.get() })?;
            next = record.right_sibling;
            children.push(child);
        }
        stack.extend(children.into_iter().rev());
        stack.extend(node.attributes.iter().rev().copied());
        out.push(node);
    }
    Ok(out)
}

fn maintain_subtree(pages: &mut PageWriteTrx, root: NodeKey, insert: bool) -> Result<()> {
    if pages.catalog().is_empty() {
        return Ok(());
    }
    let defs: Vec<IndexDef> = pages.catalog().iter().cloned().collect();
    for node in subtree_nodes(pages, root)? {
        let path = structural_path(|k| pages.node(k), &node)?;
        apply_entries(pages, &defs, &node, &path, insert)?;
    }
    Ok(())
}

/// File the entries of every node in the subtree at `root`.
pub(crate) fn index_subtree(pages: &mut PageWriteTrx, root: NodeKey) -> Result<()> {
    maintain_subtree(pages, root, true)
}

/// Withdraw the entries of every node in the subtree at `root`.
pub(crate) fn unindex_subtree(pages: &mut PageWriteTrx, root: NodeKey) -> Result<()> {
    maintain_subtree(pages, root, false)
}

/// Build freshly defined indexes by scanning the staged document.
pub(crate) fn build_indexes(pages: &mut PageWriteTrx, defs: &[IndexDef]) -> Result<()> {
    if defs.is_empty() {
        return Ok(());
    }
    let span = debug_span!("index_build", indexes = defs.len());
    let _guard = span.enter();
    let nodes = subtree_nodes(pages, NodeKey::DOCUMENT_ROOT)?;
    for node in &nodes {
        let path = structural_path(|k| pages.node(k), node)?;
        apply_entries(pages, defs, node, &path, true)?;
    }
    for def in defs {
        info!(
            index = %def,
            revision = pages.revision().get(),
            scanned = nodes.len(),
            "index built"
        );
    }
    Ok(())
}
