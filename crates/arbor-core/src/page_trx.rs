//! Page-level transactions.
//!
//! A [`PageReadTrx`] resolves records against the tries of one committed
//! revision root. A [`PageWriteTrx`] stages changed record pages in an
//! in-memory overlay on top of a base revision; nothing reaches the page
//! file until [`PageWriteTrx::commit`], which appends the new fragments,
//! the copied trie paths, a revision root, and an über-page, then publishes
//! the über-page in one header switch.

use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_index::{IndexDefs, RecordStore, RecordStoreMut};
use arbor_pager::versioning::read_slot;
use arbor_pager::{
    IndexTrieRoot, Page, PageContainer, PageRef, PageStore, RevisionRootPage, TrieRoot,
    TrieWriter, UberPage, VersioningStrategy, load_container, resolve,
};
use arbor_types::cx::Cx;
use arbor_types::limits::split_record_key;
use arbor_types::{IndexId, IndexType, NodeKey, NodeRecord, Revision};
use tracing::{debug, debug_span, info};

use crate::config::ResourceConfig;

/// Which record space of a revision a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrieId {
    Node,
    Index(IndexType, IndexId),
}

impl TrieId {
    fn base_root(self, root: &RevisionRootPage) -> TrieRoot {
        match self {
            Self::Node => root.node_trie,
            Self::Index(ty, id) => root.index_trie(ty, id).unwrap_or(TrieRoot::EMPTY),
        }
    }
}

fn read_committed(
    store: &PageStore,
    cx: &Cx,
    trie: &TrieRoot,
    record_key: u64,
) -> Result<Option<Vec<u8>>> {
    let (page_key, slot) = split_record_key(record_key);
    match resolve(store, cx, trie, page_key)? {
        Some(page_ref) => read_slot(store, cx, page_ref, page_key, slot),
        None => Ok(None),
    }
}

fn decode_node(key: NodeKey, bytes: Option<Vec<u8>>) -> Result<Option<NodeRecord>> {
    let Some(bytes) = bytes else {
        return Ok(None);
    };
    let node = NodeRecord::decode(&bytes)?;
    if node.key != key {
        return Err(ArborError::corrupt(format!(
            "record slot of {key} holds {}",
            node.key
        )));
    }
    Ok(Some(node))
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

/// Read access to one committed revision.
#[derive(Debug, Clone)]
pub struct PageReadTrx {
    store: Arc<PageStore>,
    root: Arc<RevisionRootPage>,
    cx: Cx,
}

impl PageReadTrx {
    pub(crate) fn new(store: Arc<PageStore>, root: Arc<RevisionRootPage>, cx: Cx) -> Self {
        Self { store, root, cx }
    }

    #[must_use]
    pub fn revision(&self) -> Revision {
        self.root.revision
    }

    #[must_use]
    pub fn revision_root(&self) -> &RevisionRootPage {
        &self.root
    }

    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.cx
    }

    pub fn read_record(&self, trie: TrieId, record_key: u64) -> Result<Option<Vec<u8>>> {
        self.cx.checkpoint()?;
        read_committed(&self.store, &self.cx, &trie.base_root(&self.root), record_key)
    }

    pub fn node(&self, key: NodeKey) -> Result<Option<NodeRecord>> {
        decode_node(key, self.read_record(TrieId::Node, key.get())?)
    }

    pub fn index_defs(&self) -> Result<IndexDefs> {
        IndexDefs::decode(&self.root.catalog)
    }

    /// Record space of one index, for read-only tree access.
    #[must_use]
    pub fn index_records(&self, index_type: IndexType, index_id: IndexId) -> ReadRecords<'_> {
        ReadRecords {
            trx: self,
            trie: TrieId::Index(index_type, index_id),
        }
    }
}

/// [`RecordStore`] over one record space of a committed revision.
#[derive(Debug)]
pub struct ReadRecords<'a> {
    trx: &'a PageReadTrx,
    trie: TrieId,
}

impl RecordStore for ReadRecords<'_> {
    fn read_record(&mut self, cx: &Cx, key: u64) -> Result<Option<Vec<u8>>> {
        cx.checkpoint()?;
        let root = self.trie.base_root(&self.trx.root);
        read_committed(&self.trx.store, cx, &root, key)
    }
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

/// Staged state of a write transaction. Cloning it is a savepoint.
#[derive(Debug, Clone)]
pub(crate) struct Overlay {
    pages: BTreeMap<TrieId, BTreeMap<u64, PageContainer>>,
    catalog: IndexDefs,
    max_node_key: NodeKey,
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub revision: Revision,
    pub uber: UberPage,
    pub root: Arc<RevisionRootPage>,
    pub record_pages: usize,
    pub bytes_written: u64,
}

/// Overlay of staged record pages on top of a base revision.
#[derive(Debug)]
pub struct PageWriteTrx {
    store: Arc<PageStore>,
    versioning: VersioningStrategy,
    window: u32,
    /// Über-page the new revision is appended to.
    uber: UberPage,
    /// Timestamp of the most recent revision; new ones never go below it.
    latest_timestamp_ms: u64,
    /// Revision whose content the overlay builds on.
    base: Arc<RevisionRootPage>,
    revision: Revision,
    overlay: Overlay,
    cx: Cx,
}

impl PageWriteTrx {
    pub(crate) fn new(
        store: Arc<PageStore>,
        config: &ResourceConfig,
        uber: UberPage,
        latest_timestamp_ms: u64,
        base: Arc<RevisionRootPage>,
        cx: Cx,
    ) -> Result<Self> {
        let overlay = Overlay {
            pages: BTreeMap::new(),
            catalog: IndexDefs::decode(&base.catalog)?,
            max_node_key: base.max_node_key,
        };
        Ok(Self {
            store,
            versioning: config.versioning,
            window: config.revisions_to_restore,
            uber,
            latest_timestamp_ms,
            base,
            revision: Revision::new(uber.revision_count),
            overlay,
            cx,
        })
    }

    /// Revision this transaction will commit as.
    #[must_use]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    #[must_use]
    pub fn base_revision(&self) -> Revision {
        self.base.revision
    }

    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.cx
    }

    #[must_use]
    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub(crate) fn savepoint(&self) -> Overlay {
        self.overlay.clone()
    }

    pub(crate) fn restore(&mut self, savepoint: Overlay) {
        self.overlay = savepoint;
    }

    /// Drop staged changes and rebuild on top of `base`. The node key
    /// counter is kept so keys handed out earlier are never reassigned.
    pub(crate) fn reset_to(&mut self, base: Arc<RevisionRootPage>) -> Result<()> {
        let catalog = IndexDefs::decode(&base.catalog)?;
        let max_node_key = self.overlay.max_node_key.max(base.max_node_key);
        self.overlay = Overlay {
            pages: BTreeMap::new(),
            catalog,
            max_node_key,
        };
        self.base = base;
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> &IndexDefs {
        &self.overlay.catalog
    }

    pub(crate) fn catalog_mut(&mut self) -> &mut IndexDefs {
        &mut self.overlay.catalog
    }

    #[must_use]
    pub fn max_node_key(&self) -> NodeKey {
        self.overlay.max_node_key
    }

    pub(crate) fn allocate_node_key(&mut self) -> NodeKey {
        let key = self.overlay.max_node_key.next();
        self.overlay.max_node_key = key;
        key
    }

    /// Whether anything was staged.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.overlay
            .pages
            .values()
            .flat_map(BTreeMap::values)
            .any(PageContainer::is_dirty)
            || self.overlay.catalog.len() != self.base_catalog_len()
    }

    fn base_catalog_len(&self) -> usize {
        IndexDefs::decode(&self.base.catalog).map_or(0, |d| d.len())
    }

    pub fn read_record(&self, trie: TrieId, record_key: u64) -> Result<Option<Vec<u8>>> {
        self.cx.checkpoint()?;
        let (page_key, slot) = split_record_key(record_key);
        if let Some(container) = self
            .overlay
            .pages
            .get(&trie)
            .and_then(|pages| pages.get(&page_key))
        {
            return Ok(container.get(slot).map(<[u8]>::to_vec));
        }
        read_committed(
            &self.store,
            &self.cx,
            &trie.base_root(&self.base),
            record_key,
        )
    }

    fn container_mut(&mut self, trie: TrieId, page_key: u64) -> Result<&mut PageContainer> {
        let loaded = self
            .overlay
            .pages
            .get(&trie)
            .is_some_and(|pages| pages.contains_key(&page_key));
        if !loaded {
            let root = trie.base_root(&self.base);
            let latest = resolve(&self.store, &self.cx, &root, page_key)?;
            let container = load_container(&self.store, &self.cx, page_key, latest)?;
            self.overlay
                .pages
                .entry(trie)
                .or_default()
                .insert(page_key, container);
        }
        self.overlay
            .pages
            .get_mut(&trie)
            .and_then(|pages| pages.get_mut(&page_key))
            .ok_or_else(|| ArborError::internal("record page vanished from overlay"))
    }

    pub fn write_record(&mut self, trie: TrieId, record_key: u64, data: Vec<u8>) -> Result<()> {
        self.cx.checkpoint()?;
        let (page_key, slot) = split_record_key(record_key);
        self.container_mut(trie, page_key)?.set(slot, data);
        Ok(())
    }

    pub fn remove_record(&mut self, trie: TrieId, record_key: u64) -> Result<()> {
        self.cx.checkpoint()?;
        let (page_key, slot) = split_record_key(record_key);
        self.container_mut(trie, page_key)?.remove(slot);
        Ok(())
    }

    pub fn node(&self, key: NodeKey) -> Result<Option<NodeRecord>> {
        decode_node(key, self.read_record(TrieId::Node, key.get())?)
    }

    pub fn put_node(&mut self, node: &NodeRecord) -> Result<()> {
        self.write_record(TrieId::Node, node.key.get(), node.encode())
    }

    pub fn delete_node(&mut self, key: NodeKey) -> Result<()> {
        self.remove_record(TrieId::Node, key.get())
    }

    /// Record space of one index, for tree maintenance.
    pub fn index_records(&mut self, index_type: IndexType, index_id: IndexId) -> WriteRecords<'_> {
        WriteRecords {
            trx: self,
            trie: TrieId::Index(index_type, index_id),
        }
    }

    /// Append the overlay and publish it as revision [`Self::revision`].
    pub fn commit(self, message: Option<String>) -> Result<CommitReport> {
        let span = debug_span!(
            "commit",
            resource = %self.store.name(),
            revision = self.revision.get()
        );
        let _guard = span.enter();
        self.cx.checkpoint()?;
        if self.revision.get() != self.uber.revision_count {
            return Err(ArborError::internal(format!(
                "commit of {} against über-page with {} revisions",
                self.revision, self.uber.revision_count
            )));
        }
        let store = &*self.store;
        let cx = &self.cx;
        let start = store.end_offset();

        let mut record_pages = 0usize;
        let mut roots: BTreeMap<TrieId, TrieRoot> = BTreeMap::new();
        for (trie, pages) in &self.overlay.pages {
            let mut writer = TrieWriter::new(trie.base_root(&self.base));
            for (&page_key, container) in pages {
                if !container.is_dirty() {
                    continue;
                }
                let fragment = container.build_fragment(self.versioning, self.window, self.revision)?;
                let page_ref = store.write_page(cx, &Page::Record(fragment))?;
                writer.bind(store, cx, page_key, page_ref)?;
                record_pages += 1;
            }
            roots.insert(*trie, writer.commit(store, cx)?);
        }

        let node_trie = roots
            .get(&TrieId::Node)
            .copied()
            .unwrap_or(self.base.node_trie);
        let index_tries = self
            .overlay
            .catalog
            .iter()
            .map(|def| {
                let trie = TrieId::Index(def.index_type(), def.id());
                IndexTrieRoot {
                    index_type: def.index_type(),
                    index_id: def.id(),
                    trie: roots
                        .get(&trie)
                        .copied()
                        .unwrap_or_else(|| trie.base_root(&self.base)),
                }
            })
            .collect();
        let root = RevisionRootPage {
            revision: self.revision,
            timestamp_ms: cx.now_unix_millis().max(self.latest_timestamp_ms),
            commit_message: message,
            max_node_key: self.overlay.max_node_key,
            node_trie,
            index_tries,
            catalog: self.overlay.catalog.encode(),
        };
        let root_ref = store.write_page(cx, &Page::RevisionRoot(root.clone()))?;

        let mut revisions = TrieWriter::new(self.uber.revisions);
        revisions.bind(store, cx, u64::from(self.revision.get()), root_ref)?;
        let uber = UberPage {
            revision_count: self.revision.get() + 1,
            revisions: revisions.commit(store, cx)?,
        };
        let uber_ref: PageRef = store.write_page(cx, &Page::Uber(uber))?;
        store.publish(cx, uber_ref)?;

        let bytes_written = store.end_offset() - start;
        info!(
            resource = %store.name(),
            revision = self.revision.get(),
            base = self.base.revision.get(),
            record_pages,
            bytes_written,
            "revision committed"
        );
        Ok(CommitReport {
            revision: self.revision,
            uber,
            root: Arc::new(root),
            record_pages,
            bytes_written,
        })
    }
}

/// [`RecordStoreMut`] over one record space of a write overlay.
#[derive(Debug)]
pub struct WriteRecords<'a> {
    trx: &'a mut PageWriteTrx,
    trie: TrieId,
}

impl RecordStore for WriteRecords<'_> {
    fn read_record(&mut self, _cx: &Cx, key: u64) -> Result<Option<Vec<u8>>> {
        self.trx.read_record(self.trie, key)
    }
}

impl RecordStoreMut for WriteRecords<'_> {
    fn write_record(&mut self, _cx: &Cx, key: u64, data: Vec<u8>) -> Result<()> {
        debug!(trie = ?self.trie, record = key, "index record staged");
        self.trx.write_record(self.trie, key, data)
    }
}
