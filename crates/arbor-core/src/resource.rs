//! Per-resource shared state and the [`ResourceManager`] façade.
//!
//! A resource has any number of read transactions, each pinned to one
//! committed revision, and at most one write transaction. Committed state is
//! the published über-page plus the most recent revision root; a commit
//! replaces both under a short write lock after the page file header has been
//! switched, so readers starting afterwards see the new revision and readers
//! already running keep the revision root they pinned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arbor_error::{ArborError, Result};
use arbor_pager::{ClockCache, PageStore, RevisionRootPage, TrieRoot, UberPage, resolve};
use arbor_types::cx::Cx;
use arbor_types::{NodeKey, NodeRecord, Revision};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::axis::{TemporalAxis, TemporalAxisKind};
use crate::config::ResourceConfig;
use crate::index::IndexController;
use crate::node_read::NodeReadTrx;
use crate::node_write::NodeWriteTrx;
use crate::page_trx::{CommitReport, PageReadTrx, PageWriteTrx};

// ---------------------------------------------------------------------------
// Compaction hook
// ---------------------------------------------------------------------------

/// A byte range of the page file written by a commit that never became
/// visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrphanedExtent {
    pub start: u64,
    pub end: u64,
    /// Revision number the failed commit would have produced.
    pub revision: Revision,
}

impl OrphanedExtent {
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives page file ranges that no revision references.
///
/// Reclaiming them is left to the implementor; the resource only reports.
pub trait CompactionHook: Send + Sync {
    fn orphaned(&self, resource: &str, extent: OrphanedExtent);
}

// ---------------------------------------------------------------------------
// Revision metadata
// ---------------------------------------------------------------------------

/// Metadata of one committed revision.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RevisionInfo {
    pub revision: Revision,
    pub timestamp_ms: u64,
    pub commit_message: Option<String>,
    pub max_node_key: NodeKey,
}

impl RevisionInfo {
    fn from_root(root: &RevisionRootPage) -> Self {
        Self {
            revision: root.revision,
            timestamp_ms: root.timestamp_ms,
            commit_message: root.commit_message.clone(),
            max_node_key: root.max_node_key,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Older revision roots kept after a lookup. The latest root lives in
/// [`Committed`].
const ROOT_CACHE_CAPACITY: usize = 32;

#[derive(Debug)]
struct Committed {
    uber: UberPage,
    latest: Arc<RevisionRootPage>,
}

pub(crate) struct ResourceShared {
    name: String,
    config: ResourceConfig,
    store: Arc<PageStore>,
    committed: RwLock<Committed>,
    roots: Mutex<ClockCache<Revision, Arc<RevisionRootPage>>>,
    /// Id of the open write transaction, if any.
    writer: Mutex<Option<u64>>,
    next_trx_id: AtomicU64,
    /// Open read transactions per revision.
    pins: Mutex<BTreeMap<Revision, usize>>,
    compaction: RwLock<Option<Arc<dyn CompactionHook>>>,
    closed: AtomicBool,
    cx: Cx,
}

impl fmt::Debug for ResourceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceShared")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("committed", &*self.committed.read())
            .field("writer", &*self.writer.lock())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ResourceShared {
    fn with_state(
        name: String,
        config: ResourceConfig,
        store: Arc<PageStore>,
        uber: UberPage,
        latest: Arc<RevisionRootPage>,
        cx: Cx,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            store,
            committed: RwLock::new(Committed { uber, latest }),
            roots: Mutex::new(ClockCache::new(ROOT_CACHE_CAPACITY)),
            writer: Mutex::new(None),
            next_trx_id: AtomicU64::new(1),
            pins: Mutex::new(BTreeMap::new()),
            compaction: RwLock::new(None),
            closed: AtomicBool::new(false),
            cx,
        })
    }

    /// Write revision 0, holding only the document root, into a fresh store.
    pub(crate) fn bootstrap(
        cx: &Cx,
        name: String,
        config: ResourceConfig,
        store: PageStore,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(store);
        let empty = Arc::new(RevisionRootPage {
            revision: Revision::ZERO,
            timestamp_ms: 0,
            commit_message: None,
            max_node_key: NodeKey::DOCUMENT_ROOT,
            node_trie: TrieRoot::EMPTY,
            index_tries: Vec::new(),
            catalog: Vec::new(),
        });
        let uber = UberPage {
            revision_count: 0,
            revisions: TrieRoot::EMPTY,
        };
        let mut pages = PageWriteTrx::new(Arc::clone(&store), &config, uber, 0, empty, cx.clone())?;
        pages.put_node(&NodeRecord::document_root())?;
        let report = pages.commit(None)?;
        // Revision 0 is durable even when commits skip syncing.
        store.sync(cx)?;
        info!(resource = %name, versioning = %config.versioning, "resource bootstrapped");
        Ok(Self::with_state(
            name,
            config,
            store,
            report.uber,
            report.root,
            cx.clone(),
        ))
    }

    /// Attach to an existing store and load its most recent revision root.
    pub(crate) fn open(
        cx: &Cx,
        name: String,
        config: ResourceConfig,
        store: PageStore,
    ) -> Result<Arc<Self>> {
        let store = Arc::new(store);
        let uber = store.read_uber_page(cx)?;
        let Some(latest) = uber.most_recent_revision() else {
            return Err(ArborError::corrupt(format!(
                "resource '{name}' has no committed revision"
            )));
        };
        let root = read_root(&store, cx, &uber, latest)?;
        info!(
            resource = %name,
            revision = latest.get(),
            versioning = %config.versioning,
            "resource opened"
        );
        Ok(Self::with_state(name, config, store, uber, root, cx.clone()))
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    pub(crate) fn cx(&self) -> &Cx {
        &self.cx
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ArborError::TransactionClosed);
        }
        Ok(())
    }

    pub(crate) fn next_trx_id(&self) -> u64 {
        self.next_trx_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn most_recent_revision(&self) -> Revision {
        self.committed.read().latest.revision
    }

    fn snapshot(&self) -> (UberPage, Arc<RevisionRootPage>) {
        let committed = self.committed.read();
        (committed.uber, Arc::clone(&committed.latest))
    }

    /// Revision root of a committed revision.
    pub(crate) fn load_root(&self, revision: Revision) -> Result<Arc<RevisionRootPage>> {
        let (uber, latest) = self.snapshot();
        if revision > latest.revision {
            return Err(ArborError::RevisionNotFound {
                requested: i64::from(revision.get()),
                latest: latest.revision.get(),
            });
        }
        if revision == latest.revision {
            return Ok(latest);
        }
        if let Some(root) = self.roots.lock().get(&revision) {
            return Ok(root);
        }
        let root = read_root(&self.store, &self.cx, &uber, revision)?;
        self.roots.lock().insert(revision, Arc::clone(&root));
        Ok(root)
    }

    pub(crate) fn pin(self: &Arc<Self>, revision: Revision) -> RevisionPin {
        *self.pins.lock().entry(revision).or_insert(0) += 1;
        RevisionPin {
            shared: Arc::clone(self),
            revision,
        }
    }

    pub(crate) fn acquire_writer(self: &Arc<Self>) -> Result<WriterGuard> {
        let mut writer = self.writer.lock();
        self.ensure_open()?;
        if let Some(open) = *writer {
            warn!(resource = %self.name, open_trx = open, "second write transaction refused");
            return Err(ArborError::ConcurrentWrite {
                resource: self.name.clone(),
            });
        }
        let id = self.next_trx_id();
        *writer = Some(id);
        debug!(resource = %self.name, trx = id, "write lock acquired");
        Ok(WriterGuard {
            shared: Arc::clone(self),
            id,
        })
    }

    /// Make a committed revision visible to new readers.
    pub(crate) fn publish(&self, report: &CommitReport) {
        let previous = {
            let mut committed = self.committed.write();
            committed.uber = report.uber;
            std::mem::replace(&mut committed.latest, Arc::clone(&report.root))
        };
        self.roots.lock().insert(previous.revision, previous);
    }

    /// Report the page file bytes appended by a commit that failed.
    pub(crate) fn commit_failed(&self, revision: Revision, start: u64, err: &ArborError) {
        let extent = OrphanedExtent {
            start,
            end: self.store.end_offset().max(start),
            revision,
        };
        error!(
            resource = %self.name,
            revision = revision.get(),
            orphaned_bytes = extent.len(),
            error = %err,
            "commit failed"
        );
        if extent.is_empty() {
            return;
        }
        let hook = self.compaction.read().clone();
        if let Some(hook) = hook {
            hook.orphaned(&self.name, extent);
        }
    }

    /// Read access to `revision` without a node cursor.
    pub(crate) fn page_read_trx(&self, revision: Revision) -> Result<PageReadTrx> {
        self.ensure_open()?;
        let root = self.load_root(revision)?;
        Ok(PageReadTrx::new(
            Arc::clone(&self.store),
            root,
            self.cx.clone(),
        ))
    }

    /// Close unless a write transaction is open. The writer slot stays
    /// locked while the resource is marked closed, so no writer can start
    /// in between.
    pub(crate) fn close(&self) -> Result<()> {
        {
            let writer = self.writer.lock();
            if let Some(open) = *writer {
                warn!(resource = %self.name, open_trx = open, "close refused");
                return Err(ArborError::ConcurrentWrite {
                    resource: self.name.clone(),
                });
            }
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
        }
        self.roots.lock().clear();
        self.store.close(&self.cx)?;
        info!(resource = %self.name, "resource closed");
        Ok(())
    }
}

fn read_root(
    store: &PageStore,
    cx: &Cx,
    uber: &UberPage,
    revision: Revision,
) -> Result<Arc<RevisionRootPage>> {
    let page_ref = resolve(store, cx, &uber.revisions, u64::from(revision.get()))?
        .ok_or_else(|| {
            ArborError::corrupt(format!("revision trie has no entry for {revision}"))
        })?;
    let root = store.read_page(cx, page_ref)?.as_revision_root()?.clone();
    if root.revision != revision {
        return Err(ArborError::corrupt(format!(
            "revision trie entry {revision} points at {}",
            root.revision
        )));
    }
    Ok(Arc::new(root))
}

/// Registration of an open read transaction. Released on drop.
#[derive(Debug)]
pub(crate) struct RevisionPin {
    shared: Arc<ResourceShared>,
    revision: Revision,
}

impl RevisionPin {
    pub(crate) fn shared(&self) -> &Arc<ResourceShared> {
        &self.shared
    }
}

impl Drop for RevisionPin {
    fn drop(&mut self) {
        let mut pins = self.shared.pins.lock();
        if let Some(count) = pins.get_mut(&self.revision) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.revision);
            }
        }
    }
}

/// The resource's write lock. Released on drop.
#[derive(Debug)]
pub(crate) struct WriterGuard {
    shared: Arc<ResourceShared>,
    id: u64,
}

impl WriterGuard {
    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn shared(&self) -> &Arc<ResourceShared> {
        &self.shared
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let mut writer = self.shared.writer.lock();
        if *writer == Some(self.id) {
            *writer = None;
            debug!(resource = %self.shared.name, trx = self.id, "write lock released");
        }
    }
}

// ---------------------------------------------------------------------------
// Façade
// ---------------------------------------------------------------------------

/// Entry point to one resource: opens transactions, index controllers, and
/// temporal axes. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    shared: Arc<ResourceShared>,
}

impl ResourceManager {
    pub(crate) const fn new(shared: Arc<ResourceShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ResourceShared> {
        &self.shared
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    #[must_use]
    pub fn config(&self) -> &ResourceConfig {
        self.shared.config()
    }

    #[must_use]
    pub fn most_recent_revision(&self) -> Revision {
        self.shared.most_recent_revision()
    }

    /// Validate an untyped revision number.
    pub fn checked_revision(&self, revision: i64) -> Result<Revision> {
        let latest = self.most_recent_revision();
        u32::try_from(revision)
            .ok()
            .map(Revision::new)
            .filter(|r| *r <= latest)
            .ok_or(ArborError::RevisionNotFound {
                requested: revision,
                latest: latest.get(),
            })
    }

    /// Read transaction pinned to `revision`, or to the most recent one.
    pub fn begin_node_read_only_trx(&self, revision: Option<Revision>) -> Result<NodeReadTrx> {
        let revision = revision.unwrap_or_else(|| self.most_recent_revision());
        let pages = self.shared.page_read_trx(revision)?;
        let pin = self.shared.pin(revision);
        let id = self.shared.next_trx_id();
        debug!(resource = %self.name(), trx = id, revision = revision.get(), "read transaction opened");
        NodeReadTrx::new(id, pages, pin)
    }

    /// Read transaction pinned to the newest revision committed at or before
    /// `timestamp_ms`. Instants before the first revision resolve to
    /// revision 0.
    pub fn begin_read_only_trx_at(&self, timestamp_ms: u64) -> Result<NodeReadTrx> {
        let revision = self.revision_at(timestamp_ms)?;
        self.begin_node_read_only_trx(Some(revision))
    }

    fn revision_at(&self, timestamp_ms: u64) -> Result<Revision> {
        // Commit timestamps never decrease, so the predicate is monotone.
        let (mut lo, mut hi) = (0u32, self.most_recent_revision().get());
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.shared.load_root(Revision::new(mid))?.timestamp_ms <= timestamp_ms {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Ok(Revision::new(lo))
    }

    /// Open the resource's write transaction.
    ///
    /// # Errors
    ///
    /// [`ArborError::ConcurrentWrite`] while another write transaction is
    /// open on this resource.
    pub fn begin_node_trx(&self) -> Result<NodeWriteTrx> {
        let guard = self.shared.acquire_writer()?;
        let (uber, latest) = self.shared.snapshot();
        let pages = PageWriteTrx::new(
            Arc::clone(self.shared.store()),
            self.shared.config(),
            uber,
            latest.timestamp_ms,
            latest,
            self.shared.cx().create_child(),
        )?;
        NodeWriteTrx::new(pages, guard)
    }

    /// Id of the open write transaction, if any.
    #[must_use]
    pub fn node_write_trx(&self) -> Option<u64> {
        *self.shared.writer.lock()
    }

    pub fn index_controller(&self, revision: Option<Revision>) -> Result<IndexController> {
        let revision = revision.unwrap_or_else(|| self.most_recent_revision());
        IndexController::new(self.shared.page_read_trx(revision)?)
    }

    pub fn revision_info(&self, revision: Revision) -> Result<RevisionInfo> {
        Ok(RevisionInfo::from_root(&*self.shared.load_root(revision)?))
    }

    /// Metadata of every committed revision, newest first.
    pub fn history(&self) -> Result<Vec<RevisionInfo>> {
        let latest = self.most_recent_revision().get();
        (0..=latest)
            .rev()
            .map(|r| self.revision_info(Revision::new(r)))
            .collect()
    }

    /// Revisions with open read transactions and how many each has.
    #[must_use]
    pub fn pinned_revisions(&self) -> Vec<(Revision, usize)> {
        self.shared
            .pins
            .lock()
            .iter()
            .map(|(r, n)| (*r, *n))
            .collect()
    }

    pub fn set_compaction_hook(&self, hook: Arc<dyn CompactionHook>) {
        *self.shared.compaction.write() = Some(hook);
    }

    /// Revisions of the node under `trx`'s cursor, per `kind`.
    #[must_use]
    pub fn temporal_axis(&self, trx: &NodeReadTrx, kind: TemporalAxisKind) -> TemporalAxis {
        TemporalAxis::new(self, trx, kind)
    }

    /// Close the resource. No transaction can start on it afterwards.
    ///
    /// # Errors
    ///
    /// [`ArborError::ConcurrentWrite`] while a write transaction is open.
    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::NodeCursor;
    use crate::node_write::{InsertPosition, NewNode};
    use crate::test_util::memory_resource;

    #[test]
    fn revision_root_cache_stays_bounded() {
        let (_db, rm) = memory_resource();
        let mut w = rm.begin_node_trx().unwrap();
        let log = w
            .insert(InsertPosition::FirstChild, NewNode::element("log"))
            .unwrap();
        w.commit().unwrap();
        let commits = 2 * ROOT_CACHE_CAPACITY;
        for i in 0..commits {
            let mut w = rm.begin_node_trx().unwrap();
            w.move_to(log).unwrap();
            w.insert(InsertPosition::LastChild, NewNode::comment(i.to_string()))
                .unwrap();
            w.commit().unwrap();
        }
        let latest = rm.most_recent_revision().get();
        assert_eq!(usize::try_from(latest).unwrap(), commits + 1);

        for _ in 0..2 {
            for r in 0..=latest {
                let info = rm.revision_info(Revision::new(r)).unwrap();
                assert_eq!(info.revision, Revision::new(r));
            }
            assert!(rm.shared.roots.lock().len() <= ROOT_CACHE_CAPACITY);
        }
        let mut reader = rm.begin_node_read_only_trx(Some(Revision::new(1))).unwrap();
        assert!(reader.move_to(log).unwrap());
        assert!(!reader.has_children());
    }
}
