//! Read-only node transactions.

use arbor_error::{ArborError, Result};
use arbor_types::{NodeKey, NodeRecord, Revision};

use crate::cursor::NodeCursor;
use crate::cursor::sealed::CursorState;
use crate::index::IndexController;
use crate::page_trx::PageReadTrx;
use crate::resource::RevisionPin;

/// A cursor over one committed revision.
///
/// The revision stays readable for as long as the transaction lives,
/// whatever is committed meanwhile. Dropping it releases the pin.
#[derive(Debug)]
pub struct NodeReadTrx {
    id: u64,
    pages: PageReadTrx,
    current: NodeRecord,
    pin: RevisionPin,
}

impl NodeReadTrx {
    pub(crate) fn new(id: u64, pages: PageReadTrx, pin: RevisionPin) -> Result<Self> {
        let current = pages.node(NodeKey::DOCUMENT_ROOT)?.ok_or_else(|| {
            ArborError::corrupt(format!("{} has no document root", pages.revision()))
        })?;
        Ok(Self {
            id,
            pages,
            current,
            pin,
        })
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn revision(&self) -> Revision {
        self.pages.revision()
    }

    #[must_use]
    pub fn resource_name(&self) -> &str {
        self.pin.shared().name()
    }

    /// Commit time of the revision, in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.pages.revision_root().timestamp_ms
    }

    #[must_use]
    pub fn commit_message(&self) -> Option<&str> {
        self.pages.revision_root().commit_message.as_deref()
    }

    /// Largest node key ever assigned up to this revision.
    #[must_use]
    pub fn max_node_key(&self) -> NodeKey {
        self.pages.revision_root().max_node_key
    }

    /// Indexes of this revision.
    pub fn index_controller(&self) -> Result<IndexController> {
        IndexController::new(self.pages.clone())
    }
}

impl CursorState for NodeReadTrx {
    fn current_node(&self) -> &NodeRecord {
        &self.current
    }

    fn set_current(&mut self, node: NodeRecord) {
        self.current = node;
    }

    fn fetch(&self, key: NodeKey) -> Result<Option<NodeRecord>> {
        self.pages.node(key)
    }
}

impl NodeCursor for NodeReadTrx {}
