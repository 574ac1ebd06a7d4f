//! Public API facade for arbor.
//!
//! A [`Database`] holds named resources; each resource is a tree of nodes
//! whose every committed state stays readable as a numbered revision.
//!
//! ```ignore
//! use arbor::{Database, DatabaseConfig, InsertPosition, NewNode, ResourceConfig};
//! use arbor::vfs::MemoryVfs;
//!
//! let db = Database::open(MemoryVfs::new(), DatabaseConfig::new("/db"))?;
//! let rm = db.create_resource("books", ResourceConfig::default())?;
//! let mut w = rm.begin_node_trx()?;
//! w.insert(InsertPosition::FirstChild, NewNode::element("catalog"))?;
//! let revision = w.commit()?;
//! let r = rm.begin_node_read_only_trx(Some(revision))?;
//! ```

pub use arbor_core::{
    CompactionHook, Database, DatabaseConfig, IndexController, IndexQuery, InsertPosition,
    NewNode, NodeCursor, NodeReadTrx, NodeWriteTrx, OrphanedExtent, ResourceConfig,
    ResourceManager, RevisionInfo, TemporalAxis, TemporalAxisKind,
};
pub use arbor_error::{ArborError, ErrorCategory, Result};
pub use arbor_index::{IndexDef, IndexDefKind, IndexKey};
pub use arbor_pager::VersioningStrategy;
pub use arbor_types::{
    AtomicType, AtomicValue, IndexId, IndexType, NodeKey, NodeKind, NodeRecord, Path, PathStep,
    QName, Revision,
};
pub use arbor_vfs as vfs;
