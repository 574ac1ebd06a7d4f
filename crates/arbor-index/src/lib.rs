//! Secondary indexes for arbor resources.
//!
//! An index is described by an [`IndexDef`] kept in the resource's
//! [`IndexDefs`] catalog. Its entries live in an [`AvlTree`] whose nodes are
//! records of the index's own versioned record space, so an index revision
//! is always consistent with the document revision it was committed with.

pub mod avl;
pub mod def;
pub mod filter;
pub mod key;

pub use avl::{AvlTree, RecordStore, RecordStoreMut};
pub use def::{IndexDef, IndexDefKind, IndexDefs};
pub use filter::entry_key;
pub use key::IndexKey;
