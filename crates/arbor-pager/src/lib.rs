//! Page storage for arbor resources.
//!
//! Pages are immutable once appended to the page file. A revision becomes
//! visible only when the file header is switched to a new über-page, so a
//! crash at any earlier point leaves the previous revision intact.

pub mod cache;
pub mod header;
pub mod page;
pub mod store;
pub mod trie;
pub mod versioning;

pub use cache::{CacheStats, ClockCache};
pub use header::{HEADER_SIZE, HeaderSlot};
pub use page::{
    FragmentRef, IndexTrieRoot, IndirectPage, Page, PageKind, PageRef, RecordPage,
    RevisionRootPage, SlotMap, TrieRoot, UberPage,
};
pub use store::PageStore;
pub use trie::{TrieWriter, resolve};
pub use versioning::{PageContainer, VersioningStrategy, combine_fragments, load_container};
