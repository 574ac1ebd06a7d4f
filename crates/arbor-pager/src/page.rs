//! Page model and payload codec.
//!
//! Four page kinds make up a resource:
//!
//! - [`UberPage`]: the root pointer; holds the revision count and the trie
//!   that maps revision numbers to revision-root pages.
//! - [`RevisionRootPage`]: one per committed revision; holds the node trie
//!   root, one trie root per live index, the index catalog, and commit
//!   metadata.
//! - [`IndirectPage`]: an inner trie node with up to 128 child references.
//! - [`RecordPage`]: a versioned fragment of up to 128 record slots.

use std::collections::BTreeMap;
use std::fmt;

use arbor_error::{ArborError, Result};
use arbor_types::encoding::{ByteReader, ByteWriter};
use arbor_types::limits::{INDIRECT_FANOUT, INDIRECT_FANOUT_SHIFT, MAX_TRIE_HEIGHT};
use arbor_types::{IndexId, IndexType, NodeKey, Revision};

/// Location of a page frame: its byte offset in the page file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PageRef(u64);

impl PageRef {
    #[inline]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Root of a trie together with its height (number of indirect levels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrieRoot {
    pub root: Option<PageRef>,
    pub height: u8,
}

impl TrieRoot {
    /// A trie with no pages yet.
    pub const EMPTY: Self = Self {
        root: None,
        height: 1,
    };

    /// Number of leaf keys addressable at `height`.
    #[must_use]
    pub const fn capacity_at(height: u8) -> u64 {
        1u64 << (INDIRECT_FANOUT_SHIFT * height as u32)
    }

    #[must_use]
    pub const fn capacity(&self) -> u64 {
        Self::capacity_at(self.height)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.height);
        w.put_opt_varint(self.root.map(PageRef::offset));
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let height = r.get_u8()?;
        if height == 0 || height > MAX_TRIE_HEIGHT {
            return Err(ArborError::corrupt(format!("invalid trie height {height}")));
        }
        let root = r.get_opt_varint()?.map(PageRef::new);
        Ok(Self { root, height })
    }
}

impl Default for TrieRoot {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Reference to an older fragment of a record page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentRef {
    pub revision: Revision,
    pub page_ref: PageRef,
}

/// Record slots of a page fragment. `None` is a tombstone.
pub type SlotMap = BTreeMap<u16, Option<Vec<u8>>>;

/// A versioned fragment of a record page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    pub page_key: u64,
    /// Revision this fragment was written in.
    pub revision: Revision,
    /// Fragments written since the last full dump; 0 for a full dump.
    pub dump_seq: u32,
    pub slots: SlotMap,
    /// Older fragments needed to reconstruct the page, newest first.
    pub fragments: Vec<FragmentRef>,
}

impl RecordPage {
    #[must_use]
    pub fn full(page_key: u64, revision: Revision, slots: SlotMap) -> Self {
        Self {
            page_key,
            revision,
            dump_seq: 0,
            slots,
            fragments: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_full_dump(&self) -> bool {
        self.dump_seq == 0
    }
}

/// An inner trie node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndirectPage {
    refs: BTreeMap<u8, PageRef>,
}

impl IndirectPage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<PageRef> {
        u8::try_from(slot)
            .ok()
            .and_then(|s| self.refs.get(&s).copied())
    }

    /// Set `slot` to `page_ref`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is outside the fanout.
    pub fn set(&mut self, slot: usize, page_ref: PageRef) {
        assert!(slot < INDIRECT_FANOUT, "indirect slot {slot} out of range");
        #[allow(clippy::cast_possible_truncation)]
        self.refs.insert(slot as u8, page_ref);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, PageRef)> + '_ {
        self.refs.iter().map(|(&s, &r)| (usize::from(s), r))
    }
}

/// Trie root of one secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexTrieRoot {
    pub index_type: IndexType,
    pub index_id: IndexId,
    pub trie: TrieRoot,
}

/// The root page of one committed revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRootPage {
    pub revision: Revision,
    pub timestamp_ms: u64,
    pub commit_message: Option<String>,
    /// Highest node key ever assigned up to this revision.
    pub max_node_key: NodeKey,
    pub node_trie: TrieRoot,
    pub index_tries: Vec<IndexTrieRoot>,
    /// Encoded index definitions.
    pub catalog: Vec<u8>,
}

impl RevisionRootPage {
    #[must_use]
    pub fn index_trie(&self, index_type: IndexType, index_id: IndexId) -> Option<TrieRoot> {
        self.index_tries
            .iter()
            .find(|t| t.index_type == index_type && t.index_id == index_id)
            .map(|t| t.trie)
    }
}

/// The resource's root pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UberPage {
    pub revision_count: u32,
    pub revisions: TrieRoot,
}

impl UberPage {
    #[must_use]
    pub fn most_recent_revision(&self) -> Option<Revision> {
        self.revision_count.checked_sub(1).map(Revision::new)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Uber,
    RevisionRoot,
    Indirect,
    Record,
}

impl PageKind {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Uber => 1,
            Self::RevisionRoot => 2,
            Self::Indirect => 3,
            Self::Record => 4,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Uber),
            2 => Some(Self::RevisionRoot),
            3 => Some(Self::Indirect),
            4 => Some(Self::Record),
            _ => None,
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uber => "uber",
            Self::RevisionRoot => "revision-root",
            Self::Indirect => "indirect",
            Self::Record => "record",
        })
    }
}

/// Any page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Uber(UberPage),
    RevisionRoot(RevisionRootPage),
    Indirect(IndirectPage),
    Record(RecordPage),
}

fn wrong_kind(expected: PageKind, actual: PageKind) -> ArborError {
    ArborError::corrupt(format!("expected {expected} page, found {actual} page"))
}

impl Page {
    #[must_use]
    pub const fn kind(&self) -> PageKind {
        match self {
            Self::Uber(_) => PageKind::Uber,
            Self::RevisionRoot(_) => PageKind::RevisionRoot,
            Self::Indirect(_) => PageKind::Indirect,
            Self::Record(_) => PageKind::Record,
        }
    }

    pub fn as_uber(&self) -> Result<&UberPage> {
        match self {
            Self::Uber(p) => Ok(p),
            other => Err(wrong_kind(PageKind::Uber, other.kind())),
        }
    }

    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match self {
            Self::RevisionRoot(p) => Ok(p),
            other => Err(wrong_kind(PageKind::RevisionRoot, other.kind())),
        }
    }

    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match self {
            Self::Indirect(p) => Ok(p),
            other => Err(wrong_kind(PageKind::Indirect, other.kind())),
        }
    }

    pub fn as_record(&self) -> Result<&RecordPage> {
        match self {
            Self::Record(p) => Ok(p),
            other => Err(wrong_kind(PageKind::Record, other.kind())),
        }
    }

    /// Encode the page payload (without frame header).
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(256);
        match self {
            Self::Uber(p) => {
                w.put_u32(p.revision_count);
                p.revisions.encode(&mut w);
            }
            Self::RevisionRoot(p) => {
                w.put_u32(p.revision.get());
                w.put_u64(p.timestamp_ms);
                match &p.commit_message {
                    Some(m) => {
                        w.put_u8(1);
                        w.put_str(m);
                    }
                    None => w.put_u8(0),
                }
                w.put_varint(p.max_node_key.get());
                p.node_trie.encode(&mut w);
                w.put_varint(p.index_tries.len() as u64);
                for t in &p.index_tries {
                    w.put_u8(t.index_type.to_byte());
                    w.put_varint(u64::from(t.index_id.get()));
                    t.trie.encode(&mut w);
                }
                w.put_bytes(&p.catalog);
            }
            Self::Indirect(p) => {
                w.put_varint(p.refs.len() as u64);
                for (&slot, r) in &p.refs {
                    w.put_u8(slot);
                    w.put_varint(r.offset());
                }
            }
            Self::Record(p) => {
                w.put_varint(p.page_key);
                w.put_u32(p.revision.get());
                w.put_varint(u64::from(p.dump_seq));
                w.put_varint(p.slots.len() as u64);
                for (&slot, data) in &p.slots {
                    w.put_u16(slot);
                    match data {
                        Some(bytes) => {
                            w.put_u8(1);
                            w.put_bytes(bytes);
                        }
                        None => w.put_u8(0),
                    }
                }
                w.put_varint(p.fragments.len() as u64);
                for f in &p.fragments {
                    w.put_u32(f.revision.get());
                    w.put_varint(f.page_ref.offset());
                }
            }
        }
        w.into_vec()
    }

    /// Decode a payload of the given kind.
    pub fn decode(kind: PageKind, payload: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(payload);
        let page = match kind {
            PageKind::Uber => Self::Uber(UberPage {
                revision_count: r.get_u32()?,
                revisions: TrieRoot::decode(&mut r)?,
            }),
            PageKind::RevisionRoot => {
                let revision = Revision::new(r.get_u32()?);
                let timestamp_ms = r.get_u64()?;
                let commit_message = match r.get_u8()? {
                    0 => None,
                    1 => Some(r.get_string()?),
                    other => {
                        return Err(ArborError::corrupt(format!("invalid message tag {other}")));
                    }
                };
                let max_node_key = NodeKey::new(r.get_varint()?);
                let node_trie = TrieRoot::decode(&mut r)?;
                let raw_count = r.get_varint()?;
                let count = bounded_count(&r, raw_count)?;
                let mut index_tries = Vec::with_capacity(count);
                for _ in 0..count {
                    let ty_byte = r.get_u8()?;
                    let index_type = IndexType::from_byte(ty_byte).ok_or_else(|| {
                        ArborError::corrupt(format!("unknown index type {ty_byte}"))
                    })?;
                    let index_id = IndexId::new(r.get_varint_u32()?);
                    let trie = TrieRoot::decode(&mut r)?;
                    index_tries.push(IndexTrieRoot {
                        index_type,
                        index_id,
                        trie,
                    });
                }
                let catalog = r.get_bytes()?.to_vec();
                Self::RevisionRoot(RevisionRootPage {
                    revision,
                    timestamp_ms,
                    commit_message,
                    max_node_key,
                    node_trie,
                    index_tries,
                    catalog,
                })
            }
            PageKind::Indirect => {
                let raw_count = r.get_varint()?;
                let count = bounded_count(&r, raw_count)?;
                let mut page = IndirectPage::new();
                for _ in 0..count {
                    let slot = r.get_u8()?;
                    if usize::from(slot) >= INDIRECT_FANOUT {
                        return Err(ArborError::corrupt(format!("indirect slot {slot}")));
                    }
                    page.refs.insert(slot, PageRef::new(r.get_varint()?));
                }
                Self::Indirect(page)
            }
            PageKind::Record => {
                let page_key = r.get_varint()?;
                let revision = Revision::new(r.get_u32()?);
                let dump_seq = r.get_varint_u32()?;
                let raw_count = r.get_varint()?;
                let count = bounded_count(&r, raw_count)?;
                let mut slots = SlotMap::new();
                for _ in 0..count {
                    let slot = r.get_u16()?;
                    let data = match r.get_u8()? {
                        0 => None,
                        1 => Some(r.get_bytes()?.to_vec()),
                        other => {
                            return Err(ArborError::corrupt(format!("invalid slot tag {other}")));
                        }
                    };
                    slots.insert(slot, data);
                }
                let raw_count = r.get_varint()?;
                let count = bounded_count(&r, raw_count)?;
                let mut fragments = Vec::with_capacity(count);
                for _ in 0..count {
                    fragments.push(FragmentRef {
                        revision: Revision::new(r.get_u32()?),
                        page_ref: PageRef::new(r.get_varint()?),
                    });
                }
                Self::Record(RecordPage {
                    page_key,
                    revision,
                    dump_seq,
                    slots,
                    fragments,
                })
            }
        };
        if !r.is_exhausted() {
            return Err(ArborError::corrupt(format!(
                "{} trailing bytes after {kind} page",
                r.remaining()
            )));
        }
        Ok(page)
    }
}

/// Reject element counts that cannot fit in the remaining input.
fn bounded_count(r: &ByteReader<'_>, count: u64) -> Result<usize> {
    if count > r.remaining() as u64 {
        return Err(ArborError::corrupt(format!(
            "element count {count} exceeds payload"
        )));
    }
    usize::try_from(count).map_err(|_| ArborError::corrupt("element count exceeds usize"))
}
