pub mod cx;
pub mod encoding;
pub mod flags;
pub mod limits;
pub mod path;
pub mod record;
pub mod value;

pub use cx::Cx;
pub use flags::{SyncFlags, VfsOpenFlags};
pub use path::{Path, PathAxis, PathStep, QName, StepTest};
pub use record::{NodeKind, NodeRecord};
pub use value::{AtomicType, AtomicValue};

use std::fmt;

/// Stable identifier of a node.
///
/// Assigned monotonically by the write transaction that inserts the node and
/// never reused, even after the node is deleted. Key 0 is the document root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct NodeKey(u64);

impl NodeKey {
    /// The document root present in every revision.
    pub const DOCUMENT_ROOT: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The key the next inserted node receives after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n#{}", self.0)
    }
}

/// Revision number of a resource.
///
/// Revision 0 is written when the resource is created and only holds the
/// document root; every commit afterwards creates exactly one new revision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Revision(u32);

impl Revision {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The preceding revision, or `None` for revision 0.
    #[inline]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Kind of secondary index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum IndexType {
    /// Content-and-structure: keyed by typed node value.
    Cas,
    /// Keyed by the node's structural path.
    Path,
    /// Keyed by the node's qualified name.
    Name,
}

impl IndexType {
    pub const ALL: [Self; 3] = [Self::Cas, Self::Path, Self::Name];

    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Cas => 1,
            Self::Path => 2,
            Self::Name => 3,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Cas),
            2 => Some(Self::Path),
            3 => Some(Self::Name),
            _ => None,
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cas => "cas",
            Self::Path => "path",
            Self::Name => "name",
        })
    }
}

/// Identifier of an index, unique within its [`IndexType`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct IndexId(u32);

impl IndexId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_next_is_monotonic() {
        let k = NodeKey::DOCUMENT_ROOT;
        assert_eq!(k.next().get(), 1);
        assert!(k < k.next());
        assert_eq!(k.next().to_string(), "n#1");
    }

    #[test]
    fn revision_prev_saturates_at_zero() {
        assert_eq!(Revision::ZERO.prev(), None);
        assert_eq!(Revision::new(3).prev(), Some(Revision::new(2)));
        assert_eq!(Revision::new(3).next(), Revision::new(4));
    }

    #[test]
    fn index_type_byte_roundtrip() {
        for ty in IndexType::ALL {
            assert_eq!(IndexType::from_byte(ty.to_byte()), Some(ty));
        }
        assert_eq!(IndexType::from_byte(0), None);
        assert_eq!(IndexType::Cas.to_string(), "cas");
    }
}
