//! Typed index keys and their total order.

use std::cmp::Ordering;
use std::fmt;

use arbor_error::{ArborError, Result};
use arbor_types::encoding::{ByteReader, ByteWriter};
use arbor_types::{AtomicValue, Path, QName};

const TAG_VALUE: u8 = 1;
const TAG_PATH: u8 = 2;
const TAG_NAME: u8 = 3;

/// Key of one index entry.
///
/// Content-and-structure indexes key by typed value, path indexes by the
/// node's concrete structural path, and name indexes by qualified name.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Value(AtomicValue),
    Path(Path),
    Name(QName),
}

impl IndexKey {
    const fn tag(&self) -> u8 {
        match self {
            Self::Value(_) => TAG_VALUE,
            Self::Path(_) => TAG_PATH,
            Self::Name(_) => TAG_NAME,
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.tag());
        match self {
            Self::Value(v) => v.encode(w),
            Self::Path(p) => p.encode(w),
            Self::Name(n) => n.encode(w),
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        match r.get_u8()? {
            TAG_VALUE => Ok(Self::Value(AtomicValue::decode(r)?)),
            TAG_PATH => Ok(Self::Path(Path::decode(r)?)),
            TAG_NAME => Ok(Self::Name(QName::decode(r)?)),
            tag => Err(ArborError::corrupt(format!("unknown index key tag {tag}"))),
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a.cmp(b),
            (Self::Path(a), Self::Path(b)) => a.cmp(b),
            (Self::Name(a), Self::Name(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Path(p) => write!(f, "{p}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

impl From<AtomicValue> for IndexKey {
    fn from(v: AtomicValue) -> Self {
        Self::Value(v)
    }
}

impl From<Path> for IndexKey {
    fn from(p: Path) -> Self {
        Self::Path(p)
    }
}

impl From<QName> for IndexKey {
    fn from(n: QName) -> Self {
        Self::Name(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_order_numerically() {
        let a = IndexKey::from(AtomicValue::Int(9));
        let b = IndexKey::from(AtomicValue::Dbl(10.5));
        let c = IndexKey::from(AtomicValue::Int(100));
        assert!(a < b && b < c);
        assert_eq!(
            IndexKey::from(AtomicValue::Int(2)),
            IndexKey::from(AtomicValue::Dbl(2.0))
        );
    }

    #[test]
    fn strings_order_lexically() {
        let a = IndexKey::from(AtomicValue::from("100"));
        let b = IndexKey::from(AtomicValue::from("9"));
        assert!(a < b);
    }

    #[test]
    fn codec_preserves_key() {
        for key in [
            IndexKey::from(AtomicValue::from(true)),
            IndexKey::from(Path::parse("/a/b/@c").unwrap()),
            IndexKey::from(QName::prefixed("x", "item")),
        ] {
            let mut w = ByteWriter::new();
            key.encode(&mut w);
            let bytes = w.into_vec();
            let mut r = ByteReader::new(&bytes);
            assert_eq!(IndexKey::decode(&mut r).unwrap(), key);
            assert!(r.is_exhausted());
        }
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let mut r = ByteReader::new(&[42]);
        assert!(IndexKey::decode(&mut r).is_err());
    }
}
