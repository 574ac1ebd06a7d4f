//! Node records: the unit stored in record pages of the node trie.
//!
//! Structural links are node keys, never references, so copying a record page
//! never rewrites identities.

use arbor_error::{ArborError, Result};

use crate::encoding::{ByteReader, ByteWriter};
use crate::path::QName;
use crate::value::AtomicValue;
use crate::NodeKey;

/// Kind of a node in the logical tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum NodeKind {
    Document,
    // XML
    Element,
    Attribute,
    Text,
    Comment,
    // JSON
    Object,
    Array,
    ObjectKey,
    StringValue,
    NumberValue,
    BooleanValue,
    NullValue,
}

impl NodeKind {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Document => 1,
            Self::Element => 2,
            Self::Attribute => 3,
            Self::Text => 4,
            Self::Comment => 5,
            Self::Object => 10,
            Self::Array => 11,
            Self::ObjectKey => 12,
            Self::StringValue => 13,
            Self::NumberValue => 14,
            Self::BooleanValue => 15,
            Self::NullValue => 16,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Document,
            2 => Self::Element,
            3 => Self::Attribute,
            4 => Self::Text,
            5 => Self::Comment,
            10 => Self::Object,
            11 => Self::Array,
            12 => Self::ObjectKey,
            13 => Self::StringValue,
            14 => Self::NumberValue,
            15 => Self::BooleanValue,
            16 => Self::NullValue,
            _ => return None,
        })
    }

    /// Kinds that may have children.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            Self::Document | Self::Element | Self::Object | Self::Array | Self::ObjectKey
        )
    }

    #[must_use]
    pub const fn has_name(self) -> bool {
        matches!(self, Self::Element | Self::Attribute | Self::ObjectKey)
    }

    #[must_use]
    pub const fn has_value(self) -> bool {
        matches!(
            self,
            Self::Attribute
                | Self::Text
                | Self::Comment
                | Self::StringValue
                | Self::NumberValue
                | Self::BooleanValue
        )
    }

    /// Whether a node of this kind may be placed under a parent of kind `parent`.
    #[must_use]
    pub const fn allowed_under(self, parent: Self) -> bool {
        match self {
            Self::Document | Self::Attribute => false,
            Self::Element | Self::Text | Self::Comment => {
                matches!(parent, Self::Document | Self::Element)
            }
            Self::ObjectKey => matches!(parent, Self::Object),
            Self::Object
            | Self::Array
            | Self::StringValue
            | Self::NumberValue
            | Self::BooleanValue
            | Self::NullValue => matches!(parent, Self::Document | Self::Array | Self::ObjectKey),
        }
    }
}

/// One node of the tree as stored in a record page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub parent: Option<NodeKey>,
    pub first_child: Option<NodeKey>,
    pub last_child: Option<NodeKey>,
    pub left_sibling: Option<NodeKey>,
    pub right_sibling: Option<NodeKey>,
    pub child_count: u64,
    pub descendant_count: u64,
    pub name: Option<QName>,
    pub value: Option<AtomicValue>,
    /// Attribute keys of an element, in insertion order.
    pub attributes: Vec<NodeKey>,
}

const FORMAT_V1: u8 = 1;

impl NodeRecord {
    #[must_use]
    pub const fn new(key: NodeKey, kind: NodeKind) -> Self {
        Self {
            key,
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            left_sibling: None,
            right_sibling: None,
            child_count: 0,
            descendant_count: 0,
            name: None,
            value: None,
            attributes: Vec::new(),
        }
    }

    /// The document root present in every revision.
    #[must_use]
    pub const fn document_root() -> Self {
        Self::new(NodeKey::DOCUMENT_ROOT, NodeKind::Document)
    }

    #[must_use]
    pub fn with_name(mut self, name: QName) -> Self {
        self.name = Some(name);
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: AtomicValue) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(64);
        w.put_u8(FORMAT_V1);
        w.put_varint(self.key.get());
        w.put_u8(self.kind.to_byte());
        for link in [
            self.parent,
            self.first_child,
            self.last_child,
            self.left_sibling,
            self.right_sibling,
        ] {
            w.put_opt_varint(link.map(NodeKey::get));
        }
        w.put_varint(self.child_count);
        w.put_varint(self.descendant_count);
        match &self.name {
            Some(name) => {
                w.put_u8(1);
                name.encode(&mut w);
            }
            None => w.put_u8(0),
        }
        match &self.value {
            Some(value) => {
                w.put_u8(1);
                value.encode(&mut w);
            }
            None => w.put_u8(0),
        }
        w.put_varint(self.attributes.len() as u64);
        for attr in &self.attributes {
            w.put_varint(attr.get());
        }
        w.into_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let version = r.get_u8()?;
        if version != FORMAT_V1 {
            return Err(ArborError::corrupt(format!(
                "unsupported node record format {version}"
            )));
        }
        let key = NodeKey::new(r.get_varint()?);
        let kind_byte = r.get_u8()?;
        let kind = NodeKind::from_byte(kind_byte)
            .ok_or_else(|| ArborError::corrupt(format!("unknown node kind {kind_byte}")))?;
        let mut link = || -> Result<Option<NodeKey>> { Ok(r.get_opt_varint()?.map(NodeKey::new)) };
        let parent = link()?;
        let first_child = link()?;
        let last_child = link()?;
        let left_sibling = link()?;
        let right_sibling = link()?;
        let child_count = r.get_varint()?;
        let descendant_count = r.get_varint()?;
        let name = match r.get_u8()? {
            0 => None,
            1 => Some(QName::decode(&mut r)?),
            other => return Err(ArborError::corrupt(format!("invalid name tag {other}"))),
        };
        let value = match r.get_u8()? {
            0 => None,
            1 => Some(AtomicValue::decode(&mut r)?),
            other => return Err(ArborError::corrupt(format!("invalid value tag {other}"))),
        };
        let attr_count = r.get_varint()?;
        if attr_count > r.remaining() as u64 {
            return Err(ArborError::corrupt("attribute count exceeds record size"));
        }
        let mut attributes = Vec::new();
        for _ in 0..attr_count {
            attributes.push(NodeKey::new(r.get_varint()?));
        }
        if !r.is_exhausted() {
            return Err(ArborError::corrupt("trailing bytes after node record"));
        }
        Ok(Self {
            key,
            kind,
            parent,
            first_child,
            last_child,
            left_sibling,
            right_sibling,
            child_count,
            descendant_count,
            name,
            value,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_with_links_survives_codec() {
        let mut rec = NodeRecord::new(NodeKey::new(5), NodeKind::Element)
            .with_name(QName::prefixed("x", "item"));
        rec.parent = Some(NodeKey::DOCUMENT_ROOT);
        rec.first_child = Some(NodeKey::new(6));
        rec.last_child = Some(NodeKey::new(9));
        rec.right_sibling = Some(NodeKey::new(12));
        rec.child_count = 2;
        rec.descendant_count = 4;
        rec.attributes = vec![NodeKey::new(7), NodeKey::new(8)];

        let back = NodeRecord::decode(&rec.encode()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn value_node_survives_codec() {
        let rec = NodeRecord::new(NodeKey::new(3), NodeKind::NumberValue)
            .with_value(AtomicValue::Dbl(4.25));
        assert_eq!(NodeRecord::decode(&rec.encode()).unwrap(), rec);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let bytes = NodeRecord::document_root().encode();
        let err = NodeRecord::decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ArborError::StorageCorrupt { .. }));
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let mut bytes = NodeRecord::document_root().encode();
        bytes.push(0);
        assert!(NodeRecord::decode(&bytes).is_err());
    }

    #[test]
    fn placement_rules() {
        assert!(NodeKind::Element.allowed_under(NodeKind::Document));
        assert!(NodeKind::Text.allowed_under(NodeKind::Element));
        assert!(!NodeKind::Element.allowed_under(NodeKind::Text));
        assert!(NodeKind::ObjectKey.allowed_under(NodeKind::Object));
        assert!(!NodeKind::ObjectKey.allowed_under(NodeKind::Array));
        assert!(NodeKind::NumberValue.allowed_under(NodeKind::ObjectKey));
        assert!(!NodeKind::Attribute.allowed_under(NodeKind::Element));
        assert!(!NodeKind::Document.allowed_under(NodeKind::Document));
    }

    #[test]
    fn kind_bytes_are_stable() {
        for byte in 0..=u8::MAX {
            if let Some(kind) = NodeKind::from_byte(byte) {
                assert_eq!(kind.to_byte(), byte);
            }
        }
    }
}
