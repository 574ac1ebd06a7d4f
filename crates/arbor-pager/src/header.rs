//! Page file header: two alternating slots that point at the über-page.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "ARBR"
//!      4     2  format version
//!      6     2  reserved (zero)
//!      8     8  generation
//!     16     8  über-page offset
//!     24    32  reserved (zero)
//!     56     8  xxh3 of bytes 0..56
//! ```
//!
//! Publishing generation `g` writes slot `g % 2`, so the slot holding the
//! previous generation is never touched while the new one is written.

use arbor_error::{ArborError, Result};
use xxhash_rust::xxh3::xxh3_64;

use crate::page::PageRef;

pub const MAGIC: [u8; 4] = *b"ARBR";
pub const FORMAT_VERSION: u16 = 1;
pub const SLOT_SIZE: usize = 64;
/// Bytes reserved for the header at the start of the page file.
pub const HEADER_SIZE: u64 = 2 * SLOT_SIZE as u64;

const CHECKSUM_OFFSET: usize = 56;

/// One decoded header slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSlot {
    pub generation: u64,
    pub uber_ref: PageRef,
}

impl HeaderSlot {
    /// Byte offset of the slot used for this generation.
    #[must_use]
    pub const fn file_offset(&self) -> u64 {
        (self.generation % 2) * SLOT_SIZE as u64
    }

    #[must_use]
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.generation.to_le_bytes());
        buf[16..24].copy_from_slice(&self.uber_ref.offset().to_le_bytes());
        let checksum = xxh3_64(&buf[..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decode a slot. `Ok(None)` means the slot is blank or torn.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() != SLOT_SIZE {
            return Err(ArborError::internal(format!(
                "header slot must be {SLOT_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        if buf.iter().all(|&b| b == 0) || buf[0..4] != MAGIC {
            return Ok(None);
        }
        let stored = u64::from_le_bytes(le8(&buf[CHECKSUM_OFFSET..]));
        if stored != xxh3_64(&buf[..CHECKSUM_OFFSET]) {
            return Ok(None);
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != FORMAT_VERSION {
            return Err(ArborError::corrupt(format!(
                "unsupported page file format version {version}"
            )));
        }
        Ok(Some(Self {
            generation: u64::from_le_bytes(le8(&buf[8..16])),
            uber_ref: PageRef::new(u64::from_le_bytes(le8(&buf[16..24]))),
        }))
    }

    /// Pick the newest valid slot out of both header slots.
    pub fn select(header: &[u8]) -> Result<Option<Self>> {
        let a = Self::decode(&header[..SLOT_SIZE])?;
        let b = Self::decode(&header[SLOT_SIZE..2 * SLOT_SIZE])?;
        Ok(match (a, b) {
            (Some(a), Some(b)) => Some(if a.generation >= b.generation { a } else { b }),
            (a, b) => a.or(b),
        })
    }
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(generation: u64, offset: u64) -> HeaderSlot {
        HeaderSlot {
            generation,
            uber_ref: PageRef::new(offset),
        }
    }

    fn header_with(slots: &[HeaderSlot]) -> Vec<u8> {
        let mut header = vec![0u8; 2 * SLOT_SIZE];
        for s in slots {
            let at = usize::try_from(s.file_offset()).unwrap();
            header[at..at + SLOT_SIZE].copy_from_slice(&s.encode());
        }
        header
    }

    #[test]
    fn encode_decode_slot() {
        let s = slot(7, 4242);
        assert_eq!(HeaderSlot::decode(&s.encode()).unwrap(), Some(s));
        assert_eq!(s.file_offset(), SLOT_SIZE as u64);
    }

    #[test]
    fn blank_header_has_no_slot() {
        assert_eq!(HeaderSlot::select(&[0u8; 2 * SLOT_SIZE]).unwrap(), None);
    }

    #[test]
    fn newest_generation_wins() {
        let header = header_with(&[slot(4, 100), slot(5, 200)]);
        assert_eq!(HeaderSlot::select(&header).unwrap(), Some(slot(5, 200)));
    }

    #[test]
    fn torn_newest_slot_falls_back_to_previous() {
        let mut header = header_with(&[slot(4, 100), slot(5, 200)]);
        // Corrupt the generation-5 slot (slot 1).
        header[SLOT_SIZE + 17] ^= 0xFF;
        assert_eq!(HeaderSlot::select(&header).unwrap(), Some(slot(4, 100)));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let mut buf = slot(1, 1).encode();
        buf[4] = 9;
        let checksum = xxh3_64(&buf[..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        assert!(HeaderSlot::decode(&buf).is_err());
    }
}
