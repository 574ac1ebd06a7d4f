//! Compile-time limits of the page and trie layout.

/// log2 of records per record page.
pub const RECORDS_PER_PAGE_SHIFT: u32 = 7;

/// Number of record slots in one record page.
pub const RECORDS_PER_PAGE: u64 = 1 << RECORDS_PER_PAGE_SHIFT;

/// log2 of the indirect page fanout.
pub const INDIRECT_FANOUT_SHIFT: u32 = 7;

/// Number of child references in one indirect page.
pub const INDIRECT_FANOUT: usize = 1 << INDIRECT_FANOUT_SHIFT;

/// Maximum trie height. Seven levels of fanout 128 address 2^49 leaves.
pub const MAX_TRIE_HEIGHT: u8 = 7;

/// Default checkpoint interval / sliding window size.
pub const DEFAULT_REVISIONS_TO_RESTORE: u32 = 3;

/// Default number of decoded pages held by the page cache.
pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 1024;

/// Largest page frame payload accepted when decoding (64 MiB).
pub const MAX_FRAME_PAYLOAD: u32 = 64 << 20;

/// Split a record key into its record-page key and slot.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn split_record_key(record_key: u64) -> (u64, u16) {
    (
        record_key >> RECORDS_PER_PAGE_SHIFT,
        (record_key & (RECORDS_PER_PAGE - 1)) as u16,
    )
}
