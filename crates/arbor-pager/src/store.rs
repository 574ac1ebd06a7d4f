//! Append-only page store over a single page file.
//!
//! Layout: a 128-byte header ([`crate::header`]) followed by page frames
//!
//! ```text
//! len u32 | kind u8 | xxh3(kind || payload) u64 | payload[len]
//! ```
//!
//! A [`PageRef`] is the byte offset of a frame. Frames are never rewritten;
//! the only in-place writes are the two header slots.

use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_types::cx::Cx;
use arbor_types::flags::SyncFlags;
use arbor_types::limits::MAX_FRAME_PAYLOAD;
use arbor_vfs::VfsFile;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::cache::{CacheStats, ClockCache};
use crate::header::{HEADER_SIZE, HeaderSlot, SLOT_SIZE};
use crate::page::{Page, PageKind, PageRef, UberPage};

const FRAME_HEADER_SIZE: usize = 13;

fn frame_checksum(kind: u8, payload: &[u8]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&[kind]);
    hasher.update(payload);
    hasher.digest()
}

struct StoreFile {
    file: Box<dyn VfsFile>,
    /// Offset at which the next frame is appended.
    end: u64,
}

/// Durable storage of immutable pages for one resource.
///
/// Readers share the file lock and read frames positionally, so they never
/// wait on each other. Appends, syncs and header switches take it
/// exclusively; the resource manager guarantees a single appender.
pub struct PageStore {
    name: String,
    file: RwLock<StoreFile>,
    cache: Mutex<ClockCache<PageRef, Arc<Page>>>,
    published: RwLock<Option<HeaderSlot>>,
    sync_on_commit: bool,
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("name", &self.name)
            .field("published", &*self.published.read())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

impl PageStore {
    /// Initialize an empty page file. Nothing is visible until the first
    /// [`publish`](Self::publish).
    pub fn create(
        cx: &Cx,
        name: impl Into<String>,
        mut file: Box<dyn VfsFile>,
        cache_capacity: usize,
        sync_on_commit: bool,
    ) -> Result<Self> {
        let name = name.into();
        file.truncate(cx, 0)?;
        file.write(cx, &[0u8; 2 * SLOT_SIZE], 0)?;
        file.sync(cx, SyncFlags::FULL)?;
        info!(resource = %name, "page file created");
        Ok(Self {
            name,
            file: RwLock::new(StoreFile {
                file,
                end: HEADER_SIZE,
            }),
            cache: Mutex::new(ClockCache::new(cache_capacity)),
            published: RwLock::new(None),
            sync_on_commit,
        })
    }

    /// Open an existing page file and locate the newest published über-page.
    pub fn open(
        cx: &Cx,
        name: impl Into<String>,
        mut file: Box<dyn VfsFile>,
        cache_capacity: usize,
        sync_on_commit: bool,
    ) -> Result<Self> {
        let name = name.into();
        let size = file.file_size(cx)?;
        if size < HEADER_SIZE {
            return Err(ArborError::corrupt(format!(
                "page file of '{name}' is {size} bytes, smaller than its header"
            )));
        }
        let mut header = [0u8; 2 * SLOT_SIZE];
        let n = file.read(cx, &mut header, 0)?;
        if n != header.len() {
            return Err(ArborError::ShortRead {
                expected: header.len(),
                actual: n,
            });
        }
        for (i, raw) in header.chunks(SLOT_SIZE).enumerate() {
            if raw.iter().any(|&b| b != 0) && HeaderSlot::decode(raw)?.is_none() {
                warn!(resource = %name, slot = i, "ignoring torn header slot");
            }
        }
        let Some(slot) = HeaderSlot::select(&header)? else {
            return Err(ArborError::corrupt(format!(
                "page file of '{name}' has no valid header slot"
            )));
        };
        info!(
            resource = %name,
            generation = slot.generation,
            uber = %slot.uber_ref,
            size,
            "page file opened"
        );
        Ok(Self {
            name,
            file: RwLock::new(StoreFile { file, end: size }),
            cache: Mutex::new(ClockCache::new(cache_capacity)),
            published: RwLock::new(Some(slot)),
            sync_on_commit,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset at which the next page will be appended.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.file.read().end
    }

    /// Reference of the currently published über-page.
    #[must_use]
    pub fn uber_ref(&self) -> Option<PageRef> {
        self.published.read().map(|s| s.uber_ref)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.published.read().map_or(0, |s| s.generation)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Read and decode the page at `page_ref`.
    pub fn read_page(&self, cx: &Cx, page_ref: PageRef) -> Result<Arc<Page>> {
        cx.checkpoint()?;
        if let Some(page) = self.cache.lock().get(&page_ref) {
            return Ok(page);
        }
        let offset = page_ref.offset();
        if offset < HEADER_SIZE {
            return Err(ArborError::corrupt(format!(
                "page reference {page_ref} points into the file header"
            )));
        }
        let (kind_byte, payload) = {
            let guard = self.file.read();
            if offset >= guard.end {
                return Err(ArborError::corrupt(format!(
                    "page reference {page_ref} beyond end of file ({})",
                    guard.end
                )));
            }
            let mut head = [0u8; FRAME_HEADER_SIZE];
            read_exact(guard.file.as_ref(), cx, &mut head, offset)?;
            let len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
            if len > MAX_FRAME_PAYLOAD {
                return Err(ArborError::corrupt(format!(
                    "frame at {page_ref} claims {len} payload bytes"
                )));
            }
            let mut payload = vec![0u8; len as usize];
            read_exact(
                guard.file.as_ref(),
                cx,
                &mut payload,
                offset + FRAME_HEADER_SIZE as u64,
            )?;
            drop(guard);
            let mut sum = [0u8; 8];
            sum.copy_from_slice(&head[5..13]);
            if u64::from_le_bytes(sum) != frame_checksum(head[4], &payload) {
                return Err(ArborError::corrupt(format!(
                    "checksum mismatch in frame at {page_ref}"
                )));
            }
            (head[4], payload)
        };
        let kind = PageKind::from_byte(kind_byte).ok_or_else(|| {
            ArborError::corrupt(format!("unknown page kind {kind_byte} at {page_ref}"))
        })?;
        let page = Arc::new(Page::decode(kind, &payload)?);
        debug!(page = %page_ref, %kind, bytes = payload.len(), "page read");
        self.cache.lock().insert(page_ref, Arc::clone(&page));
        Ok(page)
    }

    /// Append a page and return its reference. Never overwrites.
    pub fn write_page(&self, cx: &Cx, page: &Page) -> Result<PageRef> {
        cx.checkpoint()?;
        let payload = page.encode_payload();
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|&l| l <= MAX_FRAME_PAYLOAD)
            .ok_or_else(|| ArborError::internal("page payload exceeds frame limit"))?;
        let kind = page.kind().to_byte();
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.push(kind);
        frame.extend_from_slice(&frame_checksum(kind, &payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        let page_ref = {
            let mut guard = self.file.write();
            let offset = guard.end;
            if let Err(e) = guard.file.write(cx, &frame, offset) {
                error!(resource = %self.name, offset, error = %e, "page write failed");
                return Err(e);
            }
            guard.end = offset + frame.len() as u64;
            PageRef::new(offset)
        };
        debug!(page = %page_ref, kind = %page.kind(), bytes = frame.len(), "page written");
        self.cache.lock().insert(page_ref, Arc::new(page.clone()));
        Ok(page_ref)
    }

    /// Flush appended pages to stable storage.
    pub fn sync(&self, cx: &Cx) -> Result<()> {
        self.file.write().file.sync(cx, SyncFlags::DATAONLY)
    }

    /// Atomically make `uber_ref` the resource's root.
    ///
    /// All pages written so far are synced before the header slot for the
    /// next generation is written and synced. Runs masked: a cancel request
    /// cannot interrupt between the two syncs.
    pub fn publish(&self, cx: &Cx, uber_ref: PageRef) -> Result<()> {
        let _mask = cx.masked();
        let slot = HeaderSlot {
            generation: self.generation() + 1,
            uber_ref,
        };
        {
            let mut guard = self.file.write();
            if self.sync_on_commit {
                guard.file.sync(cx, SyncFlags::DATAONLY)?;
            }
            guard.file.write(cx, &slot.encode(), slot.file_offset())?;
            if self.sync_on_commit {
                guard.file.sync(cx, SyncFlags::FULL)?;
            }
        }
        *self.published.write() = Some(slot);
        debug!(
            resource = %self.name,
            generation = slot.generation,
            uber = %uber_ref,
            "header published"
        );
        Ok(())
    }

    /// Decode the currently published über-page.
    pub fn read_uber_page(&self, cx: &Cx) -> Result<UberPage> {
        let Some(uber_ref) = self.uber_ref() else {
            return Err(ArborError::corrupt(format!(
                "resource '{}' has no published revision",
                self.name
            )));
        };
        Ok(*self.read_page(cx, uber_ref)?.as_uber()?)
    }

    /// Flush unsynced writes and release the file.
    pub fn close(&self, cx: &Cx) -> Result<()> {
        self.cache.lock().clear();
        let mut guard = self.file.write();
        guard.file.sync(cx, SyncFlags::FULL)?;
        guard.file.close(cx)
    }
}

fn read_exact(file: &dyn VfsFile, cx: &Cx, buf: &mut [u8], offset: u64) -> Result<()> {
    let n = file.read(cx, buf, offset)?;
    if n < buf.len() {
        return Err(ArborError::ShortRead {
            expected: buf.len(),
            actual: n,
        });
    }
    Ok(())
}
