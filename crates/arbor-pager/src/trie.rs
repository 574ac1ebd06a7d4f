//! Copy-on-write trie of indirect pages mapping a `u64` key to a leaf page.
//!
//! A trie of height `h` has `h` levels of [`IndirectPage`]s with fanout 128.
//! Level `h - 1` is the root and level 0 holds leaf references. The slot for
//! `key` at level `L` is `(key >> (7 * L)) & 127`.
//!
//! Writers never modify a stored page. [`TrieWriter`] clones every page on
//! the path to a changed leaf into a dirty set and [`TrieWriter::commit`]
//! appends the dirty pages bottom-up, yielding a new root. Pages that were
//! not on a changed path stay shared with earlier revisions.

use std::collections::HashMap;

use arbor_error::{ArborError, Result};
use arbor_types::cx::Cx;
use arbor_types::limits::{INDIRECT_FANOUT, INDIRECT_FANOUT_SHIFT, MAX_TRIE_HEIGHT};
use tracing::debug;

use crate::page::{IndirectPage, Page, PageRef, TrieRoot};
use crate::store::PageStore;

#[allow(clippy::cast_possible_truncation)]
const fn slot_at(key: u64, level: u8) -> usize {
    ((key >> (INDIRECT_FANOUT_SHIFT * level as u32)) & (INDIRECT_FANOUT as u64 - 1)) as usize
}

/// Prefix identifying the node at `level` on the path to `key`.
const fn prefix_at(key: u64, level: u8) -> u64 {
    let shift = INDIRECT_FANOUT_SHIFT * (level as u32 + 1);
    if shift >= 64 { 0 } else { key >> shift }
}

/// Find the leaf page bound to `key`.
pub fn resolve(store: &PageStore, cx: &Cx, root: &TrieRoot, key: u64) -> Result<Option<PageRef>> {
    let Some(mut current) = root.root else {
        return Ok(None);
    };
    if key >= root.capacity() {
        return Ok(None);
    }
    for level in (0..root.height).rev() {
        let page = store.read_page(cx, current)?;
        match page.as_indirect()?.get(slot_at(key, level)) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Accumulates leaf bindings against a base trie and writes them as one
/// copy-on-write update.
#[derive(Debug, Clone)]
pub struct TrieWriter {
    base: TrieRoot,
    height: u8,
    /// Modified indirect pages keyed by `(level, prefix)`.
    dirty: HashMap<(u8, u64), IndirectPage>,
}

impl TrieWriter {
    #[must_use]
    pub fn new(base: TrieRoot) -> Self {
        Self {
            base,
            height: base.height,
            dirty: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn base(&self) -> TrieRoot {
        self.base
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Look up `key`, seeing bindings made through this writer.
    pub fn resolve(&self, store: &PageStore, cx: &Cx, key: u64) -> Result<Option<PageRef>> {
        if key >= TrieRoot::capacity_at(self.height) {
            return Ok(None);
        }
        let mut current = self.base.root;
        let base_height = self.base.height;
        for level in (0..self.height).rev() {
            let prefix = prefix_at(key, level);
            let slot = slot_at(key, level);
            if let Some(page) = self.dirty.get(&(level, prefix)) {
                current = page.get(slot);
                continue;
            }
            // Levels above the base root only exist in the dirty set.
            if level >= base_height {
                return Ok(None);
            }
            let Some(page_ref) = current else {
                return Ok(None);
            };
            let page = store.read_page(cx, page_ref)?;
            current = page.as_indirect()?.get(slot);
        }
        Ok(current)
    }

    fn grow_to_fit(&mut self, key: u64) -> Result<()> {
        while key >= TrieRoot::capacity_at(self.height) {
            if self.height >= MAX_TRIE_HEIGHT {
                return Err(ArborError::internal(format!(
                    "trie key {key} exceeds maximum height {MAX_TRIE_HEIGHT}"
                )));
            }
            // The old root becomes child 0 of the new root. A dirty old root is
            // linked at commit time through its (level, prefix) entry.
            let mut new_root = IndirectPage::new();
            if !self.dirty.contains_key(&(self.height - 1, 0)) {
                if let Some(old_root) = self.base.root {
                    new_root.set(0, old_root);
                }
            }
            self.dirty.insert((self.height, 0), new_root);
            self.height += 1;
            debug!(height = self.height, "trie grew");
        }
        Ok(())
    }

    /// Load the node at `(level, prefix)` into the dirty set, cloning it from
    /// the store if it already exists.
    fn touch(
        &mut self,
        store: &PageStore,
        cx: &Cx,
        level: u8,
        prefix: u64,
        existing: Option<PageRef>,
    ) -> Result<()> {
        if self.dirty.contains_key(&(level, prefix)) {
            return Ok(());
        }
        let page = match existing {
            Some(page_ref) => store.read_page(cx, page_ref)?.as_indirect()?.clone(),
            None => IndirectPage::new(),
        };
        self.dirty.insert((level, prefix), page);
        Ok(())
    }

    /// Bind `key` to `leaf`, replacing any earlier binding.
    pub fn bind(&mut self, store: &PageStore, cx: &Cx, key: u64, leaf: PageRef) -> Result<()> {
        self.grow_to_fit(key)?;
        let top = self.height - 1;
        let mut existing = if top < self.base.height {
            self.base.root
        } else {
            None
        };
        for level in (0..self.height).rev() {
            let prefix = prefix_at(key, level);
            self.touch(store, cx, level, prefix, existing)?;
            let page = self
                .dirty
                .get_mut(&(level, prefix))
                .ok_or_else(|| ArborError::internal("trie node vanished from dirty set"))?;
            if level == 0 {
                page.set(slot_at(key, 0), leaf);
            } else {
                existing = page.get(slot_at(key, level));
            }
        }
        Ok(())
    }

    /// Append dirty pages bottom-up and return the new root.
    pub fn commit(self, store: &PageStore, cx: &Cx) -> Result<TrieRoot> {
        if self.dirty.is_empty() {
            return Ok(self.base);
        }
        let mut pending = self.dirty;
        let mut root = None;
        for level in 0..self.height {
            let mut prefixes: Vec<u64> = pending
                .keys()
                .filter(|(l, _)| *l == level)
                .map(|&(_, prefix)| prefix)
                .collect();
            prefixes.sort_unstable();
            for prefix in prefixes {
                let Some(page) = pending.remove(&(level, prefix)) else {
                    continue;
                };
                let page_ref = store.write_page(cx, &Page::Indirect(page))?;
                if level + 1 == self.height {
                    root = Some(page_ref);
                    continue;
                }
                let parent_key = (level + 1, prefix >> INDIRECT_FANOUT_SHIFT);
                let parent = pending.entry(parent_key).or_default();
                parent.set(slot_at(prefix, 0), page_ref);
            }
        }
        Ok(TrieRoot {
            root: root.or(self.base.root),
            height: self.height,
        })
    }
}
