//! Record-page versioning strategies.
//!
//! Record pages are stored as fragments: each write of a page appends one
//! [`RecordPage`] holding some of its slots plus references to the older
//! fragments needed to reconstruct the rest. A reader combines the fragments
//! newest first; the first occurrence of a slot wins and a `None` occurrence
//! means the record was removed.
//!
//! With window `N` (`revisions_to_restore`):
//!
//! | strategy          | fragment content                                  | reads |
//! |-------------------|---------------------------------------------------|-------|
//! | `Full`            | every live slot                                   | 1     |
//! | `Incremental`     | slots changed in this revision                    | ≤ N   |
//! | `Differential`    | slots changed since the last full dump            | ≤ 2   |
//! | `SlidingSnapshot` | changed slots + slots leaving the `N` window      | ≤ N   |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_types::Revision;
use arbor_types::cx::Cx;

use crate::page::{FragmentRef, Page, PageRef, RecordPage, SlotMap};
use crate::store::PageStore;

/// How record pages are versioned. Fixed when a resource is created.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VersioningStrategy {
    Full,
    Incremental,
    Differential,
    #[default]
    SlidingSnapshot,
}

impl VersioningStrategy {
    /// Upper bound on fragment reads needed to reconstruct one page.
    #[must_use]
    pub fn max_fragment_reads(self, window: u32) -> u32 {
        let window = window.max(1);
        match self {
            Self::Full => 1,
            Self::Incremental | Self::SlidingSnapshot => window,
            Self::Differential => window.min(2),
        }
    }
}

impl std::fmt::Display for VersioningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Differential => "differential",
            Self::SlidingSnapshot => "sliding_snapshot",
        })
    }
}

/// Combine fragments (newest first) into the live slots of the page.
#[must_use]
pub fn combine_fragments<'a>(
    fragments: impl IntoIterator<Item = &'a RecordPage>,
) -> BTreeMap<u16, Vec<u8>> {
    let mut seen = BTreeSet::new();
    let mut out = BTreeMap::new();
    for fragment in fragments {
        for (&slot, data) in &fragment.slots {
            if seen.insert(slot) {
                if let Some(bytes) = data {
                    out.insert(slot, bytes.clone());
                }
            }
        }
    }
    out
}

fn read_fragment(
    store: &PageStore,
    cx: &Cx,
    page_ref: PageRef,
    page_key: u64,
) -> Result<Arc<Page>> {
    let page = store.read_page(cx, page_ref)?;
    let record = page.as_record()?;
    if record.page_key != page_key {
        return Err(ArborError::corrupt(format!(
            "fragment {page_ref} belongs to record page {}, expected {page_key}",
            record.page_key
        )));
    }
    Ok(page)
}

/// Read one slot of a record page without reconstructing the whole page.
///
/// Walks the fragment chain newest first and stops at the first fragment
/// that mentions the slot.
pub fn read_slot(
    store: &PageStore,
    cx: &Cx,
    latest: PageRef,
    page_key: u64,
    slot: u16,
) -> Result<Option<Vec<u8>>> {
    let head = read_fragment(store, cx, latest, page_key)?;
    let head = head.as_record()?;
    if let Some(data) = head.slots.get(&slot) {
        return Ok(data.clone());
    }
    for fragment in &head.fragments {
        let page = read_fragment(store, cx, fragment.page_ref, page_key)?;
        if let Some(data) = page.as_record()?.slots.get(&slot) {
            return Ok(data.clone());
        }
    }
    Ok(None)
}

/// Reconstruct every live slot of a record page.
pub fn reconstruct(
    store: &PageStore,
    cx: &Cx,
    latest: PageRef,
    page_key: u64,
) -> Result<BTreeMap<u16, Vec<u8>>> {
    Ok(load_container(store, cx, page_key, Some(latest))?.complete)
}

/// A record page loaded into a write transaction.
#[derive(Debug, Clone)]
pub struct PageContainer {
    page_key: u64,
    complete: BTreeMap<u16, Vec<u8>>,
    modified: SlotMap,
    /// Fragments the page was reconstructed from, newest first.
    chain: Vec<(PageRef, Arc<Page>)>,
}

/// Load a record page for modification. `latest == None` yields an empty page.
pub fn load_container(
    store: &PageStore,
    cx: &Cx,
    page_key: u64,
    latest: Option<PageRef>,
) -> Result<PageContainer> {
    let Some(latest) = latest else {
        return Ok(PageContainer::empty(page_key));
    };
    let head = read_fragment(store, cx, latest, page_key)?;
    let mut chain = vec![(latest, Arc::clone(&head))];
    for fragment in &head.as_record()?.fragments {
        let page = read_fragment(store, cx, fragment.page_ref, page_key)?;
        chain.push((fragment.page_ref, page));
    }
    let records = chain
        .iter()
        .map(|(_, p)| p.as_record())
        .collect::<Result<Vec<_>>>()?;
    let complete = combine_fragments(records);
    Ok(PageContainer {
        page_key,
        complete,
        modified: SlotMap::new(),
        chain,
    })
}

impl PageContainer {
    #[must_use]
    pub fn empty(page_key: u64) -> Self {
        Self {
            page_key,
            complete: BTreeMap::new(),
            modified: SlotMap::new(),
            chain: Vec::new(),
        }
    }

    #[must_use]
    pub const fn page_key(&self) -> u64 {
        self.page_key
    }

    #[must_use]
    pub fn get(&self, slot: u16) -> Option<&[u8]> {
        self.complete.get(&slot).map(Vec::as_slice)
    }

    pub fn set(&mut self, slot: u16, data: Vec<u8>) {
        self.complete.insert(slot, data.clone());
        self.modified.insert(slot, Some(data));
    }

    pub fn remove(&mut self, slot: u16) {
        if self.complete.remove(&slot).is_some() || self.modified.contains_key(&slot) {
            self.modified.insert(slot, None);
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.modified.is_empty()
    }

    /// Live slots including staged changes.
    #[must_use]
    pub const fn complete(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.complete
    }

    /// Number of fragments the page was reconstructed from.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    fn full_dump(&self, revision: Revision) -> RecordPage {
        let slots = self
            .complete
            .iter()
            .map(|(&s, d)| (s, Some(d.clone())))
            .collect();
        RecordPage::full(self.page_key, revision, slots)
    }

    /// Build the fragment to append for this page at `revision`.
    pub fn build_fragment(
        &self,
        strategy: VersioningStrategy,
        window: u32,
        revision: Revision,
    ) -> Result<RecordPage> {
        let window = window.max(1);
        let Some((prev_ref, prev_page)) = self.chain.first() else {
            return Ok(self.full_dump(revision));
        };
        let prev = prev_page.as_record()?;
        let next_seq = prev.dump_seq + 1;
        let fragment = match strategy {
            VersioningStrategy::Full => self.full_dump(revision),
            VersioningStrategy::Incremental => {
                if next_seq >= window {
                    self.full_dump(revision)
                } else {
                    let mut fragments = vec![FragmentRef {
                        revision: prev.revision,
                        page_ref: *prev_ref,
                    }];
                    fragments.extend_from_slice(&prev.fragments);
                    RecordPage {
                        page_key: self.page_key,
                        revision,
                        dump_seq: next_seq,
                        slots: self.modified.clone(),
                        fragments,
                    }
                }
            }
            VersioningStrategy::Differential => {
                if next_seq >= window {
                    self.full_dump(revision)
                } else {
                    let (mut slots, dump) = if prev.is_full_dump() {
                        (
                            SlotMap::new(),
                            FragmentRef {
                                revision: prev.revision,
                                page_ref: *prev_ref,
                            },
                        )
                    } else {
                        let dump = prev.fragments.first().copied().ok_or_else(|| {
                            ArborError::corrupt(format!(
                                "differential fragment of page {} lacks its full dump",
                                self.page_key
                            ))
                        })?;
                        (prev.slots.clone(), dump)
                    };
                    slots.extend(self.modified.iter().map(|(&s, d)| (s, d.clone())));
                    RecordPage {
                        page_key: self.page_key,
                        revision,
                        dump_seq: next_seq,
                        slots,
                        fragments: vec![dump],
                    }
                }
            }
            VersioningStrategy::SlidingSnapshot => self.sliding_fragment(revision, window)?,
        };
        Ok(fragment)
    }

    fn sliding_fragment(&self, revision: Revision, window: u32) -> Result<RecordPage> {
        let keep = (window as usize).saturating_sub(1).min(self.chain.len());
        let (kept, _dropped) = self.chain.split_at(keep);
        let mut covered: BTreeSet<u16> = self.modified.keys().copied().collect();
        let mut fragments = Vec::with_capacity(keep);
        for (page_ref, page) in kept {
            let record = page.as_record()?;
            covered.extend(record.slots.keys().copied());
            fragments.push(FragmentRef {
                revision: record.revision,
                page_ref: *page_ref,
            });
        }
        let mut slots = self.modified.clone();
        for (&slot, data) in &self.complete {
            if !covered.contains(&slot) {
                slots.insert(slot, Some(data.clone()));
            }
        }
        if fragments.is_empty() {
            slots.retain(|_, data| data.is_some());
        }
        #[allow(clippy::cast_possible_truncation)]
        let dump_seq = fragments.len() as u32;
        Ok(RecordPage {
            page_key: self.page_key,
            revision,
            dump_seq,
            slots,
            fragments,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use arbor_types::flags::VfsOpenFlags;
    use arbor_vfs::{MemoryVfs, Vfs};
    use proptest::prelude::*;

    use super::*;

    fn store() -> (Cx, PageStore) {
        let cx = Cx::new();
        let vfs = MemoryVfs::new();
        let (file, _) = vfs
            .open(&cx, Path::new("/p"), VfsOpenFlags::page_file_rw())
            .unwrap();
        let store = PageStore::create(&cx, "t", Box::new(file), 0, false).unwrap();
        (cx, store)
    }

    /// Apply `edits` over successive revisions, returning the latest ref.
    fn apply(
        store: &PageStore,
        cx: &Cx,
        strategy: VersioningStrategy,
        window: u32,
        revisions: &[Vec<(u16, Option<u8>)>],
    ) -> (PageRef, BTreeMap<u16, Vec<u8>>) {
        let mut latest = None;
        let mut model = BTreeMap::new();
        for (i, edits) in revisions.iter().enumerate() {
            let mut container = load_container(store, cx, 0, latest).unwrap();
            for &(slot, value) in edits {
                match value {
                    Some(v) => {
                        container.set(slot, vec![v]);
                        model.insert(slot, vec![v]);
                    }
                    None => {
                        container.remove(slot);
                        model.remove(&slot);
                    }
                }
            }
            let rev = Revision::new(u32::try_from(i + 1).unwrap());
            let fragment = container.build_fragment(strategy, window, rev).unwrap();
            assert!(
                fragment.fragments.len() < strategy.max_fragment_reads(window) as usize,
                "{strategy} with window {window} chained {} fragments",
                fragment.fragments.len()
            );
            latest = Some(store.write_page(cx, &Page::Record(fragment)).unwrap());
        }
        (latest.unwrap(), model)
    }

    #[test]
    fn first_write_is_full_dump() {
        let mut c = PageContainer::empty(4);
        c.set(1, b"a".to_vec());
        let f = c
            .build_fragment(VersioningStrategy::Incremental, 3, Revision::new(1))
            .unwrap();
        assert!(f.is_full_dump());
        assert!(f.fragments.is_empty());
    }

    #[test]
    fn incremental_dumps_when_chain_would_exceed_window() {
        let (cx, store) = store();
        let revs = vec![vec![(0, Some(1))], vec![(1, Some(2))], vec![(2, Some(3))]];
        let (latest, _) = apply(&store, &cx, VersioningStrategy::Incremental, 3, &revs);
        let page = store.read_page(&cx, latest).unwrap();
        // rev1 full, rev2 delta(seq 1), rev3 would be seq 2 < 3 -> delta.
        assert_eq!(page.as_record().unwrap().dump_seq, 2);

        let revs = vec![
            vec![(0, Some(1))],
            vec![(1, Some(2))],
            vec![(2, Some(3))],
            vec![(3, Some(4))],
        ];
        let (latest, model) = apply(&store, &cx, VersioningStrategy::Incremental, 3, &revs);
        let page = store.read_page(&cx, latest).unwrap();
        assert!(page.as_record().unwrap().is_full_dump());
        assert_eq!(reconstruct(&store, &cx, latest, 0).unwrap(), model);
    }

    #[test]
    fn differential_references_only_last_full_dump() {
        let (cx, store) = store();
        let revs = vec![
            vec![(0, Some(1)), (1, Some(1))],
            vec![(1, Some(2))],
            vec![(2, Some(3))],
        ];
        let (latest, model) = apply(&store, &cx, VersioningStrategy::Differential, 4, &revs);
        let page = store.read_page(&cx, latest).unwrap();
        let record = page.as_record().unwrap();
        assert_eq!(record.fragments.len(), 1);
        // Carries every change since the dump, not just this revision's.
        assert!(record.slots.contains_key(&1));
        assert!(record.slots.contains_key(&2));
        assert_eq!(reconstruct(&store, &cx, latest, 0).unwrap(), model);
    }

    #[test]
    fn sliding_snapshot_carries_records_leaving_window() {
        let (cx, store) = store();
        let revs = vec![
            vec![(0, Some(1))],
            vec![(1, Some(2))],
            vec![(2, Some(3))],
        ];
        let (latest, model) = apply(&store, &cx, VersioningStrategy::SlidingSnapshot, 2, &revs);
        let page = store.read_page(&cx, latest).unwrap();
        let record = page.as_record().unwrap();
        assert_eq!(record.fragments.len(), 1);
        // Slot 0 only lived in the fragment that fell out of the window.
        assert_eq!(record.slots.get(&0), Some(&Some(vec![1])));
        assert!(!record.slots.contains_key(&1));
        assert_eq!(reconstruct(&store, &cx, latest, 0).unwrap(), model);
    }

    #[test]
    fn removed_slot_reads_as_absent() {
        let (cx, store) = store();
        let revs = vec![vec![(5, Some(9))], vec![(5, None)]];
        for strategy in [
            VersioningStrategy::Full,
            VersioningStrategy::Incremental,
            VersioningStrategy::Differential,
            VersioningStrategy::SlidingSnapshot,
        ] {
            let (latest, _) = apply(&store, &cx, strategy, 3, &revs);
            assert_eq!(read_slot(&store, &cx, latest, 0, 5).unwrap(), None);
        }
    }

    #[test]
    fn strategy_names_and_default() {
        assert_eq!(VersioningStrategy::SlidingSnapshot.to_string(), "sliding_snapshot");
        assert_eq!(VersioningStrategy::default(), VersioningStrategy::SlidingSnapshot);
        assert_eq!(VersioningStrategy::Differential.max_fragment_reads(5), 2);
        assert_eq!(VersioningStrategy::Incremental.max_fragment_reads(0), 1);
    }

    fn arb_strategy() -> impl Strategy<Value = VersioningStrategy> {
        prop_oneof![
            Just(VersioningStrategy::Full),
            Just(VersioningStrategy::Incremental),
            Just(VersioningStrategy::Differential),
            Just(VersioningStrategy::SlidingSnapshot),
        ]
    }

    proptest! {
        #[test]
        fn prop_reconstruction_matches_model(
            strategy in arb_strategy(),
            window in 1u32..5,
            revisions in proptest::collection::vec(
                proptest::collection::vec((0u16..12, proptest::option::of(any::<u8>())), 0..6),
                1..12,
            ),
        ) {
            let (cx, store) = store();
            let (latest, model) = apply(&store, &cx, strategy, window, &revisions);
            prop_assert_eq!(&reconstruct(&store, &cx, latest, 0).unwrap(), &model);
            for slot in 0u16..12 {
                prop_assert_eq!(
                    read_slot(&store, &cx, latest, 0, slot).unwrap(),
                    model.get(&slot).cloned()
                );
            }
        }
    }
}
