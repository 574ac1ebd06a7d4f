//! Temporal axes: the revisions in which one node exists.
//!
//! An axis is a lazy iterator of read transactions, each pinned to a
//! revision in which the node of the starting transaction exists and with its
//! cursor on that node. Revisions without the node are skipped. Revisions
//! committed after the axis was created are not visited, so constructing the
//! same axis again from the same transaction yields the same sequence as long
//! as nothing newer is asked for.

use std::iter::Rev;
use std::ops::RangeInclusive;

use arbor_error::Result;
use arbor_types::{NodeKey, Revision};
use tracing::trace;

use crate::cursor::NodeCursor;
use crate::node_read::NodeReadTrx;
use crate::resource::ResourceManager;

/// Which revisions an axis visits, relative to the starting revision `r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalAxisKind {
    /// The earliest revision containing the node.
    First,
    /// The most recent revision containing the node.
    Last,
    /// `r + 1`, if the node exists there.
    Next,
    /// `r - 1`, if the node exists there.
    Previous,
    /// Every revision containing the node, ascending.
    AllTime,
    /// Revisions before `r` (and `r` itself with `include_self`), nearest
    /// first.
    Past { include_self: bool },
    /// Revisions after `r` (and `r` itself with `include_self`), ascending.
    Future { include_self: bool },
}

#[derive(Debug)]
enum Candidates {
    Ascending(RangeInclusive<u32>),
    Descending(Rev<RangeInclusive<u32>>),
}

impl Candidates {
    fn none() -> Self {
        Self::Ascending(RangeInclusive::new(1, 0))
    }
}

impl Iterator for Candidates {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            Self::Ascending(r) => r.next(),
            Self::Descending(r) => r.next(),
        }
    }
}

/// Lazy sequence of read transactions over the revisions of one node.
#[derive(Debug)]
pub struct TemporalAxis {
    resource: ResourceManager,
    node_key: NodeKey,
    candidates: Candidates,
    limit: Option<usize>,
    yielded: usize,
}

impl TemporalAxis {
    /// Axis of the node under `trx`'s cursor.
    #[must_use]
    pub fn new(resource: &ResourceManager, trx: &NodeReadTrx, kind: TemporalAxisKind) -> Self {
        let r = trx.revision().get();
        let latest = resource.most_recent_revision().get();
        let (candidates, limit) = match kind {
            TemporalAxisKind::First => (Candidates::Ascending(0..=latest), Some(1)),
            TemporalAxisKind::Last => (Candidates::Descending((0..=latest).rev()), Some(1)),
            TemporalAxisKind::Next => {
                let next = r.saturating_add(1);
                (Candidates::Ascending(next..=latest.min(next)), None)
            }
            TemporalAxisKind::Previous => match r.checked_sub(1) {
                Some(prev) => (Candidates::Ascending(prev..=prev), None),
                None => (Candidates::none(), None),
            },
            TemporalAxisKind::AllTime => (Candidates::Ascending(0..=latest), None),
            TemporalAxisKind::Past { include_self } => {
                let end = if include_self { Some(r) } else { r.checked_sub(1) };
                match end {
                    Some(end) => (Candidates::Descending((0..=end).rev()), None),
                    None => (Candidates::none(), None),
                }
            }
            TemporalAxisKind::Future { include_self } => {
                let start = if include_self { r } else { r.saturating_add(1) };
                (Candidates::Ascending(start..=latest), None)
            }
        };
        Self {
            resource: resource.clone(),
            node_key: trx.node_key(),
            candidates,
            limit,
            yielded: 0,
        }
    }

    #[must_use]
    pub const fn node_key(&self) -> NodeKey {
        self.node_key
    }

    fn open(&self, revision: Revision) -> Result<Option<NodeReadTrx>> {
        let mut trx = self.resource.begin_node_read_only_trx(Some(revision))?;
        if trx.move_to(self.node_key)? {
            Ok(Some(trx))
        } else {
            trace!(node_key = self.node_key.get(), revision = revision.get(), "node absent");
            Ok(None)
        }
    }
}

impl Iterator for TemporalAxis {
    type Item = Result<NodeReadTrx>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                return None;
            }
            let revision = Revision::new(self.candidates.next()?);
            match self.open(revision) {
                Ok(Some(trx)) => {
                    self.yielded += 1;
                    return Some(Ok(trx));
                }
                Ok(None) => {}
                Err(err) => {
                    self.candidates = Candidates::none();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for TemporalAxis {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_write::{InsertPosition, NewNode};
    use crate::test_util::memory_resource;

    /// r1: a. r2: a, b under a. r3: a. r4: a, c.
    fn history() -> (crate::test_util::MemoryDb, ResourceManager, NodeKey, NodeKey) {
        let (db, rm) = memory_resource();
        let mut w = rm.begin_node_trx().unwrap();
        let a = w.insert(InsertPosition::FirstChild, NewNode::element("a")).unwrap();
        w.commit().unwrap();
        let mut w = rm.begin_node_trx().unwrap();
        w.move_to(a).unwrap();
        let b = w.insert(InsertPosition::FirstChild, NewNode::element("b")).unwrap();
        w.commit().unwrap();
        let mut w = rm.begin_node_trx().unwrap();
        w.remove_node(b).unwrap();
        w.commit().unwrap();
        let mut w = rm.begin_node_trx().unwrap();
        w.move_to(a).unwrap();
        w.insert(InsertPosition::LastChild, NewNode::element("c")).unwrap();
        w.commit().unwrap();
        (db, rm, a, b)
    }

    fn revisions(rm: &ResourceManager, at: u32, key: NodeKey, kind: TemporalAxisKind) -> Vec<u32> {
        let mut trx = rm.begin_node_read_only_trx(Some(Revision::new(at))).unwrap();
        assert!(trx.move_to(key).unwrap());
        rm.temporal_axis(&trx, kind)
            .map(|t| {
                let t = t.unwrap();
                assert_eq!(t.node_key(), key);
                t.revision().get()
            })
            .collect()
    }

    #[test]
    fn all_time_skips_revisions_without_the_node() {
        let (_db, rm, a, b) = history();
        assert_eq!(revisions(&rm, 4, a, TemporalAxisKind::AllTime), vec![1, 2, 3, 4]);
        assert_eq!(revisions(&rm, 2, b, TemporalAxisKind::AllTime), vec![2]);
    }

    #[test]
    fn first_and_last() {
        let (_db, rm, a, b) = history();
        assert_eq!(revisions(&rm, 3, a, TemporalAxisKind::First), vec![1]);
        assert_eq!(revisions(&rm, 1, a, TemporalAxisKind::Last), vec![4]);
        assert_eq!(revisions(&rm, 2, b, TemporalAxisKind::First), vec![2]);
        assert_eq!(revisions(&rm, 2, b, TemporalAxisKind::Last), vec![2]);
    }

    #[test]
    fn next_and_previous_are_single_steps() {
        let (_db, rm, a, b) = history();
        assert_eq!(revisions(&rm, 2, a, TemporalAxisKind::Next), vec![3]);
        assert_eq!(revisions(&rm, 2, a, TemporalAxisKind::Previous), vec![1]);
        assert!(revisions(&rm, 2, b, TemporalAxisKind::Next).is_empty());
        assert!(revisions(&rm, 2, b, TemporalAxisKind::Previous).is_empty());
        assert!(revisions(&rm, 4, a, TemporalAxisKind::Next).is_empty());
    }

    #[test]
    fn past_and_future() {
        let (_db, rm, a, _) = history();
        let past = |include_self| TemporalAxisKind::Past { include_self };
        let future = |include_self| TemporalAxisKind::Future { include_self };
        assert_eq!(revisions(&rm, 3, a, past(false)), vec![2, 1]);
        assert_eq!(revisions(&rm, 3, a, past(true)), vec![3, 2, 1]);
        assert_eq!(revisions(&rm, 2, a, future(false)), vec![3, 4]);
        assert_eq!(revisions(&rm, 2, a, future(true)), vec![2, 3, 4]);
    }

    #[test]
    fn axis_is_restartable_and_releases_pins() {
        let (_db, rm, a, _) = history();
        let mut trx = rm.begin_node_read_only_trx(None).unwrap();
        trx.move_to(a).unwrap();
        let first: Vec<_> = rm
            .temporal_axis(&trx, TemporalAxisKind::AllTime)
            .map(|t| t.unwrap().revision())
            .collect();
        let again: Vec<_> = rm
            .temporal_axis(&trx, TemporalAxisKind::AllTime)
            .map(|t| t.unwrap().revision())
            .collect();
        assert_eq!(first, again);
        assert_eq!(rm.pinned_revisions(), vec![(Revision::new(4), 1)]);
    }
}
