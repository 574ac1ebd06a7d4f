//! Revision immutability, temporal axes, and time travel through the public
//! API.

use arbor::{
    ArborError, InsertPosition, NewNode, NodeCursor, NodeKey, NodeRecord, ResourceConfig,
    ResourceManager, Revision, TemporalAxisKind,
};
use arbor_harness::fixtures::{bookstore, linear_history, memory_resource, snapshot};
use proptest::prelude::*;

fn resource() -> (arbor::Database<arbor::vfs::MemoryVfs>, ResourceManager) {
    memory_resource("doc", ResourceConfig::default()).unwrap()
}

fn read_at(rm: &ResourceManager, revision: Revision) -> Vec<NodeRecord> {
    let mut trx = rm.begin_node_read_only_trx(Some(revision)).unwrap();
    snapshot(&mut trx).unwrap()
}

fn axis_revisions(
    rm: &ResourceManager,
    at: Revision,
    key: NodeKey,
    kind: TemporalAxisKind,
) -> Vec<Revision> {
    let mut trx = rm.begin_node_read_only_trx(Some(at)).unwrap();
    assert!(trx.move_to(key).unwrap());
    rm.temporal_axis(&trx, kind)
        .map(|t| t.unwrap().revision())
        .collect()
}

#[test]
fn committed_revisions_never_change() {
    let (_db, rm) = resource();
    let doc = bookstore(&rm).unwrap();
    let before = read_at(&rm, doc.revision);
    let mut pinned = rm.begin_node_read_only_trx(Some(doc.revision)).unwrap();

    let mut w = rm.begin_node_trx().unwrap();
    w.move_to(doc.prices[0]).unwrap();
    w.set_value("99").unwrap();
    w.commit().unwrap();
    let mut w = rm.begin_node_trx().unwrap();
    w.remove_node(doc.books[1]).unwrap();
    w.move_to(doc.store).unwrap();
    w.insert(InsertPosition::FirstChild, NewNode::comment("restocked"))
        .unwrap();
    w.commit().unwrap();

    assert_eq!(read_at(&rm, doc.revision), before);
    assert_eq!(snapshot(&mut pinned).unwrap(), before);
    let latest = read_at(&rm, rm.most_recent_revision());
    assert_ne!(latest, before);
    assert!(latest.iter().all(|n| n.key != doc.books[1]));
}

#[test]
fn first_axis_and_previous_axis_of_a_new_child() {
    let (_db, rm) = resource();
    let mut w = rm.begin_node_trx().unwrap();
    let a = w
        .insert(InsertPosition::FirstChild, NewNode::element("a"))
        .unwrap();
    assert_eq!(w.commit().unwrap(), Revision::new(1));
    let mut w = rm.begin_node_trx().unwrap();
    w.move_to(a).unwrap();
    let b = w
        .insert(InsertPosition::FirstChild, NewNode::element("b"))
        .unwrap();
    assert_eq!(w.commit().unwrap(), Revision::new(2));

    let mut trx = rm.begin_node_read_only_trx(Some(Revision::new(2))).unwrap();
    assert!(trx.move_to(b).unwrap());
    let first: Vec<_> = rm
        .temporal_axis(&trx, TemporalAxisKind::First)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].revision(), Revision::new(2));
    assert_eq!(first[0].node_key(), b);
    assert_eq!(rm.temporal_axis(&trx, TemporalAxisKind::Previous).count(), 0);

    assert_eq!(
        axis_revisions(&rm, Revision::new(2), a, TemporalAxisKind::Previous),
        vec![Revision::new(1)]
    );
}

#[test]
fn revert_restores_content_as_a_new_revision() {
    let (_db, rm) = resource();
    let doc = bookstore(&rm).unwrap();
    let original = read_at(&rm, doc.revision);
    let mut w = rm.begin_node_trx().unwrap();
    w.remove_node(doc.store).unwrap();
    w.commit().unwrap();

    let mut w = rm.begin_node_trx().unwrap();
    let err = w.revert_to(Revision::new(40)).unwrap_err();
    assert!(matches!(err, ArborError::RevisionNotFound { .. }));
    w.revert_to(doc.revision).unwrap();
    let max_before = w.max_node_key();
    assert_eq!(w.commit_with_message("undo").unwrap(), Revision::new(3));

    assert_eq!(read_at(&rm, Revision::new(3)), original);
    let info = rm.revision_info(Revision::new(3)).unwrap();
    assert_eq!(info.commit_message.as_deref(), Some("undo"));
    assert_eq!(info.max_node_key, max_before);
}

#[test]
fn timestamps_resolve_to_the_revision_current_at_that_instant() {
    let (_db, rm) = resource();
    let history = linear_history(&rm, 4).unwrap();
    for (revision, &ts) in history.revisions.iter().zip(&history.timestamps) {
        assert_eq!(rm.begin_read_only_trx_at(ts).unwrap().revision(), *revision);
        assert_eq!(
            rm.begin_read_only_trx_at(ts + 999).unwrap().revision(),
            *revision
        );
    }
    assert_eq!(
        rm.begin_read_only_trx_at(history.timestamps[0] - 1)
            .unwrap()
            .revision(),
        Revision::ZERO
    );
    assert_eq!(rm.begin_read_only_trx_at(0).unwrap().revision(), Revision::ZERO);
    assert_eq!(
        rm.begin_read_only_trx_at(u64::MAX).unwrap().revision(),
        Revision::new(4)
    );

    let revisions: Vec<_> = rm.history().unwrap().iter().map(|i| i.revision).collect();
    assert_eq!(revisions, (0..=4).rev().map(Revision::new).collect::<Vec<_>>());
}

#[test]
fn unknown_revisions_are_reported() {
    let (_db, rm) = resource();
    bookstore(&rm).unwrap();
    let err = rm
        .begin_node_read_only_trx(Some(Revision::new(2)))
        .unwrap_err();
    assert!(matches!(
        err,
        ArborError::RevisionNotFound {
            requested: 2,
            latest: 1
        }
    ));
    assert!(rm.checked_revision(-1).is_err());
    assert_eq!(rm.checked_revision(1).unwrap(), Revision::new(1));
}

#[test]
fn past_and_future_of_a_log_entry() {
    let (_db, rm) = resource();
    let history = linear_history(&rm, 5).unwrap();
    let log = history.log;
    let r = Revision::new;
    assert_eq!(
        axis_revisions(&rm, r(3), log, TemporalAxisKind::Past { include_self: false }),
        vec![r(2), r(1)]
    );
    assert_eq!(
        axis_revisions(&rm, r(3), log, TemporalAxisKind::Future { include_self: true }),
        vec![r(3), r(4), r(5)]
    );
    assert_eq!(
        axis_revisions(&rm, r(5), history.entries[2], TemporalAxisKind::AllTime),
        vec![r(3), r(4), r(5)]
    );
    assert_eq!(
        axis_revisions(&rm, r(3), history.entries[2], TemporalAxisKind::Last),
        vec![r(5)]
    );
}

// ---------------------------------------------------------------------------
// Random edit scripts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Edit {
    /// Append an element under the `n`-th live element (or the root).
    Append(usize),
    /// Remove the `n`-th live element with its subtree.
    Remove(usize),
    Commit,
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => any::<usize>().prop_map(Edit::Append),
        1 => any::<usize>().prop_map(Edit::Remove),
        2 => Just(Edit::Commit),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn history_is_immutable_and_all_time_has_no_gaps(
        edits in prop::collection::vec(edit(), 1..40),
    ) {
        let (_db, rm) = resource();
        let mut snapshots = vec![read_at(&rm, Revision::ZERO)];
        let mut w = rm.begin_node_trx().unwrap();
        for edit in edits.into_iter().chain([Edit::Commit]) {
            match edit {
                Edit::Append(n) => {
                    let live = snapshot(&mut w).unwrap();
                    let parent = live[n % live.len()].key;
                    w.move_to(parent).unwrap();
                    w.insert(InsertPosition::LastChild, NewNode::element("e")).unwrap();
                }
                Edit::Remove(n) => {
                    let live = snapshot(&mut w).unwrap();
                    if live.len() > 1 {
                        let victim = live[1 + n % (live.len() - 1)].key;
                        w.remove_node(victim).unwrap();
                    }
                }
                Edit::Commit => {
                    let revision = w.commit().unwrap();
                    snapshots.push(read_at(&rm, revision));
                    w = rm.begin_node_trx().unwrap();
                }
            }
        }
        w.rollback();

        for (r, expected) in snapshots.iter().enumerate() {
            let revision = Revision::new(u32::try_from(r).unwrap());
            prop_assert_eq!(&read_at(&rm, revision), expected);
        }

        let latest = rm.most_recent_revision();
        let mut keys: Vec<NodeKey> = snapshots.iter().flatten().map(|n| n.key).collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            let present: Vec<Revision> = snapshots
                .iter()
                .enumerate()
                .filter(|(_, nodes)| nodes.iter().any(|n| n.key == key))
                .map(|(r, _)| Revision::new(u32::try_from(r).unwrap()))
                .collect();
            let from = *present.last().unwrap();
            prop_assert!(from <= latest);
            prop_assert_eq!(
                axis_revisions(&rm, from, key, TemporalAxisKind::AllTime),
                present
            );
        }
    }
}
