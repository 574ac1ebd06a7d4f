//! One writer, many readers, across threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use arbor::{
    ArborError, ErrorCategory, InsertPosition, NewNode, NodeCursor, NodeKey, ResourceConfig,
    ResourceManager, Revision,
};
use arbor_harness::fixtures::{bookstore, linear_history, memory_resource, snapshot};

fn resource() -> (arbor::Database<arbor::vfs::MemoryVfs>, ResourceManager) {
    memory_resource("shared", ResourceConfig::default()).unwrap()
}

fn append_entry(rm: &ResourceManager, log: NodeKey) -> Revision {
    let mut w = rm.begin_node_trx().unwrap();
    w.move_to(log).unwrap();
    w.insert(InsertPosition::LastChild, NewNode::element("entry"))
        .unwrap();
    w.commit().unwrap()
}

#[test]
fn pinned_reader_is_isolated_from_concurrent_commits() {
    let (_db, rm) = resource();
    let doc = bookstore(&rm).unwrap();
    let mut reader = rm.begin_node_read_only_trx(Some(doc.revision)).unwrap();
    let expected = snapshot(&mut reader).unwrap();
    assert_eq!(rm.pinned_revisions(), vec![(doc.revision, 1)]);

    let done = AtomicBool::new(false);
    thread::scope(|s| {
        let writer = s.spawn(|| {
            for i in 0..8 {
                let mut w = rm.begin_node_trx().unwrap();
                w.move_to(doc.prices[1 + i % 2]).unwrap();
                w.set_value(format!("{}", 100 + i)).unwrap();
                if i == 7 {
                    w.remove_node(doc.books[0]).unwrap();
                }
                w.commit().unwrap();
            }
            done.store(true, Ordering::Release);
        });
        while !done.load(Ordering::Acquire) {
            assert_eq!(snapshot(&mut reader).unwrap(), expected);
            thread::yield_now();
        }
        writer.join().unwrap();
    });

    assert_eq!(rm.most_recent_revision(), Revision::new(9));
    assert_eq!(reader.revision(), doc.revision);
    assert_eq!(snapshot(&mut reader).unwrap(), expected);
    drop(reader);
    assert!(rm.pinned_revisions().is_empty());
}

#[test]
fn readers_always_see_a_whole_revision() {
    let (_db, rm) = resource();
    let history = linear_history(&rm, 1).unwrap();
    let log = history.log;

    thread::scope(|s| {
        let writer = s.spawn(|| {
            for _ in 0..20 {
                append_entry(&rm, log);
            }
        });
        let readers: Vec<_> = (0..3)
            .map(|_| {
                s.spawn(|| {
                    let mut last = Revision::ZERO;
                    for _ in 0..50 {
                        let mut r = rm.begin_node_read_only_trx(None).unwrap();
                        assert!(r.revision() >= last, "revisions never go backwards");
                        last = r.revision();
                        assert!(r.move_to(log).unwrap());
                        assert_eq!(r.child_count(), u64::from(r.revision().get()));
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    });
    assert_eq!(rm.most_recent_revision(), Revision::new(21));
}

#[test]
fn second_writer_fails_fast_on_another_thread() {
    let (_db, rm) = resource();
    let history = linear_history(&rm, 1).unwrap();
    let w = rm.begin_node_trx().unwrap();
    let id = rm.node_write_trx();
    assert!(id.is_some());

    thread::scope(|s| {
        let err = s
            .spawn(|| rm.begin_node_trx().map(|_| ()))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            ArborError::ConcurrentWrite { ref resource } if resource == "shared"
        ));
        assert_eq!(err.category(), ErrorCategory::ConcurrentWrite);
    });
    assert_eq!(rm.node_write_trx(), id);

    w.rollback();
    assert_eq!(rm.node_write_trx(), None);
    let revision = thread::scope(|s| s.spawn(|| append_entry(&rm, history.log)).join().unwrap());
    assert_eq!(revision, Revision::new(2));
}

#[test]
fn dropping_a_write_transaction_releases_the_writer() {
    let (_db, rm) = resource();
    {
        let mut w = rm.begin_node_trx().unwrap();
        w.insert(InsertPosition::FirstChild, NewNode::element("draft"))
            .unwrap();
    }
    assert_eq!(rm.node_write_trx(), None);
    assert_eq!(rm.most_recent_revision(), Revision::ZERO);
    let mut r = rm.begin_node_read_only_trx(None).unwrap();
    r.move_to_document_root().unwrap();
    assert!(!r.has_children());
}

#[test]
fn close_never_overlaps_an_open_writer() {
    for _ in 0..20 {
        let (_db, rm) = resource();
        thread::scope(|s| {
            s.spawn(|| {
                while !rm.is_closed() {
                    if let Ok(w) = rm.begin_node_trx() {
                        assert!(!rm.is_closed(), "writer opened on a closed resource");
                        thread::yield_now();
                        assert!(!rm.is_closed(), "resource closed under a writer");
                        drop(w);
                    }
                }
            });
            s.spawn(|| {
                loop {
                    match rm.close() {
                        Ok(()) => break,
                        Err(err) => assert_eq!(err.category(), ErrorCategory::ConcurrentWrite),
                    }
                    thread::yield_now();
                }
            });
        });
        assert!(rm.is_closed());
        assert_eq!(rm.node_write_trx(), None);
        assert!(matches!(
            rm.begin_node_trx().map(|_| ()),
            Err(ArborError::TransactionClosed)
        ));
    }
}
