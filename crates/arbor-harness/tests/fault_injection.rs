//! Storage faults during resource creation, commit, and index builds.

use std::sync::Arc;

use arbor_core::{
    CompactionHook, Database, DatabaseConfig, InsertPosition, NewNode, NodeCursor,
    OrphanedExtent, ResourceConfig,
};
use arbor_error::{ArborError, ErrorCategory};
use arbor_harness::fixtures::{PRICES, bookstore, resource_on};
use arbor_harness::{FaultInjectingVfs, FaultKind, FaultSpec};
use arbor_index::IndexDef;
use arbor_types::{AtomicType, Path, Revision};
use arbor_vfs::MemoryVfs;
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    extents: Mutex<Vec<(String, OrphanedExtent)>>,
}

impl CompactionHook for Recorder {
    fn orphaned(&self, resource: &str, extent: OrphanedExtent) {
        self.extents.lock().push((resource.to_owned(), extent));
    }
}

fn faulty() -> FaultInjectingVfs<MemoryVfs> {
    FaultInjectingVfs::new(MemoryVfs::new())
}

#[test]
fn failed_create_leaves_no_resource_behind() {
    let vfs = faulty();
    let db = Database::open(vfs.clone(), DatabaseConfig::new("/db")).unwrap();
    vfs.inject_fault(FaultSpec::write_failure("pages.arbor").build());

    let err = db.create_resource("r", ResourceConfig::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
    assert!(!db.resource_exists("r").unwrap());
    assert!(db.list_resources().unwrap().is_empty());

    let rm = db.create_resource("r", ResourceConfig::default()).unwrap();
    assert_eq!(rm.most_recent_revision(), Revision::ZERO);
}

#[test]
fn failed_commit_reports_orphaned_pages_and_keeps_the_last_revision() {
    let vfs = faulty();
    let (db, rm) = resource_on(vfs.clone(), "shop", ResourceConfig::default()).unwrap();
    let recorder = Arc::new(Recorder::default());
    rm.set_compaction_hook(recorder.clone());
    let doc = bookstore(&rm).unwrap();

    vfs.inject_fault(FaultSpec::sync_failure("pages.arbor").build());
    let mut w = rm.begin_node_trx().unwrap();
    w.move_to(doc.store).unwrap();
    w.insert(InsertPosition::LastChild, NewNode::element("book"))
        .unwrap();
    let err = w.commit().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
    assert_eq!(rm.most_recent_revision(), doc.revision);
    assert_eq!(rm.node_write_trx(), None, "failed commit released the writer");

    let extents = recorder.extents.lock().clone();
    assert_eq!(extents.len(), 1);
    let (resource, extent) = &extents[0];
    assert_eq!(resource, "shop");
    assert_eq!(extent.revision, Revision::new(2));
    assert!(!extent.is_empty());
    assert_eq!(vfs.fault_hits()[0].kind, FaultKind::SyncFailure);

    // The revision number is reused by the next successful commit.
    let mut w = rm.begin_node_trx().unwrap();
    assert_eq!(w.revision(), Revision::new(2));
    w.move_to(doc.store).unwrap();
    w.insert(InsertPosition::LastChild, NewNode::element("book"))
        .unwrap();
    assert_eq!(w.commit().unwrap(), Revision::new(2));
    db.close().unwrap();

    let db = Database::open(vfs.inner().clone(), DatabaseConfig::new("/db")).unwrap();
    let rm = db.open_resource("shop").unwrap();
    assert_eq!(rm.most_recent_revision(), Revision::new(2));
    let mut r = rm.begin_node_read_only_trx(None).unwrap();
    r.move_to(doc.store).unwrap();
    assert_eq!(r.child_count(), PRICES.len() as u64 + 1);
    let mut r = rm.begin_node_read_only_trx(Some(doc.revision)).unwrap();
    r.move_to(doc.store).unwrap();
    assert_eq!(r.child_count(), PRICES.len() as u64);
}

#[test]
fn torn_commit_is_invisible_after_a_crash() {
    let vfs = faulty();
    let (_db, rm) = resource_on(vfs.clone(), "r", ResourceConfig::default()).unwrap();
    let doc = bookstore(&rm).unwrap();

    vfs.inject_fault(FaultSpec::partial_write("pages.arbor").valid_bytes(5).build());
    let mut w = rm.begin_node_trx().unwrap();
    w.move_to(doc.books[0]).unwrap();
    w.remove().unwrap();
    assert!(w.commit().is_err());
    vfs.inner().simulate_crash();

    let db = Database::open(vfs.inner().clone(), DatabaseConfig::new("/db")).unwrap();
    let rm = db.open_resource("r").unwrap();
    assert_eq!(rm.most_recent_revision(), doc.revision);
    let mut r = rm.begin_node_read_only_trx(None).unwrap();
    assert!(r.move_to(doc.books[0]).unwrap());
    assert_eq!(r.commit_message(), Some("bookstore"));
}

#[test]
fn failed_index_build_ends_the_transaction() {
    let vfs = faulty();
    let config = ResourceConfig::new().with_page_cache_capacity(0);
    let (_db, rm) = resource_on(vfs.clone(), "r", config).unwrap();
    let doc = bookstore(&rm).unwrap();
    let price_path = Path::parse("/store/book/price").unwrap();
    let def = IndexDef::cas(Some(AtomicType::Numeric), [price_path.clone()]);

    let mut w = rm.begin_node_trx().unwrap();
    vfs.inject_fault(FaultSpec::read_failure("pages.arbor").build());
    let err = w.create_indexes([def.clone()]).unwrap_err();
    assert!(matches!(err, ArborError::IoRead { .. }));
    assert!(w.index_defs().is_empty());
    assert!(w.find_cas_index(&price_path, None).is_none());
    assert!(matches!(
        w.create_indexes([def.clone()]),
        Err(ArborError::TransactionClosed)
    ));
    assert!(matches!(w.commit(), Err(ArborError::TransactionClosed)));
    assert_eq!(rm.most_recent_revision(), doc.revision);
    assert_eq!(rm.node_write_trx(), None);

    // A fresh transaction builds the index.
    let mut w = rm.begin_node_trx().unwrap();
    let created = w.create_indexes([def]).unwrap();
    assert_eq!(created.len(), 1);
    let query = arbor_core::IndexQuery::exact(arbor_types::AtomicValue::Int(PRICES[1]));
    assert_eq!(w.lookup(&created[0], &query).unwrap(), vec![doc.prices[1]]);
    w.commit().unwrap();

    let controller = rm.index_controller(None).unwrap();
    assert_eq!(controller.index_defs().len(), 1);
    let controller = rm.index_controller(Some(doc.revision)).unwrap();
    assert!(controller.index_defs().is_empty());
}
