use arbor_vfs::MemoryVfs;

use crate::config::{DatabaseConfig, ResourceConfig};
use crate::database::Database;
use crate::resource::ResourceManager;

pub(crate) type MemoryDb = Database<MemoryVfs>;

/// A fresh in-memory database holding one empty resource.
pub(crate) fn memory_resource() -> (MemoryDb, ResourceManager) {
    let db = Database::open(MemoryVfs::new(), DatabaseConfig::new("/db")).unwrap();
    let rm = db
        .create_resource("test", ResourceConfig::default())
        .unwrap();
    (db, rm)
}
