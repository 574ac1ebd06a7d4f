//! A database: a directory of resources.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_pager::PageStore;
use arbor_types::cx::Cx;
use arbor_types::flags::VfsOpenFlags;
use arbor_vfs::{Vfs, read_whole_file, write_whole_file};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{
    DatabaseConfig, PAGE_FILE, RESOURCE_CONFIG_FILE, ResourceConfig, validate_resource_name,
};
use crate::resource::{ResourceManager, ResourceShared};

/// Opens, creates, and removes the resources below one root directory.
///
/// Each resource is opened at most once per `Database`; later
/// [`open_resource`](Self::open_resource) calls return the same manager.
pub struct Database<V: Vfs> {
    vfs: V,
    config: DatabaseConfig,
    open: Mutex<HashMap<String, ResourceManager>>,
    cx: Cx,
}

impl<V: Vfs> fmt::Debug for Database<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("vfs", &self.vfs.name())
            .field("root", &self.config.root())
            .field("open", &self.open.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<V: Vfs> Database<V> {
    pub fn open(vfs: V, config: DatabaseConfig) -> Result<Self> {
        let cx = Cx::new();
        vfs.create_dir_all(&cx, &config.resources_dir())?;
        info!(root = %config.root().display(), vfs = vfs.name(), "database opened");
        Ok(Self {
            vfs,
            config,
            open: Mutex::new(HashMap::new()),
            cx,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    #[must_use]
    pub fn vfs(&self) -> &V {
        &self.vfs
    }

    pub fn resource_exists(&self, name: &str) -> Result<bool> {
        validate_resource_name(name)?;
        self.vfs.exists(
            &self.cx,
            &self.config.resource_dir(name).join(RESOURCE_CONFIG_FILE),
        )
    }

    /// Names of all resources, sorted.
    pub fn list_resources(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for name in self.vfs.list_dir(&self.cx, &self.config.resources_dir())? {
            if validate_resource_name(&name).is_ok() && self.resource_exists(&name)? {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create a resource holding only a document root, as revision 0.
    pub fn create_resource(&self, name: &str, config: ResourceConfig) -> Result<ResourceManager> {
        validate_resource_name(name)?;
        config.validate()?;
        if self.resource_exists(name)? {
            return Err(ArborError::ResourceExists {
                name: name.to_owned(),
            });
        }
        let dir = self.config.resource_dir(name);
        self.vfs.create_dir_all(&self.cx, &dir)?;
        let created = self.bootstrap(name, &config);
        let shared = match created {
            Ok(shared) => shared,
            Err(err) => {
                if let Err(cleanup) = self.vfs.remove_dir_all(&self.cx, &dir) {
                    warn!(resource = name, error = %cleanup, "leftovers of failed create remain");
                }
                return Err(err);
            }
        };
        info!(
            resource = name,
            versioning = %config.versioning,
            revisions_to_restore = config.revisions_to_restore,
            "resource created"
        );
        let manager = ResourceManager::new(shared);
        self.open
            .lock()
            .insert(name.to_owned(), manager.clone());
        Ok(manager)
    }

    fn bootstrap(&self, name: &str, config: &ResourceConfig) -> Result<Arc<ResourceShared>> {
        let dir = self.config.resource_dir(name);
        let (file, _) = self.vfs.open(
            &self.cx,
            &dir.join(PAGE_FILE),
            VfsOpenFlags::page_file_rw() | VfsOpenFlags::EXCLUSIVE,
        )?;
        let store = PageStore::create(
            &self.cx,
            name,
            Box::new(file),
            config.page_cache_capacity,
            config.sync_on_commit,
        )?;
        let shared = ResourceShared::bootstrap(&self.cx, name.to_owned(), config.clone(), store)?;
        // The configuration file marks the resource as complete.
        write_whole_file(
            &self.vfs,
            &self.cx,
            &dir.join(RESOURCE_CONFIG_FILE),
            &config.to_json()?,
        )?;
        Ok(shared)
    }

    pub fn open_resource(&self, name: &str) -> Result<ResourceManager> {
        validate_resource_name(name)?;
        let mut open = self.open.lock();
        if let Some(manager) = open.get(name).filter(|m| !m.is_closed()) {
            return Ok(manager.clone());
        }
        if !self.resource_exists(name)? {
            return Err(ArborError::ResourceNotFound {
                name: name.to_owned(),
            });
        }
        let dir = self.config.resource_dir(name);
        let config = ResourceConfig::from_json(&read_whole_file(
            &self.vfs,
            &self.cx,
            &dir.join(RESOURCE_CONFIG_FILE),
        )?)?;
        let (file, _) = self.vfs.open(
            &self.cx,
            &dir.join(PAGE_FILE),
            VfsOpenFlags::READWRITE | VfsOpenFlags::PAGE_FILE,
        )?;
        let store = PageStore::open(
            &self.cx,
            name,
            Box::new(file),
            config.page_cache_capacity,
            config.sync_on_commit,
        )?;
        let manager = ResourceManager::new(ResourceShared::open(
            &self.cx,
            name.to_owned(),
            config,
            store,
        )?);
        open.insert(name.to_owned(), manager.clone());
        Ok(manager)
    }

    /// Close and delete a resource.
    ///
    /// # Errors
    ///
    /// [`ArborError::ConcurrentWrite`] while the resource has an open write
    /// transaction.
    pub fn remove_resource(&self, name: &str) -> Result<()> {
        validate_resource_name(name)?;
        if !self.resource_exists(name)? {
            return Err(ArborError::ResourceNotFound {
                name: name.to_owned(),
            });
        }
        let mut open = self.open.lock();
        if let Some(manager) = open.get(name) {
            manager.close()?;
            open.remove(name);
        }
        self.vfs
            .remove_dir_all(&self.cx, &self.config.resource_dir(name))?;
        info!(resource = name, "resource removed");
        Ok(())
    }

    /// Close every open resource.
    pub fn close(&self) -> Result<()> {
        let mut open = self.open.lock();
        for manager in open.values() {
            manager.close()?;
        }
        open.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use arbor_pager::VersioningStrategy;
    use arbor_types::Revision;
    use arbor_vfs::MemoryVfs;

    use super::*;
    use crate::cursor::NodeCursor;
    use crate::node_write::{InsertPosition, NewNode};

    fn db() -> Database<MemoryVfs> {
        Database::open(MemoryVfs::new(), DatabaseConfig::new("/db")).unwrap()
    }

    #[test]
    fn created_resource_starts_at_revision_zero() {
        let db = db();
        let rm = db
            .create_resource(
                "shop",
                ResourceConfig::new().with_versioning(VersioningStrategy::Incremental),
            )
            .unwrap();
        assert_eq!(rm.most_recent_revision(), Revision::ZERO);
        let trx = rm.begin_node_read_only_trx(None).unwrap();
        assert!(!trx.has_children());
        assert_eq!(rm.config().versioning, VersioningStrategy::Incremental);
        assert_eq!(db.list_resources().unwrap(), vec!["shop".to_owned()]);
    }

    #[test]
    fn names_and_duplicates() {
        let db = db();
        db.create_resource("a", ResourceConfig::default()).unwrap();
        let err = db.create_resource("a", ResourceConfig::default()).unwrap_err();
        assert!(matches!(err, ArborError::ResourceExists { .. }));
        assert!(db.create_resource("../x", ResourceConfig::default()).is_err());
        let err = db
            .create_resource("b", ResourceConfig::new().with_revisions_to_restore(0))
            .unwrap_err();
        assert!(matches!(err, ArborError::InvalidConfig { .. }));
        assert!(!db.resource_exists("b").unwrap());
        let err = db.open_resource("missing").unwrap_err();
        assert!(matches!(err, ArborError::ResourceNotFound { .. }));
    }

    #[test]
    fn reopen_reads_config_and_latest_revision() {
        let vfs = MemoryVfs::new();
        {
            let db = Database::open(vfs.clone(), DatabaseConfig::new("/db")).unwrap();
            let rm = db
                .create_resource(
                    "r",
                    ResourceConfig::new().with_versioning(VersioningStrategy::Differential),
                )
                .unwrap();
            let mut w = rm.begin_node_trx().unwrap();
            w.insert(InsertPosition::FirstChild, NewNode::element("a"))
                .unwrap();
            w.commit().unwrap();
            db.close().unwrap();
        }
        let db = Database::open(vfs, DatabaseConfig::new("/db")).unwrap();
        let rm = db.open_resource("r").unwrap();
        assert_eq!(rm.config().versioning, VersioningStrategy::Differential);
        assert_eq!(rm.most_recent_revision(), Revision::new(1));
        let same = db.open_resource("r").unwrap();
        assert_eq!(same.most_recent_revision(), Revision::new(1));
    }

    #[test]
    fn remove_refuses_while_writing() {
        let db = db();
        let rm = db.create_resource("r", ResourceConfig::default()).unwrap();
        let w = rm.begin_node_trx().unwrap();
        let err = db.remove_resource("r").unwrap_err();
        assert!(matches!(err, ArborError::ConcurrentWrite { .. }));
        drop(w);
        db.remove_resource("r").unwrap();
        assert!(db.list_resources().unwrap().is_empty());
        assert!(rm.is_closed());
        assert!(rm.begin_node_read_only_trx(None).is_err());
    }
}
