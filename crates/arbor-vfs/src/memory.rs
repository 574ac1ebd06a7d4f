use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_types::cx::Cx;
use arbor_types::flags::{SyncFlags, VfsOpenFlags};
use parking_lot::Mutex;

use crate::traits::{Vfs, VfsFile};

/// Content of one in-memory file.
///
/// `synced` is what survives [`MemoryVfs::simulate_crash`]; `data` is the
/// live content including unsynced writes.
#[derive(Debug, Default)]
struct FileStorage {
    data: Vec<u8>,
    synced: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryVfsInner {
    files: HashMap<PathBuf, Arc<Mutex<FileStorage>>>,
    dirs: BTreeSet<PathBuf>,
}

/// An in-memory VFS for tests and throwaway databases.
///
/// Clones share the same files, so a database can be closed and reopened
/// against the same `MemoryVfs`.
#[derive(Debug, Clone, Default)]
pub struct MemoryVfs {
    inner: Arc<Mutex<MemoryVfsInner>>,
}

impl MemoryVfs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every write that was not followed by a sync, as a power loss would.
    pub fn simulate_crash(&self) {
        let inner = self.inner.lock();
        for storage in inner.files.values() {
            let mut storage = storage.lock();
            storage.data = storage.synced.clone();
        }
    }

    /// Copy of a file's live content.
    #[must_use]
    pub fn file_contents(&self, path: &Path) -> Option<Vec<u8>> {
        let storage = self.inner.lock().files.get(path).map(Arc::clone)?;
        let data = storage.lock().data.clone();
        Some(data)
    }

    /// Overwrite a file's content (live and synced). Used to plant corruption.
    pub fn set_file_contents(&self, path: &Path, bytes: Vec<u8>) {
        let storage = {
            let mut inner = self.inner.lock();
            Arc::clone(inner.files.entry(path.to_path_buf()).or_default())
        };
        let mut storage = storage.lock();
        storage.synced.clone_from(&bytes);
        storage.data = bytes;
    }
}

impl Vfs for MemoryVfs {
    type File = MemoryFile;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(
        &self,
        _cx: &Cx,
        path: &Path,
        flags: VfsOpenFlags,
    ) -> Result<(Self::File, VfsOpenFlags)> {
        let mut inner = self.inner.lock();
        let is_create = flags.contains(VfsOpenFlags::CREATE);
        let storage = if let Some(existing) = inner.files.get(path) {
            if is_create && flags.contains(VfsOpenFlags::EXCLUSIVE) {
                return Err(ArborError::CannotOpen {
                    path: path.to_path_buf(),
                });
            }
            Arc::clone(existing)
        } else if is_create {
            let storage = Arc::new(Mutex::new(FileStorage::default()));
            inner.files.insert(path.to_path_buf(), Arc::clone(&storage));
            storage
        } else {
            return Err(ArborError::CannotOpen {
                path: path.to_path_buf(),
            });
        };
        drop(inner);

        let mut out_flags = flags;
        if is_create {
            out_flags |= VfsOpenFlags::READWRITE;
        }
        let file = MemoryFile {
            path: path.to_path_buf(),
            storage,
            readonly: out_flags.is_readonly(),
            delete_on_close: flags.contains(VfsOpenFlags::DELETEONCLOSE),
            vfs: Arc::clone(&self.inner),
        };
        Ok((file, out_flags))
    }

    fn delete(&self, _cx: &Cx, path: &Path) -> Result<()> {
        self.inner.lock().files.remove(path);
        Ok(())
    }

    fn exists(&self, _cx: &Cx, path: &Path) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(inner.files.contains_key(path) || inner.dirs.contains(path))
    }

    fn create_dir_all(&self, _cx: &Cx, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            inner.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn list_dir(&self, _cx: &Cx, path: &Path) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut names: BTreeSet<String> = BTreeSet::new();
        let children = inner
            .files
            .keys()
            .chain(inner.dirs.iter())
            .filter(|p| p.parent() == Some(path));
        for child in children {
            if let Some(name) = child.file_name() {
                names.insert(name.to_string_lossy().into_owned());
            }
        }
        Ok(names.into_iter().collect())
    }

    fn remove_dir_all(&self, _cx: &Cx, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.files.retain(|p, _| !p.starts_with(path));
        inner.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn full_pathname(&self, _cx: &Cx, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(Path::new("/").join(path))
        }
    }
}

/// Handle on a [`MemoryVfs`] file. Handles on one path share content.
#[derive(Debug)]
pub struct MemoryFile {
    path: PathBuf,
    storage: Arc<Mutex<FileStorage>>,
    readonly: bool,
    delete_on_close: bool,
    vfs: Arc<Mutex<MemoryVfsInner>>,
}

impl VfsFile for MemoryFile {
    fn close(&mut self, _cx: &Cx) -> Result<()> {
        if self.delete_on_close {
            self.vfs.lock().files.remove(&self.path);
        }
        Ok(())
    }

    fn read(&self, _cx: &Cx, buf: &mut [u8], offset: u64) -> Result<usize> {
        let storage = self.storage.lock();
        let available = usize::try_from(offset)
            .ok()
            .and_then(|start| storage.data.get(start..))
            .unwrap_or_default();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        drop(storage);
        buf[n..].fill(0);
        Ok(n)
    }

    fn write(&mut self, _cx: &Cx, buf: &[u8], offset: u64) -> Result<()> {
        if self.readonly {
            return Err(ArborError::ReadOnly);
        }
        let start = index(offset)?;
        let stop = start
            .checked_add(buf.len())
            .ok_or_else(|| ArborError::internal("memory file write past usize::MAX"))?;
        let mut storage = self.storage.lock();
        if storage.data.len() < stop {
            storage.data.resize(stop, 0);
        }
        storage.data[start..stop].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&mut self, _cx: &Cx, size: u64) -> Result<()> {
        if self.readonly {
            return Err(ArborError::ReadOnly);
        }
        let len = index(size)?;
        self.storage.lock().data.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self, _cx: &Cx, _flags: SyncFlags) -> Result<()> {
        let mut storage = self.storage.lock();
        let FileStorage { data, synced } = &mut *storage;
        synced.clone_from(data);
        Ok(())
    }

    fn file_size(&self, _cx: &Cx) -> Result<u64> {
        Ok(self.storage.lock().data.len() as u64)
    }
}

fn index(offset: u64) -> Result<usize> {
    usize::try_from(offset).map_err(|_| ArborError::internal("memory file offset exceeds usize"))
}
