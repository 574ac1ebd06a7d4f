use std::path::{Path, PathBuf};

use arbor_error::{ArborError, Result};
use arbor_types::cx::Cx;
use arbor_types::flags::{SyncFlags, VfsOpenFlags};

/// Storage backend for a database directory.
///
/// The page store and the resource sidecars only touch files through this
/// trait, so the same code runs on disk, in memory and under fault injection.
pub trait Vfs: Send + Sync {
    /// Handle returned by [`Vfs::open`].
    type File: VfsFile + 'static;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Open `path`, creating it when `flags` contains `CREATE`.
    ///
    /// The returned flags are the effective ones: `CREATE` implies
    /// `READWRITE`.
    fn open(
        &self,
        cx: &Cx,
        path: &Path,
        flags: VfsOpenFlags,
    ) -> Result<(Self::File, VfsOpenFlags)>;

    /// Remove the file at `path`.
    fn delete(&self, cx: &Cx, path: &Path) -> Result<()>;

    /// Whether a file or directory exists at `path`.
    fn exists(&self, cx: &Cx, path: &Path) -> Result<bool>;

    /// Create `path` and all missing parent directories.
    fn create_dir_all(&self, cx: &Cx, path: &Path) -> Result<()>;

    /// Names of the direct children of directory `path`, sorted.
    fn list_dir(&self, cx: &Cx, path: &Path) -> Result<Vec<String>>;

    /// Remove a directory and everything below it.
    fn remove_dir_all(&self, cx: &Cx, path: &Path) -> Result<()>;

    /// Absolute form of `path`.
    fn full_pathname(&self, cx: &Cx, path: &Path) -> Result<PathBuf>;
}

/// Positional read/write handle on one file.
pub trait VfsFile: Send + Sync {
    /// Release the handle. Later calls on it are errors.
    fn close(&mut self, cx: &Cx) -> Result<()>;

    /// Fill `buf` from `offset` and return how many bytes came from the file.
    ///
    /// Bytes past the end of file are zeroed in `buf`. Reads are positional
    /// and may run concurrently on one handle.
    fn read(&self, cx: &Cx, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Store `buf` at `offset`, growing the file as needed.
    fn write(&mut self, cx: &Cx, buf: &[u8], offset: u64) -> Result<()>;

    /// Cut or extend the file to exactly `size` bytes.
    fn truncate(&mut self, cx: &Cx, size: u64) -> Result<()>;

    /// Make every write so far durable.
    fn sync(&mut self, cx: &Cx, flags: SyncFlags) -> Result<()>;

    /// Length in bytes.
    fn file_size(&self, cx: &Cx) -> Result<u64>;
}

impl<F: VfsFile + ?Sized> VfsFile for Box<F> {
    fn close(&mut self, cx: &Cx) -> Result<()> {
        (**self).close(cx)
    }

    fn read(&self, cx: &Cx, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read(cx, buf, offset)
    }

    fn write(&mut self, cx: &Cx, buf: &[u8], offset: u64) -> Result<()> {
        (**self).write(cx, buf, offset)
    }

    fn truncate(&mut self, cx: &Cx, size: u64) -> Result<()> {
        (**self).truncate(cx, size)
    }

    fn sync(&mut self, cx: &Cx, flags: SyncFlags) -> Result<()> {
        (**self).sync(cx, flags)
    }

    fn file_size(&self, cx: &Cx) -> Result<u64> {
        (**self).file_size(cx)
    }
}

/// Read the entire content of a (small) sidecar file.
pub fn read_whole_file<V: Vfs + ?Sized>(vfs: &V, cx: &Cx, path: &Path) -> Result<Vec<u8>> {
    let (mut file, _) = vfs.open(cx, path, VfsOpenFlags::READONLY | VfsOpenFlags::SIDECAR)?;
    let size = usize::try_from(file.file_size(cx)?)
        .map_err(|_| ArborError::internal("sidecar file larger than address space"))?;
    let mut buf = vec![0u8; size];
    let n = file.read(cx, &mut buf, 0)?;
    file.close(cx)?;
    if n != size {
        return Err(ArborError::ShortRead {
            expected: size,
            actual: n,
        });
    }
    Ok(buf)
}

/// Replace the content of a sidecar file and sync it.
pub fn write_whole_file<V: Vfs + ?Sized>(
    vfs: &V,
    cx: &Cx,
    path: &Path,
    bytes: &[u8],
) -> Result<()> {
    let (mut file, _) = vfs.open(
        cx,
        path,
        VfsOpenFlags::READWRITE | VfsOpenFlags::CREATE | VfsOpenFlags::SIDECAR,
    )?;
    file.truncate(cx, 0)?;
    file.write(cx, bytes, 0)?;
    file.sync(cx, SyncFlags::FULL)?;
    file.close(cx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfs_file_is_object_safe() {
        fn _accepts_dyn(_f: &dyn VfsFile) {}
    }

    #[test]
    fn boxed_file_forwards() {
        struct CountingFile(u64);
        impl VfsFile for CountingFile {
            fn close(&mut self, _cx: &Cx) -> Result<()> {
                Ok(())
            }
            fn read(&self, _cx: &Cx, buf: &mut [u8], _offset: u64) -> Result<usize> {
                buf.fill(0);
                Ok(0)
            }
            fn write(&mut self, _cx: &Cx, buf: &[u8], _offset: u64) -> Result<()> {
                self.0 += buf.len() as u64;
                Ok(())
            }
            fn truncate(&mut self, _cx: &Cx, size: u64) -> Result<()> {
                self.0 = size;
                Ok(())
            }
            fn sync(&mut self, _cx: &Cx, _flags: SyncFlags) -> Result<()> {
                Ok(())
            }
            fn file_size(&self, _cx: &Cx) -> Result<u64> {
                Ok(self.0)
            }
        }

        let cx = Cx::new();
        let mut boxed: Box<dyn VfsFile> = Box::new(CountingFile(0));
        boxed.write(&cx, b"abc", 0).unwrap();
        assert_eq!(boxed.file_size(&cx).unwrap(), 3);
        boxed.truncate(&cx, 1).unwrap();
        assert_eq!(boxed.file_size(&cx).unwrap(), 1);
    }
}
