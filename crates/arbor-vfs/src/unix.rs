//! Unix VFS backed by positional `std::fs` I/O.
//!
//! Writer exclusion is enforced in-process by the resource manager, so this
//! backend takes no advisory file locks.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use arbor_error::{ArborError, Result};
use arbor_types::cx::Cx;
use arbor_types::flags::{SyncFlags, VfsOpenFlags};
use tracing::debug;

use crate::traits::{Vfs, VfsFile};

/// The default filesystem VFS on unix platforms.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixVfs;

impl UnixVfs {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn not_found_as_cannot_open(path: &Path) -> impl FnOnce(std::io::Error) -> ArborError + '_ {
    move |e| {
        if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::AlreadyExists) {
            ArborError::CannotOpen {
                path: path.to_path_buf(),
            }
        } else {
            ArborError::Io(e)
        }
    }
}

impl Vfs for UnixVfs {
    type File = UnixFile;

    fn name(&self) -> &'static str {
        "unix"
    }

    fn open(
        &self,
        _cx: &Cx,
        path: &Path,
        flags: VfsOpenFlags,
    ) -> Result<(Self::File, VfsOpenFlags)> {
        let is_create = flags.contains(VfsOpenFlags::CREATE);
        let is_rw = flags.contains(VfsOpenFlags::READWRITE) || is_create;
        let create_new = is_create && flags.contains(VfsOpenFlags::EXCLUSIVE);

        let file = OpenOptions::new()
            .read(true)
            .write(is_rw)
            .create(is_create && !create_new)
            .create_new(create_new)
            .open(path)
            .map_err(not_found_as_cannot_open(path))?;
        debug!(path = %path.display(), rw = is_rw, "unix vfs open");

        let mut out_flags = flags;
        if is_create {
            out_flags |= VfsOpenFlags::READWRITE;
        }
        Ok((
            UnixFile {
                file,
                path: path.to_path_buf(),
                delete_on_close: flags.contains(VfsOpenFlags::DELETEONCLOSE),
            },
            out_flags,
        ))
    }

    fn delete(&self, _cx: &Cx, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArborError::Io(e)),
        }
    }

    fn exists(&self, _cx: &Cx, path: &Path) -> Result<bool> {
        Ok(path.try_exists()?)
    }

    fn create_dir_all(&self, _cx: &Cx, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn list_dir(&self, _cx: &Cx, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path).map_err(not_found_as_cannot_open(path))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn remove_dir_all(&self, _cx: &Cx, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)?;
        Ok(())
    }

    fn full_pathname(&self, _cx: &Cx, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(std::env::current_dir()?.join(path))
        }
    }
}

/// A file opened by [`UnixVfs`].
#[derive(Debug)]
pub struct UnixFile {
    file: File,
    path: PathBuf,
    delete_on_close: bool,
}

impl VfsFile for UnixFile {
    fn close(&mut self, _cx: &Cx) -> Result<()> {
        if self.delete_on_close {
            drop(fs::remove_file(&self.path));
        }
        Ok(())
    }

    fn read(&self, _cx: &Cx, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut total = 0_usize;
        while total < buf.len() {
            let off = offset + total as u64;
            let n = self.file.read_at(&mut buf[total..], off)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf[total..].fill(0);
        Ok(total)
    }

    fn write(&mut self, _cx: &Cx, buf: &[u8], offset: u64) -> Result<()> {
        let mut total = 0_usize;
        while total < buf.len() {
            let off = offset + total as u64;
            let n = self.file.write_at(&buf[total..], off)?;
            if n == 0 {
                return Err(ArborError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "unix vfs write_at returned 0",
                )));
            }
            total += n;
        }
        Ok(())
    }

    fn truncate(&mut self, _cx: &Cx, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    fn sync(&mut self, _cx: &Cx, flags: SyncFlags) -> Result<()> {
        if flags.contains(SyncFlags::DATAONLY) {
            self.file.sync_data()?;
        } else {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn file_size(&self, _cx: &Cx) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn create_write_close_reopen_read() {
        let cx = Cx::new();
        let vfs = UnixVfs::new();
        let (_dir, path) = temp_path("pages.arbor");

        let (mut file, _) = vfs.open(&cx, &path, VfsOpenFlags::page_file_rw()).unwrap();
        file.write(&cx, b"arbor pages", 0).unwrap();
        file.sync(&cx, SyncFlags::FULL).unwrap();
        file.close(&cx).unwrap();

        let (mut file, _) = vfs.open(&cx, &path, VfsOpenFlags::READONLY).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(file.read(&cx, &mut buf, 0).unwrap(), 11);
        assert_eq!(&buf, b"arbor pages");
    }

    #[test]
    fn read_past_end_zeroes() {
        let cx = Cx::new();
        let vfs = UnixVfs::new();
        let (_dir, path) = temp_path("f");
        let (mut file, _) = vfs.open(&cx, &path, VfsOpenFlags::page_file_rw()).unwrap();
        file.write(&cx, b"ab", 0).unwrap();

        let mut buf = [0xFFu8; 6];
        assert_eq!(file.read(&cx, &mut buf, 0).unwrap(), 2);
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn truncate_and_size() {
        let cx = Cx::new();
        let vfs = UnixVfs::new();
        let (_dir, path) = temp_path("f");
        let (mut file, _) = vfs.open(&cx, &path, VfsOpenFlags::page_file_rw()).unwrap();
        file.write(&cx, b"hello world", 0).unwrap();
        file.truncate(&cx, 5).unwrap();
        assert_eq!(file.file_size(&cx).unwrap(), 5);
    }

    #[test]
    fn open_missing_without_create_is_cannot_open() {
        let cx = Cx::new();
        let (_dir, path) = temp_path("missing");
        let err = UnixVfs::new()
            .open(&cx, &path, VfsOpenFlags::READWRITE)
            .unwrap_err();
        assert!(matches!(err, ArborError::CannotOpen { .. }));
    }

    #[test]
    fn directory_operations() {
        let cx = Cx::new();
        let vfs = UnixVfs::new();
        let dir = tempfile::tempdir().unwrap();
        let resources = dir.path().join("resources");
        vfs.create_dir_all(&cx, &resources.join("b")).unwrap();
        vfs.create_dir_all(&cx, &resources.join("a")).unwrap();
        assert_eq!(
            vfs.list_dir(&cx, &resources).unwrap(),
            vec!["a".to_owned(), "b".to_owned()]
        );
        vfs.remove_dir_all(&cx, &resources.join("a")).unwrap();
        assert!(!vfs.exists(&cx, &resources.join("a")).unwrap());
        vfs.delete(&cx, &resources.join("never-existed")).unwrap();
    }
}
