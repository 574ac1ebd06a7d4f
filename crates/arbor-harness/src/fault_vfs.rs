//! Deterministic storage fault injection.
//!
//! [`FaultInjectingVfs`] wraps any [`Vfs`] and fails reads, writes, or syncs
//! on files whose path matches a [`FaultSpec`]. Every handle opened through
//! the wrapper shares one [`FaultState`], so a fault registered after a
//! resource is open still reaches its page file.
//!
//! ```ignore
//! use arbor_harness::fault_vfs::{FaultInjectingVfs, FaultSpec};
//! use arbor_vfs::MemoryVfs;
//!
//! let vfs = FaultInjectingVfs::new(MemoryVfs::new());
//! vfs.inject_fault(FaultSpec::sync_failure("pages.arbor").build());
//! vfs.inject_fault(FaultSpec::partial_write("*.arbor").valid_bytes(7).after_count(2).build());
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arbor_error::{ArborError, Result};
use arbor_types::cx::Cx;
use arbor_types::flags::{SyncFlags, VfsOpenFlags};
use arbor_vfs::{Vfs, VfsFile};
use parking_lot::Mutex;
use tracing::debug;

// Fault rules

/// What an armed fault does to the operation it hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Read returns an I/O error.
    ReadFailure,
    /// Write returns an I/O error without touching the file.
    WriteFailure,
    /// Only the first `valid_bytes` of the write reach the file, then the
    /// write fails.
    PartialWrite { valid_bytes: usize },
    /// Sync returns an I/O error.
    SyncFailure,
}

impl FaultKind {
    const fn operation(self) -> Operation {
        match self {
            Self::ReadFailure => Operation::Read,
            Self::WriteFailure | Self::PartialWrite { .. } => Operation::Write,
            Self::SyncFailure => Operation::Sync,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Read,
    Write,
    Sync,
}

/// A fault that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultHit {
    pub spec_index: usize,
    pub path: PathBuf,
    pub kind: FaultKind,
    /// Byte offset of the faulted read or write; `None` for syncs.
    pub offset: Option<u64>,
}

/// A fault armed against every file whose path matches `pattern`.
#[derive(Debug, Clone)]
pub struct FaultSpec {
    /// `"*"`, `"*suffix"`, `"prefix*"`, an exact path, or a file name.
    pub pattern: String,
    pub kind: FaultKind,
    /// Matching operations let through before the first trigger.
    after_count: u64,
    max_triggers: u32,
    trigger_count: u32,
    match_count: u64,
}

impl FaultSpec {
    #[must_use]
    pub fn read_failure(glob: &str) -> FaultSpecBuilder {
        FaultSpecBuilder::new(glob, FaultKind::ReadFailure)
    }

    #[must_use]
    pub fn write_failure(glob: &str) -> FaultSpecBuilder {
        FaultSpecBuilder::new(glob, FaultKind::WriteFailure)
    }

    #[must_use]
    pub fn partial_write(glob: &str) -> FaultSpecBuilder {
        FaultSpecBuilder::new(glob, FaultKind::PartialWrite { valid_bytes: 0 })
    }

    #[must_use]
    pub fn sync_failure(glob: &str) -> FaultSpecBuilder {
        FaultSpecBuilder::new(glob, FaultKind::SyncFailure)
    }

    fn matches_path(&self, path: &Path) -> bool {
        glob_matches(&self.pattern, &path.to_string_lossy())
    }

    fn spent(&self) -> bool {
        self.trigger_count >= self.max_triggers
    }

    /// Count one matching operation; `true` if the fault fires on it.
    fn register_match(&mut self) -> bool {
        if self.spent() {
            return false;
        }
        let seen = self.match_count;
        self.match_count += 1;
        if seen < self.after_count {
            return false;
        }
        self.trigger_count += 1;
        true
    }
}

/// Builder for [`FaultSpec`], started by `FaultSpec::write_failure(glob)` etc.
#[derive(Debug)]
pub struct FaultSpecBuilder {
    pattern: String,
    kind: FaultKind,
    after_count: u64,
    max_triggers: u32,
}

impl FaultSpecBuilder {
    fn new(glob: &str, kind: FaultKind) -> Self {
        Self {
            pattern: glob.to_owned(),
            kind,
            after_count: 0,
            max_triggers: 1,
        }
    }

    /// For partial writes: how many bytes land before the failure.
    #[must_use]
    pub fn valid_bytes(mut self, n: usize) -> Self {
        if let FaultKind::PartialWrite { valid_bytes } = &mut self.kind {
            *valid_bytes = n;
        }
        self
    }

    /// Let `n` matching operations through before triggering.
    #[must_use]
    pub fn after_count(mut self, n: u64) -> Self {
        self.after_count = n;
        self
    }

    /// How many times the fault may trigger (at least once).
    #[must_use]
    pub fn trigger_count(mut self, n: u32) -> Self {
        self.max_triggers = n.max(1);
        self
    }

    #[must_use]
    pub fn build(self) -> FaultSpec {
        FaultSpec {
            pattern: self.pattern,
            kind: self.kind,
            after_count: self.after_count,
            max_triggers: self.max_triggers,
            trigger_count: 0,
            match_count: 0,
        }
    }
}

// Shared state

/// Fault rules and trigger log shared by a VFS and all files it opened.
#[derive(Debug, Default)]
pub struct FaultState {
    faults: Mutex<Vec<FaultSpec>>,
    hits: Mutex<Vec<FaultHit>>,
}

impl FaultState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_fault(&self, spec: FaultSpec) {
        debug!(
            fault_kind = ?spec.kind,
            pattern = %spec.pattern,
            after_count = spec.after_count,
            max_triggers = spec.max_triggers,
            "fault spec registered"
        );
        self.faults.lock().push(spec);
    }

    /// Drop every registered fault. The trigger log is kept.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    #[must_use]
    pub fn fault_hits(&self) -> Vec<FaultHit> {
        self.hits.lock().clone()
    }

    /// First registered fault for `op` on `path` that fires now.
    fn check(&self, op: Operation, path: &Path, offset: Option<u64>) -> Option<FaultKind> {
        let fired = {
            let mut faults = self.faults.lock();
            faults.iter_mut().enumerate().find_map(|(idx, spec)| {
                let applies = spec.kind.operation() == op
                    && !spec.spent()
                    && spec.matches_path(path);
                (applies && spec.register_match()).then_some((idx, spec.kind))
            })
        };
        let (spec_index, kind) = fired?;
        debug!(spec_index, path = %path.display(), ?kind, ?offset, "fault injected");
        self.hits.lock().push(FaultHit {
            spec_index,
            path: path.to_path_buf(),
            kind,
            offset,
        });
        Some(kind)
    }
}

// FaultInjectingVfs

/// A VFS wrapper that injects deterministic faults into file I/O.
///
/// Clones share the inner VFS handle (when the inner VFS shares state on
/// clone, as [`arbor_vfs::MemoryVfs`] does) and the fault state.
#[derive(Debug)]
pub struct FaultInjectingVfs<V: Vfs> {
    inner: V,
    state: Arc<FaultState>,
}

impl<V: Vfs + Clone> Clone for FaultInjectingVfs<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: Vfs> FaultInjectingVfs<V> {
    #[must_use]
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState::new()),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &V {
        &self.inner
    }

    pub fn inject_fault(&self, spec: FaultSpec) {
        self.state.inject_fault(spec);
    }

    pub fn clear_faults(&self) {
        self.state.clear_faults();
    }

    #[must_use]
    pub fn fault_hits(&self) -> Vec<FaultHit> {
        self.state.fault_hits()
    }
}

impl<V: Vfs> Vfs for FaultInjectingVfs<V> {
    type File = FaultInjectingFile<V::File>;

    fn name(&self) -> &'static str {
        "fault-injecting"
    }

    fn open(
        &self,
        cx: &Cx,
        path: &Path,
        flags: VfsOpenFlags,
    ) -> Result<(Self::File, VfsOpenFlags)> {
        let (inner, out_flags) = self.inner.open(cx, path, flags)?;
        Ok((
            FaultInjectingFile {
                inner,
                state: Arc::clone(&self.state),
                path: path.to_path_buf(),
            },
            out_flags,
        ))
    }

    fn delete(&self, cx: &Cx, path: &Path) -> Result<()> {
        self.inner.delete(cx, path)
    }

    fn exists(&self, cx: &Cx, path: &Path) -> Result<bool> {
        self.inner.exists(cx, path)
    }

    fn create_dir_all(&self, cx: &Cx, path: &Path) -> Result<()> {
        self.inner.create_dir_all(cx, path)
    }

    fn list_dir(&self, cx: &Cx, path: &Path) -> Result<Vec<String>> {
        self.inner.list_dir(cx, path)
    }

    fn remove_dir_all(&self, cx: &Cx, path: &Path) -> Result<()> {
        self.inner.remove_dir_all(cx, path)
    }

    fn full_pathname(&self, cx: &Cx, path: &Path) -> Result<PathBuf> {
        self.inner.full_pathname(cx, path)
    }
}

// FaultInjectingFile

/// File handle that consults the shared [`FaultState`] before each read,
/// write, and sync.
#[derive(Debug)]
pub struct FaultInjectingFile<F: VfsFile> {
    inner: F,
    state: Arc<FaultState>,
    path: PathBuf,
}

impl<F: VfsFile> VfsFile for FaultInjectingFile<F> {
    fn close(&mut self, cx: &Cx) -> Result<()> {
        self.inner.close(cx)
    }

    fn read(&self, cx: &Cx, buf: &mut [u8], offset: u64) -> Result<usize> {
        match self.state.check(Operation::Read, &self.path, Some(offset)) {
            Some(_) => Err(ArborError::IoRead { offset }),
            None => self.inner.read(cx, buf, offset),
        }
    }

    fn write(&mut self, cx: &Cx, buf: &[u8], offset: u64) -> Result<()> {
        match self.state.check(Operation::Write, &self.path, Some(offset)) {
            None => self.inner.write(cx, buf, offset),
            Some(FaultKind::PartialWrite { valid_bytes }) => {
                let applied = valid_bytes.min(buf.len());
                if applied > 0 {
                    self.inner.write(cx, &buf[..applied], offset)?;
                }
                Err(ArborError::IoWrite { offset })
            }
            Some(_) => Err(ArborError::IoWrite { offset }),
        }
    }

    fn truncate(&mut self, cx: &Cx, size: u64) -> Result<()> {
        self.inner.truncate(cx, size)
    }

    fn sync(&mut self, cx: &Cx, flags: SyncFlags) -> Result<()> {
        match self.state.check(Operation::Sync, &self.path, None) {
            Some(_) => Err(ArborError::Io(std::io::Error::other(format!(
                "injected sync failure on {}",
                self.path.display()
            )))),
            None => self.inner.sync(cx, flags),
        }
    }

    fn file_size(&self, cx: &Cx) -> Result<u64> {
        self.inner.file_size(cx)
    }
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return path.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    path == pattern || path.ends_with(&format!("/{pattern}"))
}
