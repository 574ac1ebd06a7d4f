//! Bit flags passed across the VFS boundary.

bitflags::bitflags! {
    /// Flags for opening a file through the VFS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VfsOpenFlags: u32 {
        /// Open for reading only.
        const READONLY = 0x0000_0001;
        /// Open for reading and writing.
        const READWRITE = 0x0000_0002;
        /// Create the file if it does not exist.
        const CREATE = 0x0000_0004;
        /// Fail if the file already exists (only with `CREATE`).
        const EXCLUSIVE = 0x0000_0010;
        /// Remove the file when the last handle is closed.
        const DELETEONCLOSE = 0x0000_0008;

        /// The append-only page file of a resource.
        const PAGE_FILE = 0x0000_0100;
        /// A sidecar file (configuration, catalog export).
        const SIDECAR = 0x0000_0200;
    }
}

bitflags::bitflags! {
    /// Flags for syncing a VFS file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncFlags: u8 {
        /// Flush file content and metadata.
        const FULL = 0x01;
        /// Flush file content only.
        const DATAONLY = 0x02;
    }
}

impl VfsOpenFlags {
    /// Default flags for opening a page file for a writer.
    #[must_use]
    pub const fn page_file_rw() -> Self {
        Self::READWRITE.union(Self::CREATE).union(Self::PAGE_FILE)
    }

    #[must_use]
    pub const fn is_readonly(self) -> bool {
        self.contains(Self::READONLY) && !self.contains(Self::READWRITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_rw_has_create_and_readwrite() {
        let flags = VfsOpenFlags::page_file_rw();
        assert!(flags.contains(VfsOpenFlags::CREATE));
        assert!(flags.contains(VfsOpenFlags::READWRITE));
        assert!(!flags.is_readonly());
        assert!((VfsOpenFlags::READONLY | VfsOpenFlags::PAGE_FILE).is_readonly());
    }
}
