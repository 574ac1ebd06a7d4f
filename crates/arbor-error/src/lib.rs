use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for arbor operations.
///
/// Structured variants for the storage, revision, concurrency, and structural
/// failure categories, with recovery hints for user-facing errors.
#[derive(Error, Debug)]
pub enum ArborError {
    // === I/O Errors ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Disk I/O error while reading a page frame.
    #[error("disk I/O error reading page at offset {offset}")]
    IoRead { offset: u64 },

    /// Disk I/O error while writing a page frame.
    #[error("disk I/O error writing page at offset {offset}")]
    IoWrite { offset: u64 },

    /// Short read (fewer bytes than expected).
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Page file is corrupt (checksum mismatch, bad frame, bad header).
    #[error("page file is malformed: {detail}")]
    StorageCorrupt { detail: String },

    /// Cannot open file.
    #[error("unable to open resource file: '{path}'")]
    CannotOpen { path: PathBuf },

    // === Revision Errors ===
    /// The requested revision was never committed.
    #[error("revision {requested} not found (most recent is {latest})")]
    RevisionNotFound { requested: i64, latest: u32 },

    // === Transaction Errors ===
    /// A write transaction is already open on the resource.
    #[error("resource '{resource}' already has an open write transaction")]
    ConcurrentWrite { resource: String },

    /// The transaction was already committed, rolled back, or closed.
    #[error("transaction is closed")]
    TransactionClosed,

    /// Attempt to mutate through a read-only view.
    #[error("attempt to write through a read-only transaction")]
    ReadOnly,

    /// A cancellation request was observed at a checkpoint.
    #[error("operation interrupted")]
    Interrupted,

    // === Structural Errors ===
    /// An edit would violate tree well-formedness.
    #[error("structural integrity violation: {detail}")]
    StructuralIntegrity { detail: String },

    /// The referenced node does not exist in the transaction's view.
    #[error("no such node: {key}")]
    NodeNotFound { key: u64 },

    // === Resource / Database Errors ===
    /// No resource with that name exists in the database.
    #[error("no such resource: {name}")]
    ResourceNotFound { name: String },

    /// A resource with that name already exists.
    #[error("resource {name} already exists")]
    ResourceExists { name: String },

    /// Resource configuration is invalid.
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// A structural path expression could not be parsed.
    #[error("invalid path expression '{path}': {detail}")]
    InvalidPath { path: String, detail: String },

    // === Internal Errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),

    /// Operation is not supported by the current backend or configuration.
    #[error("unsupported operation")]
    Unsupported,
}

/// Named failure categories surfaced to outer layers.
///
/// Query and CLI layers map these onto their own diagnostics rather than
/// exposing a single generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Durable-storage failure; fatal for the in-flight transaction.
    Io,
    /// Requested revision does not exist.
    RevisionNotFound,
    /// A second writer was attempted.
    ConcurrentWrite,
    /// An edit would violate tree well-formedness; only that edit is rejected.
    StructuralIntegrity,
    /// API misuse (closed transaction, bad config, unknown resource, ...).
    Usage,
    /// Bug or unsupported path.
    Internal,
}

impl ArborError {
    /// Map this error onto its named failure category.
    #[allow(clippy::match_same_arms)]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_)
            | Self::IoRead { .. }
            | Self::IoWrite { .. }
            | Self::ShortRead { .. }
            | Self::StorageCorrupt { .. }
            | Self::CannotOpen { .. } => ErrorCategory::Io,
            Self::RevisionNotFound { .. } => ErrorCategory::RevisionNotFound,
            Self::ConcurrentWrite { .. } => ErrorCategory::ConcurrentWrite,
            Self::StructuralIntegrity { .. } | Self::NodeNotFound { .. } => {
                ErrorCategory::StructuralIntegrity
            }
            Self::TransactionClosed
            | Self::ReadOnly
            | Self::Interrupted
            | Self::ResourceNotFound { .. }
            | Self::ResourceExists { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidPath { .. } => ErrorCategory::Usage,
            Self::Internal(_) | Self::Unsupported => ErrorCategory::Internal,
        }
    }

    /// Whether the user can likely fix this without code changes.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RevisionNotFound { .. }
                | Self::ConcurrentWrite { .. }
                | Self::StructuralIntegrity { .. }
                | Self::NodeNotFound { .. }
                | Self::ResourceNotFound { .. }
                | Self::ResourceExists { .. }
                | Self::InvalidConfig { .. }
                | Self::InvalidPath { .. }
                | Self::CannotOpen { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::RevisionNotFound { .. } => {
                Some("Pick a revision between 0 and the most recent revision number")
            }
            Self::ConcurrentWrite { .. } => {
                Some("Wait for the open write transaction to commit or roll back, then retry")
            }
            Self::StructuralIntegrity { .. } => {
                Some("The edit was rejected; the transaction is still usable")
            }
            Self::StorageCorrupt { .. } => Some("Restore the resource from a backup"),
            Self::ResourceNotFound { .. } => Some("Create the resource before opening it"),
            _ => None,
        }
    }

    /// Whether this is a transient error that may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentWrite { .. })
    }

    /// Create a structural-integrity error.
    pub fn structural(detail: impl Into<String>) -> Self {
        Self::StructuralIntegrity {
            detail: detail.into(),
        }
    }

    /// Create a storage-corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::StorageCorrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }
}

/// Result type alias using `ArborError`.
pub type Result<T> = std::result::Result<T, ArborError>;
