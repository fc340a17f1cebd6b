//! RomFS error types.

use std::io;
use thiserror::Error;

/// Which record table an offset was meant to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TableKind {
    /// Directory hash table.
    DirHash,
    /// Directory record table.
    Dir,
    /// File hash table.
    FileHash,
    /// File record table.
    File,
}

/// RomFS error type.
#[derive(Debug, Error)]
pub enum RomfsError {
    /// Bad magic or header size; the image cannot be mounted.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A table could not be allocated.
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(u64),

    /// Backend read error or short read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Path component absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Empty path or empty path component.
    #[error("illegal path sequence: {0:?}")]
    IllegalSequence(String),

    /// Component or output name exceeds the limit.
    #[error("file name too long")]
    NameTooLong,

    /// Corrupt offset or chain in the image.
    #[error("corrupt {table} offset {offset:#x}")]
    Fault { table: TableKind, offset: u64 },

    /// Filesystem is read-only.
    #[error("filesystem is read-only")]
    ReadOnly,

    /// Exclusive create on an existing file.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Seek to a negative position.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Seek past the largest representable offset.
    #[error("value too large for defined data type")]
    Overflow,

    /// No mount registered under this name.
    #[error("no such mount: {0}")]
    NoSuchMount(String),

    /// Every mount slot is occupied.
    #[error("mount table full ({0} slots)")]
    MountTableFull(usize),

    /// Handle refers to a mount that has since been unmounted.
    #[error("stale handle")]
    StaleHandle,
}

impl RomfsError {
    /// Create an InvalidImage error.
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an IllegalSequence error.
    pub fn illegal_sequence(path: impl Into<String>) -> Self {
        Self::IllegalSequence(path.into())
    }

    /// Create a Fault error.
    pub fn fault(table: TableKind, offset: impl Into<u64>) -> Self {
        Self::Fault {
            table,
            offset: offset.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns true for errors that indicate a malformed image.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Fault { .. } | Self::InvalidImage(_))
    }
}

/// Convert RomfsError to std::io::Error for host glue.
impl From<RomfsError> for io::Error {
    fn from(e: RomfsError) -> Self {
        match e {
            RomfsError::InvalidImage(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            RomfsError::OutOfMemory(_) => io::Error::from(io::ErrorKind::OutOfMemory),
            RomfsError::Io(e) => e,
            RomfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            RomfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            RomfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            RomfsError::IllegalSequence(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            RomfsError::NameTooLong => {
                io::Error::new(io::ErrorKind::InvalidInput, "file name too long")
            }
            e @ RomfsError::Fault { .. } => io::Error::new(io::ErrorKind::InvalidData, e),
            RomfsError::ReadOnly => {
                io::Error::new(io::ErrorKind::ReadOnlyFilesystem, "filesystem is read-only")
            }
            RomfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            RomfsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            RomfsError::Overflow => io::Error::new(
                io::ErrorKind::InvalidInput,
                "value too large for defined data type",
            ),
            RomfsError::NoSuchMount(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            e @ RomfsError::MountTableFull(_) => io::Error::other(e),
            e @ RomfsError::StaleHandle => io::Error::other(e),
        }
    }
}

/// RomFS result type.
pub type RomfsResult<T> = Result<T, RomfsError>;
