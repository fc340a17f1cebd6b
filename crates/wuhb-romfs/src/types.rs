//! Metadata and handle-facing types.
//!
//! Nothing here is stored in the image: inode numbers, link counts and
//! timestamps are synthesized from table offsets and the mount time.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::constants::{BLOCK_SIZE, READ_ALL, S_IFDIR, S_IFREG};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// POSIX mode bits: type plus read for owner, group and other.
    pub fn mode(&self) -> u32 {
        match self {
            FileType::File => S_IFREG | READ_ALL,
            FileType::Directory => S_IFDIR | READ_ALL,
        }
    }
}

/// POSIX-like metadata for a directory or file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Synthesized inode number.
    pub ino: u64,
    /// File type.
    pub kind: FileType,
    /// POSIX mode bits (type and permissions).
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u32,
    /// Size in bytes.
    pub size: u64,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// Number of blocks.
    pub blocks: u64,
    /// Last access time (mount time).
    pub atime: SystemTime,
    /// Last modification time (mount time).
    pub mtime: SystemTime,
    /// Status change time (mount time).
    pub ctime: SystemTime,
}

impl Metadata {
    /// Metadata with every timestamp set to `time`.
    pub fn new(kind: FileType, ino: u64, nlink: u32, size: u64, time: SystemTime) -> Self {
        Self {
            ino,
            kind,
            mode: kind.mode(),
            nlink,
            size,
            blksize: BLOCK_SIZE,
            blocks: u64::from(BLOCK_SIZE).div_ceil(512),
            atime: time,
            mtime: time,
            ctime: time,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory entry produced by iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry metadata.
    pub metadata: Metadata,
}

impl DirEntry {
    /// Entry type.
    pub fn kind(&self) -> FileType {
        self.metadata.kind
    }
}

/// Absolute byte range of a file's data within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Absolute image offset of the first data byte.
    pub offset: u64,
    /// Data length in bytes.
    pub length: u64,
}

/// Flags for [`MountTable::open_file`](crate::MountTable::open_file).
///
/// Images are read-only; these exist so callers can pass through the flags
/// a host hands them and get the matching error. The default opens for
/// reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if missing.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// With `create`, fail if the file exists.
    pub exclusive: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access.
    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// Exclusive create without write access.
    pub fn create_exclusive() -> Self {
        Self {
            create: true,
            exclusive: true,
            ..Self::default()
        }
    }

    /// Returns true if any flag asks for modification.
    pub fn wants_write(&self) -> bool {
        self.write || self.append || self.truncate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert_eq!(FileType::Directory.to_string(), "directory");
    }

    #[test]
    fn test_modes() {
        assert_eq!(FileType::Directory.mode(), 0o040444);
        assert_eq!(FileType::File.mode(), 0o100444);
    }

    #[test]
    fn test_metadata_constructor() {
        let now = SystemTime::UNIX_EPOCH;
        let meta = Metadata::new(FileType::File, 12, 1, 16, now);
        assert!(meta.is_file());
        assert_eq!(meta.blksize, 512);
        assert_eq!(meta.blocks, 1);
        assert_eq!(meta.atime, now);
        assert_eq!(meta.ctime, now);
    }

    #[test]
    fn test_open_flags() {
        assert!(!OpenFlags::read().wants_write());
        assert!(OpenFlags::write().wants_write());

        // Creating alone is not a write; the open itself decides the error.
        let create = OpenFlags::create_exclusive();
        assert!(create.create && create.exclusive);
        assert!(!create.wants_write());

        let append = OpenFlags {
            append: true,
            ..OpenFlags::read()
        };
        assert!(append.wants_write());
    }
}
