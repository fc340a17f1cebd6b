//! A loaded RomFS image.
//!
//! [`RomfsImage`] owns the tables, the byte source for file data, and the
//! mount's current directory. It answers stat/chdir/open queries and
//! synthesizes POSIX-like metadata from table offsets.

use std::fmt;
use std::time::SystemTime;

use crate::constants::{ROOT_OFFSET, SENTINEL};
use crate::dir::DirectoryIterator;
use crate::error::{RomfsError, RomfsResult, TableKind};
use crate::format::{DIR_ENTRY_SIZE, align4};
use crate::hash::{lookup_dir, lookup_file};
use crate::path::{ResolveMode, Resolved, resolve};
use crate::source::{ByteSource, MemorySource};
use crate::table::{DirRecord, FileRecord, TableStore};
use crate::types::{FileInfo, FileType, Metadata};

/// One mounted image.
pub struct RomfsImage {
    store: TableStore,
    source: Box<dyn ByteSource>,
    cwd: u32,
    loaded_at: SystemTime,
}

impl fmt::Debug for RomfsImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RomfsImage")
            .field("store", &self.store)
            .field("source", &self.source.describe())
            .field("cwd", &self.cwd)
            .finish()
    }
}

impl RomfsImage {
    /// Read the header and all four tables from `source`.
    ///
    /// The current directory starts at the root.
    pub fn load(mut source: Box<dyn ByteSource>) -> RomfsResult<Self> {
        let loaded_at = SystemTime::now();
        let store = TableStore::load(source.as_mut())?;
        Ok(Self {
            store,
            source,
            cwd: ROOT_OFFSET,
            loaded_at,
        })
    }

    /// Load an image held in memory.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> RomfsResult<Self> {
        Self::load(Box::new(MemorySource::new(data)))
    }

    /// The loaded tables.
    pub fn store(&self) -> &TableStore {
        &self.store
    }

    /// Description of the backing source.
    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Time the image was loaded; used for every timestamp.
    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Directory table offset of the current directory.
    pub fn cwd(&self) -> u32 {
        self.cwd
    }

    /// The root directory record.
    pub fn root(&self) -> RomfsResult<DirRecord<'_>> {
        self.store.dir_at(ROOT_OFFSET)
    }

    /// Resolve `path` from the root or the current directory.
    pub fn resolve<'p>(&self, path: &'p str, mode: ResolveMode) -> RomfsResult<Resolved<'p>> {
        resolve(&self.store, self.cwd, path, mode)
    }

    // ========================================================================
    // Metadata synthesis
    // ========================================================================

    /// Inode of a directory: its offset in 32-bit words.
    pub fn dir_inode(&self, offset: u32) -> u64 {
        u64::from(offset / 4)
    }

    /// Inode of a file: its offset in words, after all directory inodes.
    pub fn file_inode(&self, offset: u32) -> u64 {
        u64::from(offset / 4) + self.store.dir_table_size() / 4
    }

    /// Link count: self, parent, and one per direct child of either kind.
    ///
    /// A broken sibling chain ends the count early.
    pub fn dir_nlink(&self, dir: &DirRecord<'_>) -> u32 {
        let mut count = 2u32;

        let mut offset = dir.child_dir;
        let mut steps = 0;
        while offset != SENTINEL && steps < self.store.max_dir_records() {
            let Ok(child) = self.store.dir_at(offset) else {
                tracing::warn!(dir = dir.offset, offset, "broken child directory chain");
                break;
            };
            count = count.saturating_add(1);
            offset = child.sibling;
            steps += 1;
        }

        let mut offset = dir.child_file;
        let mut steps = 0;
        while offset != SENTINEL && steps < self.store.max_file_records() {
            let Ok(child) = self.store.file_at(offset) else {
                tracing::warn!(dir = dir.offset, offset, "broken child file chain");
                break;
            };
            count = count.saturating_add(1);
            offset = child.sibling;
            steps += 1;
        }

        count
    }

    /// Metadata for a directory record.
    pub fn dir_metadata(&self, dir: &DirRecord<'_>) -> Metadata {
        let size = (DIR_ENTRY_SIZE + align4(dir.name.len())) as u64;
        Metadata::new(
            FileType::Directory,
            self.dir_inode(dir.offset),
            self.dir_nlink(dir),
            size,
            self.loaded_at,
        )
    }

    /// Metadata for a file record.
    pub fn file_metadata(&self, file: &FileRecord<'_>) -> Metadata {
        Metadata::new(
            FileType::File,
            self.file_inode(file.offset),
            1,
            file.data_size,
            self.loaded_at,
        )
    }

    // ========================================================================
    // Path operations
    // ========================================================================

    /// Metadata for the directory or file at `path`.
    ///
    /// The final component is tried as a directory first, then as a file.
    pub fn stat(&self, path: &str) -> RomfsResult<Metadata> {
        let Resolved { dir, leaf } = self.resolve(path, ResolveMode::LeafDeferred)?;
        let parent = self.store.dir_at(dir)?;
        match leaf {
            "" | "." => return Ok(self.dir_metadata(&parent)),
            ".." => return Ok(self.dir_metadata(&self.store.dir_at(parent.parent)?)),
            _ => {}
        }

        match lookup_dir(&self.store, dir, leaf.as_bytes()) {
            Ok(child) => return Ok(self.dir_metadata(&child)),
            Err(RomfsError::NotFound(_)) => {}
            Err(e) => return Err(self.note_fault(e)),
        }
        match lookup_file(&self.store, dir, leaf.as_bytes()) {
            Ok(file) => Ok(self.file_metadata(&file)),
            Err(RomfsError::NotFound(_)) => Err(RomfsError::not_found(path)),
            Err(e) => Err(self.note_fault(e)),
        }
    }

    /// Make `path` the current directory.
    pub fn chdir(&mut self, path: &str) -> RomfsResult<()> {
        let Resolved { dir, .. } = self.resolve(path, ResolveMode::Directory)?;
        tracing::debug!(path, dir, "changed directory");
        self.cwd = dir;
        Ok(())
    }

    /// Start iterating the directory at `path`.
    pub fn open_dir(&self, path: &str) -> RomfsResult<DirectoryIterator> {
        let Resolved { dir, .. } = self.resolve(path, ResolveMode::Directory)?;
        Ok(DirectoryIterator::new(&self.store.dir_at(dir)?))
    }

    /// The file record at `path`.
    ///
    /// A path that ends at a directory, or whose leaf names a directory,
    /// fails with `IsADirectory`.
    pub fn find_file(&self, path: &str) -> RomfsResult<FileRecord<'_>> {
        let Resolved { dir, leaf } = self.resolve(path, ResolveMode::LeafDeferred)?;
        if matches!(leaf, "" | "." | "..") {
            return Err(RomfsError::is_a_directory(path));
        }
        match lookup_file(&self.store, dir, leaf.as_bytes()) {
            Ok(file) => Ok(file),
            Err(RomfsError::NotFound(_)) => {
                if lookup_dir(&self.store, dir, leaf.as_bytes()).is_ok() {
                    Err(RomfsError::is_a_directory(path))
                } else {
                    Err(RomfsError::not_found(path))
                }
            }
            Err(e) => Err(self.note_fault(e)),
        }
    }

    /// Absolute byte range of the file at `path`.
    pub fn file_info(&self, path: &str) -> RomfsResult<FileInfo> {
        let file = self.find_file(path)?;
        Ok(FileInfo {
            offset: self.data_start(&file)?,
            length: file.data_size,
        })
    }

    /// Absolute image offset of a file's first data byte.
    pub fn data_start(&self, file: &FileRecord<'_>) -> RomfsResult<u64> {
        self.store
            .file_data_offset()
            .checked_add(file.data_offset)
            .ok_or_else(|| RomfsError::fault(TableKind::File, file.offset))
    }

    /// Fill `buf` from the image at absolute offset `offset`.
    pub fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> RomfsResult<()> {
        self.source.read_exact_at(offset, buf)?;
        Ok(())
    }

    fn note_fault(&self, e: RomfsError) -> RomfsError {
        if e.is_corruption() {
            tracing::warn!(source = %self.source.describe(), error = %e, "corrupt image");
        }
        e
    }
}
