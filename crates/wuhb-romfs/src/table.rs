//! Loaded tables and bounds-checked record access.
//!
//! Every "pointer" in the image is a byte offset into one of the four tables.
//! Offsets are validated here before any record bytes are interpreted; an
//! offset that would reach past its table is a [`RomfsError::Fault`].

use std::fmt;

use zerocopy::FromBytes;

use crate::constants::{HEADER_SIZE, READ_CHUNK};
use crate::error::{RomfsError, RomfsResult, TableKind};
use crate::format::{DIR_ENTRY_SIZE, FILE_ENTRY_SIZE, RawDirEntry, RawFileEntry, RomfsHeader};
use crate::source::ByteSource;

/// A directory record borrowed from the directory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirRecord<'a> {
    /// Offset of this record in the directory table.
    pub offset: u32,
    /// Offset of the parent directory; the root points at itself.
    pub parent: u32,
    /// Next directory under the same parent, or the sentinel.
    pub sibling: u32,
    /// First child directory, or the sentinel.
    pub child_dir: u32,
    /// First child file, or the sentinel.
    pub child_file: u32,
    /// Next directory in the same hash bucket, or the sentinel.
    pub next_hash: u32,
    /// Raw name bytes; empty for the root.
    pub name: &'a [u8],
}

/// A file record borrowed from the file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord<'a> {
    /// Offset of this record in the file table.
    pub offset: u32,
    /// Offset of the containing directory.
    pub parent: u32,
    /// Next file in the same directory, or the sentinel.
    pub sibling: u32,
    /// Data offset relative to the file data region.
    pub data_offset: u64,
    /// Data length in bytes.
    pub data_size: u64,
    /// Next file in the same hash bucket, or the sentinel.
    pub next_hash: u32,
    /// Raw name bytes.
    pub name: &'a [u8],
}

/// Header plus the four index tables, read fully into memory.
pub struct TableStore {
    header: RomfsHeader,
    dir_hash: Vec<u8>,
    dirs: Vec<u8>,
    file_hash: Vec<u8>,
    files: Vec<u8>,
}

impl fmt::Debug for TableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStore")
            .field("dir_hash", &self.dir_hash.len())
            .field("dirs", &self.dirs.len())
            .field("file_hash", &self.file_hash.len())
            .field("files", &self.files.len())
            .finish()
    }
}

impl TableStore {
    /// Read and validate the header, then load all four tables.
    ///
    /// Nothing is allocated until the header has been validated. On failure
    /// every table read so far is dropped.
    pub fn load(source: &mut dyn ByteSource) -> RomfsResult<Self> {
        let mut raw = [0u8; HEADER_SIZE as usize];
        source.read_exact_at(0, &mut raw)?;
        let header = RomfsHeader::read_from_bytes(&raw)
            .map_err(|_| RomfsError::invalid_image("truncated header"))?;
        header.validate()?;

        let dir_hash = read_table(
            source,
            header.dir_hash_table_offset.get(),
            header.dir_hash_table_size.get(),
        )?;
        let dirs = read_table(
            source,
            header.dir_table_offset.get(),
            header.dir_table_size.get(),
        )?;
        let file_hash = read_table(
            source,
            header.file_hash_table_offset.get(),
            header.file_hash_table_size.get(),
        )?;
        let files = read_table(
            source,
            header.file_table_offset.get(),
            header.file_table_size.get(),
        )?;

        tracing::debug!(
            dir_buckets = dir_hash.len() / 4,
            dir_table = dirs.len(),
            file_buckets = file_hash.len() / 4,
            file_table = files.len(),
            "loaded romfs tables"
        );

        Ok(Self {
            header,
            dir_hash,
            dirs,
            file_hash,
            files,
        })
    }

    /// Directory table size in bytes.
    pub fn dir_table_size(&self) -> u64 {
        self.dirs.len() as u64
    }

    /// Absolute image offset of the file data region.
    pub fn file_data_offset(&self) -> u64 {
        self.header.file_data_offset.get()
    }

    /// Number of slots in the directory hash table.
    pub fn dir_bucket_count(&self) -> u64 {
        (self.dir_hash.len() / 4) as u64
    }

    /// Number of slots in the file hash table.
    pub fn file_bucket_count(&self) -> u64 {
        (self.file_hash.len() / 4) as u64
    }

    /// Head of the directory hash chain in slot `idx`.
    pub fn dir_bucket(&self, idx: u64) -> RomfsResult<u32> {
        read_bucket(&self.dir_hash, idx, TableKind::DirHash)
    }

    /// Head of the file hash chain in slot `idx`.
    pub fn file_bucket(&self, idx: u64) -> RomfsResult<u32> {
        read_bucket(&self.file_hash, idx, TableKind::FileHash)
    }

    /// Upper bound on the number of directory records; longer chains cycle.
    pub fn max_dir_records(&self) -> usize {
        self.dirs.len() / DIR_ENTRY_SIZE + 1
    }

    /// Upper bound on the number of file records; longer chains cycle.
    pub fn max_file_records(&self) -> usize {
        self.files.len() / FILE_ENTRY_SIZE + 1
    }

    /// The directory record at `offset`.
    pub fn dir_at(&self, offset: u32) -> RomfsResult<DirRecord<'_>> {
        let (raw, name) = record::<RawDirEntry>(&self.dirs, offset, TableKind::Dir, |r| {
            r.name_len.get()
        })?;
        Ok(DirRecord {
            offset,
            parent: raw.parent.get(),
            sibling: raw.sibling.get(),
            child_dir: raw.child_dir.get(),
            child_file: raw.child_file.get(),
            next_hash: raw.next_hash.get(),
            name,
        })
    }

    /// The file record at `offset`.
    pub fn file_at(&self, offset: u32) -> RomfsResult<FileRecord<'_>> {
        let (raw, name) = record::<RawFileEntry>(&self.files, offset, TableKind::File, |r| {
            r.name_len.get()
        })?;
        Ok(FileRecord {
            offset,
            parent: raw.parent.get(),
            sibling: raw.sibling.get(),
            data_offset: raw.data_offset.get(),
            data_size: raw.data_size.get(),
            next_hash: raw.next_hash.get(),
            name,
        })
    }
}

/// Fill one table, growing the buffer `READ_CHUNK` bytes at a time.
///
/// Memory is only committed as bytes arrive, so a header claiming more than
/// the source holds fails with `Io` after at most one extra chunk. Sizes no
/// allocation could hold, and allocation failures, are `OutOfMemory`.
fn read_table(source: &mut dyn ByteSource, offset: u64, size: u64) -> RomfsResult<Vec<u8>> {
    let len = usize::try_from(size)
        .ok()
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or(RomfsError::OutOfMemory(size))?;

    let mut buf = Vec::new();
    let mut chunk = vec![0u8; len.min(READ_CHUNK)];
    while buf.len() < len {
        let want = (len - buf.len()).min(READ_CHUNK);
        let at = offset
            .checked_add(buf.len() as u64)
            .ok_or_else(|| RomfsError::invalid_image(format!("table at {offset:#x} overflows")))?;
        source.read_exact_at(at, &mut chunk[..want])?;
        buf.try_reserve(want)
            .map_err(|_| RomfsError::OutOfMemory(size))?;
        buf.extend_from_slice(&chunk[..want]);
    }
    Ok(buf)
}

fn read_bucket(table: &[u8], idx: u64, kind: TableKind) -> RomfsResult<u32> {
    let start = usize::try_from(idx)
        .ok()
        .and_then(|i| i.checked_mul(4))
        .ok_or_else(|| RomfsError::fault(kind, idx))?;
    let bytes = start
        .checked_add(4)
        .and_then(|end| table.get(start..end))
        .ok_or_else(|| RomfsError::fault(kind, idx))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Bounds-check and decode one record: `offset + size_of::<T>() + name_len`
/// must lie within `table`.
fn record<T: FromBytes>(
    table: &[u8],
    offset: u32,
    kind: TableKind,
    name_len: impl Fn(&T) -> u32,
) -> RomfsResult<(T, &[u8])> {
    let fault = || RomfsError::fault(kind, offset);
    let start = offset as usize;
    let tail = table.get(start..).ok_or_else(fault)?;
    let (raw, rest) = T::read_from_prefix(tail).map_err(|_| fault())?;
    let len = name_len(&raw) as usize;
    let name = rest.get(..len).ok_or_else(fault)?;
    Ok((raw, name))
}
