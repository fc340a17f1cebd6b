//! On-disk layout of a RomFS image.
//!
//! All fields are little-endian. Records are followed by `name_len` bytes of
//! UTF-8 name with no terminator; the next record starts at the following
//! 4-byte boundary.

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, little_endian::*};

use crate::constants::{HEADER_SIZE, MAGIC};
use crate::error::{RomfsError, RomfsResult};

/// RomFS header (0x50 bytes) locating the four tables and the file data.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RomfsHeader {
    /// Magic value, `"WUHB"`.
    pub magic: [u8; 4],
    /// Size of this header (always 0x50).
    pub header_size: U32,
    /// Offset of the directory hash table.
    pub dir_hash_table_offset: U64,
    /// Size of the directory hash table.
    pub dir_hash_table_size: U64,
    /// Offset of the directory table.
    pub dir_table_offset: U64,
    /// Size of the directory table.
    pub dir_table_size: U64,
    /// Offset of the file hash table.
    pub file_hash_table_offset: U64,
    /// Size of the file hash table.
    pub file_hash_table_size: U64,
    /// Offset of the file table.
    pub file_table_offset: U64,
    /// Size of the file table.
    pub file_table_size: U64,
    /// Offset of the file data region.
    pub file_data_offset: U64,
}

const_assert_eq!(size_of::<RomfsHeader>(), HEADER_SIZE as usize);

impl RomfsHeader {
    /// Check magic and header size.
    pub fn validate(&self) -> RomfsResult<()> {
        if self.magic != MAGIC {
            return Err(RomfsError::invalid_image(format!("bad magic {:02x?}", self.magic)));
        }
        if self.header_size.get() != HEADER_SIZE {
            return Err(RomfsError::invalid_image(format!(
                "bad header size {:#x}, expected {:#x}",
                self.header_size.get(),
                HEADER_SIZE
            )));
        }
        Ok(())
    }
}

/// Directory record (0x18 bytes + name).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawDirEntry {
    /// Offset of the parent directory (self for root).
    pub parent: U32,
    /// Offset of the next directory with the same parent.
    pub sibling: U32,
    /// Offset of the first child directory.
    pub child_dir: U32,
    /// Offset of the first child file.
    pub child_file: U32,
    /// Next record in the same hash bucket.
    pub next_hash: U32,
    /// Name length in bytes.
    pub name_len: U32,
}

const_assert_eq!(size_of::<RawDirEntry>(), 0x18);

/// File record (0x20 bytes + name).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawFileEntry {
    /// Offset of the parent directory.
    pub parent: U32,
    /// Offset of the next file with the same parent.
    pub sibling: U32,
    /// Data offset, relative to the header's file data offset.
    pub data_offset: U64,
    /// Data length in bytes.
    pub data_size: U64,
    /// Next record in the same hash bucket.
    pub next_hash: U32,
    /// Name length in bytes.
    pub name_len: U32,
}

const_assert_eq!(size_of::<RawFileEntry>(), 0x20);

/// Fixed part of a directory record.
pub const DIR_ENTRY_SIZE: usize = size_of::<RawDirEntry>();

/// Fixed part of a file record.
pub const FILE_ENTRY_SIZE: usize = size_of::<RawFileEntry>();

/// Round `len` up to the next multiple of four.
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn test_header_validate() {
        let mut header = RomfsHeader::new_zeroed();
        header.magic = MAGIC;
        header.header_size = U32::new(HEADER_SIZE);
        assert!(header.validate().is_ok());

        header.magic = *b"NCCH";
        assert!(matches!(header.validate(), Err(RomfsError::InvalidImage(_))));

        header.magic = MAGIC;
        header.header_size = U32::new(0x28);
        let err = header.validate().unwrap_err();
        assert!(matches!(err, RomfsError::InvalidImage(ref msg) if msg.contains("0x28")));
    }

    #[test]
    fn test_header_field_offsets() {
        let mut header = RomfsHeader::new_zeroed();
        header.file_data_offset = U64::new(0x1122_3344_5566_7788);
        let bytes = header.as_bytes();
        assert_eq!(&bytes[0x48..0x50], &0x1122_3344_5566_7788u64.to_le_bytes());
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
    }
}
