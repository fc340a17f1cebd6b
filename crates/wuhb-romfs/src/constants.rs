//! RomFS format and registry constants.
//!
//! Centralizes fixed values of the on-disk layout and the mount registry.

/// Header magic.
pub const MAGIC: [u8; 4] = *b"WUHB";

/// Size of the fixed header, and the value its `header_size` field must hold.
pub const HEADER_SIZE: u32 = 0x50;

/// Reserved "none" offset marking end-of-chain.
pub const SENTINEL: u32 = u32::MAX;

/// Offset of the root directory within the directory table.
pub const ROOT_OFFSET: u32 = 0;

/// Seed XORed into the parent offset before hashing a name.
pub const HASH_SEED: u32 = 123_456_789;

/// Longest path component the resolver accepts, in bytes.
pub const COMPONENT_MAX: usize = 255;

/// Largest single read issued while loading a table.
pub const READ_CHUNK: usize = 64 * 1024;

/// Default output name buffer size for directory iteration.
pub const NAME_MAX: usize = 255;

/// Number of mount slots in a default [`MountTable`](crate::MountTable).
pub const MAX_MOUNTS: usize = 32;

/// Longest mount name kept on registration, in bytes.
pub const MOUNT_NAME_MAX: usize = 31;

/// Block size reported in metadata.
pub const BLOCK_SIZE: u32 = 512;

/// File type bits for a directory.
pub const S_IFDIR: u32 = 0o040000;

/// File type bits for a regular file.
pub const S_IFREG: u32 = 0o100000;

/// Read permission for owner, group and other.
pub const READ_ALL: u32 = 0o444;

/// Alignment of file data written by the image builder.
pub const DATA_ALIGN: u64 = 0x10;
