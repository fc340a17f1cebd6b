//! Read-only RomFS image parser and mount table.
//!
//! Images carry a flat directory table and file table, each indexed by a
//! hash table keyed on (parent offset, case-folded name). Key components:
//!
//! - [`MountTable`] - Named registry of loaded images and the handle API
//! - [`RomfsImage`] - One loaded image: tables, byte source, current directory
//! - [`DirectoryIterator`] - `.`, `..`, child directories, then child files
//! - [`ByteSource`] - Where image bytes come from ([`FileSource`], [`MemorySource`])
//! - [`ImageBuilder`] - Produces images in the same layout
//!
//! ## Design Decisions
//!
//! - **Offsets, not pointers**: tables are owned buffers and every link is a
//!   byte offset checked by an accessor before use. A bad offset is a
//!   [`RomfsError::Fault`], never a panic.
//! - **One lock**: the mount table serializes every operation, including
//!   backend reads.
//! - **Two-phase resolution**: paths resolve to a parent directory plus an
//!   unresolved leaf so one resolver serves both file and directory lookups.

pub mod builder;
mod config;
pub mod constants;
mod dir;
mod error;
pub mod format;
pub mod hash;
mod image;
mod mount;
pub mod path;
mod source;
pub mod table;
mod types;

pub use builder::ImageBuilder;
pub use config::{ConfigError, MountSpec, RomfsConfig};
pub use dir::DirectoryIterator;
pub use error::{RomfsError, RomfsResult, TableKind};
pub use image::RomfsImage;
pub use mount::{DirHandle, FileHandle, MountId, MountInfo, MountTable};
pub use source::{ByteSource, FileSource, MemorySource};
pub use types::{DirEntry, FileInfo, FileType, Metadata, OpenFlags};
