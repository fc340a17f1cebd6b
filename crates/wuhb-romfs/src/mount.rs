//! Mount registry and the handle API.
//!
//! A fixed number of slots, each free or holding one loaded image under a
//! name. One lock guards the slots and every image's mutable state (current
//! directory), so all operations are serialized. Byte-source reads happen
//! while the lock is held; a slow backend shows up as lock hold time.

use std::io::SeekFrom;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;

use crate::constants::{MAX_MOUNTS, MOUNT_NAME_MAX};
use crate::dir::DirectoryIterator;
use crate::error::{RomfsError, RomfsResult, TableKind};
use crate::image::RomfsImage;
use crate::source::{ByteSource, FileSource};
use crate::types::{DirEntry, FileInfo, Metadata, OpenFlags};

/// Identifies one mount for as long as it stays mounted.
///
/// The generation changes on every mount, so an id that outlives its mount
/// fails with `StaleHandle` instead of reaching a later occupant of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MountId {
    slot: usize,
    generation: u64,
}

impl MountId {
    /// Slot index in the table.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// Information about a mounted image.
#[derive(Debug, Clone, Serialize)]
pub struct MountInfo {
    /// Mount name.
    pub name: String,
    /// Handle for the mount.
    pub id: MountId,
    /// Description of the backing source.
    pub source: String,
    /// Number of directory hash buckets.
    pub dir_buckets: u64,
    /// Number of file hash buckets.
    pub file_buckets: u64,
    /// Directory table size in bytes.
    pub dir_table_size: u64,
    /// Absolute offset of the file data region.
    pub file_data_offset: u64,
}

/// An open file: position and cached location of the data.
#[derive(Debug, Clone)]
pub struct FileHandle {
    mount: MountId,
    record: u32,
    data_start: u64,
    size: u64,
    pos: u64,
}

impl FileHandle {
    /// Mount this handle belongs to.
    pub fn mount(&self) -> MountId {
        self.mount
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current position.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

/// An open directory iteration.
#[derive(Debug, Clone)]
pub struct DirHandle {
    mount: MountId,
    iter: DirectoryIterator,
}

impl DirHandle {
    /// Mount this handle belongs to.
    pub fn mount(&self) -> MountId {
        self.mount
    }

    /// Set the output name buffer size used by [`MountTable::next_entry`].
    pub fn with_name_max(mut self, name_max: usize) -> Self {
        self.iter = self.iter.with_name_max(name_max);
        self
    }
}

struct Slot {
    name: String,
    generation: u64,
    image: RomfsImage,
}

struct Registry {
    slots: Vec<Option<Slot>>,
    next_generation: u64,
}

impl Registry {
    /// Index of the first occupied slot named exactly `name`.
    fn position(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.name == name))
    }
}

/// Fixed-size registry of mounted images.
pub struct MountTable {
    inner: Mutex<Registry>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("slots", &"<locked>")
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    /// Create a table with the default number of slots.
    pub fn new() -> Self {
        Self::with_capacity(MAX_MOUNTS)
    }

    /// Create a table with `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Registry {
                slots: (0..capacity).map(|_| None).collect(),
                next_generation: 1,
            }),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load an image from `source` and register it under `name`.
    ///
    /// Names longer than the limit are truncated. A name already in use is
    /// not rejected; lookups find the earliest slot holding it. On failure
    /// the slot stays free and everything loaded so far is dropped.
    pub fn mount(&self, name: &str, source: impl ByteSource + 'static) -> RomfsResult<MountId> {
        let name = truncate_name(name);
        let mut registry = self.inner.lock();
        let Some(slot) = registry.slots.iter().position(Option::is_none) else {
            tracing::warn!(name, "no free mount slot");
            return Err(RomfsError::MountTableFull(registry.slots.len()));
        };

        let description = source.describe();
        let image = match RomfsImage::load(Box::new(source)) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(name, source = %description, error = %e, "mount failed");
                return Err(e);
            }
        };

        let generation = registry.next_generation;
        registry.next_generation += 1;
        registry.slots[slot] = Some(Slot {
            name: name.to_string(),
            generation,
            image,
        });
        tracing::info!(name, slot, source = %description, "mounted romfs");
        Ok(MountId { slot, generation })
    }

    /// Mount the image stored in the host file at `path`, starting `offset`
    /// bytes in.
    pub fn mount_file(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        offset: u64,
    ) -> RomfsResult<MountId> {
        let source = FileSource::open_at(path, offset)?;
        self.mount(name, source)
    }

    /// Remove the mount named `name`, releasing its tables and source.
    pub fn unmount(&self, name: &str) -> RomfsResult<()> {
        let mut registry = self.inner.lock();
        let idx = registry
            .position(name)
            .ok_or_else(|| RomfsError::NoSuchMount(name.to_string()))?;
        if let Some(old) = registry.slots[idx].take() {
            tracing::info!(name, source = %old.image.source_description(), "unmounted romfs");
        }
        Ok(())
    }

    /// Remove every mount. Handles into them become stale.
    pub fn unmount_all(&self) {
        let mut registry = self.inner.lock();
        for slot in registry.slots.iter_mut() {
            if let Some(old) = slot.take() {
                tracing::info!(name = %old.name, "unmounted romfs");
            }
        }
    }

    /// Handle of the first mount named exactly `name`.
    pub fn find(&self, name: &str) -> Option<MountId> {
        let registry = self.inner.lock();
        let slot = registry.position(name)?;
        registry.slots[slot].as_ref().map(|s| MountId {
            slot,
            generation: s.generation,
        })
    }

    /// All current mounts in slot order.
    pub fn mounts(&self) -> Vec<MountInfo> {
        let registry = self.inner.lock();
        registry
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| {
                let s = s.as_ref()?;
                let store = s.image.store();
                Some(MountInfo {
                    name: s.name.clone(),
                    id: MountId {
                        slot,
                        generation: s.generation,
                    },
                    source: s.image.source_description(),
                    dir_buckets: store.dir_bucket_count(),
                    file_buckets: store.file_bucket_count(),
                    dir_table_size: store.dir_table_size(),
                    file_data_offset: store.file_data_offset(),
                })
            })
            .collect()
    }

    // ========================================================================
    // Path operations
    // ========================================================================

    /// Metadata for the entry at `path`.
    pub fn stat(&self, mount: MountId, path: &str) -> RomfsResult<Metadata> {
        self.with(mount, |image| image.stat(path))
    }

    /// Same as [`stat`](Self::stat); images hold no symlinks.
    pub fn lstat(&self, mount: MountId, path: &str) -> RomfsResult<Metadata> {
        self.stat(mount, path)
    }

    /// Change the mount's current directory.
    pub fn chdir(&self, mount: MountId, path: &str) -> RomfsResult<()> {
        self.with(mount, |image| image.chdir(path))
    }

    /// Absolute byte range of a file, addressed by mount name.
    ///
    /// The name lookup and the query run under one lock acquisition.
    pub fn file_info(&self, mount_name: &str, path: &str) -> RomfsResult<FileInfo> {
        let registry = self.inner.lock();
        registry
            .position(mount_name)
            .and_then(|idx| registry.slots[idx].as_ref())
            .ok_or_else(|| RomfsError::NoSuchMount(mount_name.to_string()))?
            .image
            .file_info(path)
    }

    // ========================================================================
    // File handles
    // ========================================================================

    /// Open the file at `path` for reading.
    pub fn open_file(&self, mount: MountId, path: &str, flags: OpenFlags) -> RomfsResult<FileHandle> {
        if flags.wants_write() {
            return Err(RomfsError::ReadOnly);
        }
        self.with(mount, |image| {
            let file = match image.find_file(path) {
                Ok(file) => file,
                Err(RomfsError::NotFound(_)) if flags.create => return Err(RomfsError::ReadOnly),
                Err(e) => return Err(e),
            };
            if flags.create && flags.exclusive {
                return Err(RomfsError::AlreadyExists(path.to_string()));
            }
            Ok(FileHandle {
                mount,
                record: file.offset,
                data_start: image.data_start(&file)?,
                size: file.data_size,
                pos: 0,
            })
        })
    }

    /// Read from the current position into `buf`, stopping at end of file.
    ///
    /// Returns 0 at or past end of file.
    pub fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> RomfsResult<usize> {
        self.with(handle.mount, |image| {
            let remaining = handle.size.saturating_sub(handle.pos);
            let len = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
            if len == 0 {
                return Ok(0);
            }
            let offset = handle
                .data_start
                .checked_add(handle.pos)
                .ok_or_else(|| RomfsError::fault(TableKind::File, handle.record))?;
            image.read_exact_at(offset, &mut buf[..len])?;
            handle.pos += len as u64;
            Ok(len)
        })
    }

    /// Move the position. The result may lie past end of file but not
    /// before zero or beyond `i64::MAX`.
    pub fn seek(&self, handle: &mut FileHandle, pos: SeekFrom) -> RomfsResult<u64> {
        self.with(handle.mount, |_| {
            let target = match pos {
                SeekFrom::Start(n) => i128::from(n),
                SeekFrom::Current(d) => i128::from(handle.pos) + i128::from(d),
                SeekFrom::End(d) => i128::from(handle.size) + i128::from(d),
            };
            if target < 0 {
                return Err(RomfsError::invalid_argument(format!(
                    "seek to negative position {target}"
                )));
            }
            let target = u64::try_from(target)
                .ok()
                .filter(|&t| t <= i64::MAX as u64)
                .ok_or(RomfsError::Overflow)?;
            handle.pos = target;
            Ok(target)
        })
    }

    /// Metadata for an open file.
    pub fn fstat(&self, handle: &FileHandle) -> RomfsResult<Metadata> {
        self.with(handle.mount, |image| {
            let file = image.store().file_at(handle.record)?;
            Ok(image.file_metadata(&file))
        })
    }

    // ========================================================================
    // Directory handles
    // ========================================================================

    /// Open the directory at `path` for iteration.
    pub fn open_dir(&self, mount: MountId, path: &str) -> RomfsResult<DirHandle> {
        self.with(mount, |image| {
            Ok(DirHandle {
                mount,
                iter: image.open_dir(path)?,
            })
        })
    }

    /// Rewind a directory iteration to `.`.
    pub fn reset_dir(&self, handle: &mut DirHandle) -> RomfsResult<()> {
        self.with(handle.mount, |_| {
            handle.iter.reset();
            Ok(())
        })
    }

    /// Next entry, or `None` when the directory is exhausted.
    pub fn next_entry(&self, handle: &mut DirHandle) -> RomfsResult<Option<DirEntry>> {
        let mount = handle.mount;
        self.with(mount, |image| handle.iter.next_entry(image))
    }

    /// Run `f` on the image behind `mount` with the table locked.
    fn with<T>(
        &self,
        mount: MountId,
        f: impl FnOnce(&mut RomfsImage) -> RomfsResult<T>,
    ) -> RomfsResult<T> {
        let mut registry = self.inner.lock();
        let slot = registry
            .slots
            .get_mut(mount.slot)
            .and_then(Option::as_mut)
            .filter(|s| s.generation == mount.generation)
            .ok_or(RomfsError::StaleHandle)?;
        f(&mut slot.image)
    }
}

/// Cut `name` to at most the mount name limit, on a character boundary.
fn truncate_name(name: &str) -> &str {
    if name.len() <= MOUNT_NAME_MAX {
        return name;
    }
    let mut end = MOUNT_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::source::MemorySource;

    fn source() -> MemorySource {
        let mut b = ImageBuilder::new();
        b.add_file("A.TXT", b"0123456789abcdef".to_vec()).unwrap();
        b.add_file("sub/b.bin", vec![]).unwrap();
        MemorySource::new(b.build())
    }

    #[test]
    fn test_mount_find_unmount() {
        let table = MountTable::new();
        let id = table.mount("rom", source()).unwrap();
        assert_eq!(table.find("rom"), Some(id));
        assert_eq!(table.find("ROM"), None);
        assert_eq!(table.mounts().len(), 1);

        table.unmount("rom").unwrap();
        assert_eq!(table.find("rom"), None);
        assert!(matches!(table.unmount("rom"), Err(RomfsError::NoSuchMount(_))));
    }

    #[test]
    fn test_name_truncated() {
        let table = MountTable::new();
        let long = "n".repeat(40);
        table.mount(&long, source()).unwrap();
        let name = &table.mounts()[0].name;
        assert_eq!(name.len(), MOUNT_NAME_MAX);
        assert!(table.find(&long[..MOUNT_NAME_MAX]).is_some());
    }

    #[test]
    fn test_truncate_name_char_boundary() {
        let name = format!("{}é", "a".repeat(MOUNT_NAME_MAX - 1));
        assert_eq!(truncate_name(&name), "a".repeat(MOUNT_NAME_MAX - 1));
    }

    #[test]
    fn test_table_full() {
        let table = MountTable::with_capacity(2);
        table.mount("a", source()).unwrap();
        table.mount("b", source()).unwrap();
        assert!(matches!(
            table.mount("c", source()),
            Err(RomfsError::MountTableFull(2))
        ));
        table.unmount("a").unwrap();
        table.mount("c", source()).unwrap();
    }

    #[test]
    fn test_failed_mount_leaves_slot_free() {
        let table = MountTable::with_capacity(1);
        let err = table.mount("bad", MemorySource::new(vec![0u8; 0x50])).unwrap_err();
        assert!(matches!(err, RomfsError::InvalidImage(_)));
        assert!(table.mounts().is_empty());
        table.mount("good", source()).unwrap();
    }

    #[test]
    fn test_stale_handle() {
        let table = MountTable::with_capacity(1);
        let old = table.mount("rom", source()).unwrap();
        let mut file = table.open_file(old, "/a.txt", OpenFlags::read()).unwrap();
        table.unmount("rom").unwrap();
        let new = table.mount("rom", source()).unwrap();
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);

        assert!(matches!(table.stat(old, "/"), Err(RomfsError::StaleHandle)));
        let mut buf = [0u8; 4];
        assert!(matches!(table.read(&mut file, &mut buf), Err(RomfsError::StaleHandle)));
    }

    #[test]
    fn test_open_flags() {
        let table = MountTable::new();
        let rom = table.mount("rom", source()).unwrap();
        assert!(matches!(
            table.open_file(rom, "/a.txt", OpenFlags::write()),
            Err(RomfsError::ReadOnly)
        ));
        let create_only = OpenFlags {
            create: true,
            ..OpenFlags::read()
        };
        assert!(matches!(
            table.open_file(rom, "/new.txt", create_only),
            Err(RomfsError::ReadOnly)
        ));
        assert!(matches!(
            table.open_file(rom, "/a.txt", OpenFlags::create_exclusive()),
            Err(RomfsError::AlreadyExists(_))
        ));
        assert!(table.open_file(rom, "/a.txt", create_only).is_ok());
        assert!(matches!(
            table.open_file(rom, "/sub", OpenFlags::read()),
            Err(RomfsError::IsADirectory(_))
        ));
        assert!(matches!(
            table.open_file(rom, "/missing", OpenFlags::read()),
            Err(RomfsError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_and_seek() {
        let table = MountTable::new();
        let rom = table.mount("rom", source()).unwrap();
        let mut file = table.open_file(rom, "rom:/A.TXT", OpenFlags::read()).unwrap();
        assert_eq!(file.size(), 16);

        let mut buf = [0u8; 10];
        assert_eq!(table.read(&mut file, &mut buf).unwrap(), 10);
        assert_eq!(&buf, b"0123456789");
        assert_eq!(table.read(&mut file, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");
        assert_eq!(table.read(&mut file, &mut buf).unwrap(), 0);

        assert_eq!(table.seek(&mut file, SeekFrom::End(-4)).unwrap(), 12);
        assert_eq!(table.read(&mut file, &mut buf).unwrap(), 4);
        assert_eq!(table.seek(&mut file, SeekFrom::Current(-16)).unwrap(), 0);
        assert!(matches!(
            table.seek(&mut file, SeekFrom::Current(-1)),
            Err(RomfsError::InvalidArgument(_))
        ));
        assert_eq!(file.position(), 0);
        assert!(matches!(
            table.seek(&mut file, SeekFrom::Start(u64::MAX)),
            Err(RomfsError::Overflow)
        ));
        assert_eq!(
            table.seek(&mut file, SeekFrom::Start(i64::MAX as u64)).unwrap(),
            i64::MAX as u64
        );
        assert!(matches!(
            table.seek(&mut file, SeekFrom::Current(1)),
            Err(RomfsError::Overflow)
        ));
        assert_eq!(table.read(&mut file, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_fstat_and_file_info() {
        let table = MountTable::new();
        let rom = table.mount("rom", source()).unwrap();
        let file = table.open_file(rom, "/sub/b.bin", OpenFlags::read()).unwrap();
        let meta = table.fstat(&file).unwrap();
        assert_eq!(meta, table.stat(rom, "/sub/b.bin").unwrap());

        let info = table.file_info("rom", "/a.txt").unwrap();
        assert_eq!(info.length, 16);
        assert!(matches!(
            table.file_info("sd", "/a.txt"),
            Err(RomfsError::NoSuchMount(_))
        ));
    }

    #[test]
    fn test_unmount_all() {
        let table = MountTable::with_capacity(2);
        let a = table.mount("a", source()).unwrap();
        table.mount("b", source()).unwrap();
        table.unmount_all();
        assert!(table.mounts().is_empty());
        assert!(matches!(table.stat(a, "/"), Err(RomfsError::StaleHandle)));
        // Every slot is free again.
        table.mount("c", source()).unwrap();
        table.mount("d", source()).unwrap();
    }

    #[test]
    fn test_file_info_during_remounts() {
        let table = MountTable::with_capacity(1);
        table.mount("rom", source()).unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..200 {
                    table.unmount("rom").unwrap();
                    table.mount("rom", source()).unwrap();
                }
            });
            for _ in 0..200 {
                match table.file_info("rom", "/a.txt") {
                    Ok(info) => assert_eq!(info.length, 16),
                    Err(RomfsError::NoSuchMount(_)) => {}
                    Err(e) => panic!("unexpected error {e}"),
                }
            }
        });
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let table = MountTable::new();
        let first = table.mount("rom", source()).unwrap();
        let second = table.mount("rom", MemorySource::new(ImageBuilder::new().build())).unwrap();
        assert_eq!(table.find("rom"), Some(first));
        table.unmount("rom").unwrap();
        assert_eq!(table.find("rom"), Some(second));
    }

    #[test]
    fn test_dir_handle() {
        let table = MountTable::new();
        let rom = table.mount("rom", source()).unwrap();
        let mut dir = table.open_dir(rom, "/").unwrap();
        let mut names = Vec::new();
        while let Some(entry) = table.next_entry(&mut dir).unwrap() {
            names.push(entry.name);
        }
        assert_eq!(names, [".", "..", "sub", "A.TXT"]);

        table.reset_dir(&mut dir).unwrap();
        assert_eq!(table.next_entry(&mut dir).unwrap().unwrap().name, ".");
    }

    #[test]
    fn test_chdir_is_per_mount() {
        let table = MountTable::new();
        let a = table.mount("a", source()).unwrap();
        let b = table.mount("b", source()).unwrap();
        table.chdir(a, "/sub").unwrap();
        assert!(table.stat(a, "b.bin").is_ok());
        assert!(matches!(table.stat(b, "b.bin"), Err(RomfsError::NotFound(_))));
    }
}
