//! Directory iteration.
//!
//! An iterator emits `.`, then `..`, then every child directory in sibling
//! order, then every child file. It holds only offsets, so it can be stored
//! in a handle and driven against the image later.

use crate::constants::{NAME_MAX, SENTINEL};
use crate::error::{RomfsError, RomfsResult, TableKind};
use crate::image::RomfsImage;
use crate::table::DirRecord;
use crate::types::DirEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Dot,
    DotDot,
    Children,
}

/// Cursor over one directory's entries.
#[derive(Debug, Clone)]
pub struct DirectoryIterator {
    dir: u32,
    state: State,
    first_dir: u32,
    first_file: u32,
    child_dir: u32,
    child_file: u32,
    /// Entries emitted from the child chains since the last reset.
    walked: usize,
    name_max: usize,
}

impl DirectoryIterator {
    /// Start before `.` of `dir`.
    pub fn new(dir: &DirRecord<'_>) -> Self {
        Self {
            dir: dir.offset,
            state: State::Dot,
            first_dir: dir.child_dir,
            first_file: dir.child_file,
            child_dir: dir.child_dir,
            child_file: dir.child_file,
            walked: 0,
            name_max: NAME_MAX,
        }
    }

    /// Set the output name buffer size. Names of `name_max` bytes or more
    /// fail with `NameTooLong`.
    pub fn with_name_max(mut self, name_max: usize) -> Self {
        self.name_max = name_max;
        self
    }

    /// Return to the initial state.
    pub fn reset(&mut self) {
        self.state = State::Dot;
        self.child_dir = self.first_dir;
        self.child_file = self.first_file;
        self.walked = 0;
    }

    /// Produce the next entry, or `None` once both child chains are done.
    ///
    /// A name that does not fit fails with `NameTooLong` after the cursor has
    /// moved past it; only [`reset`](Self::reset) brings it back.
    pub fn next_entry(&mut self, image: &RomfsImage) -> RomfsResult<Option<DirEntry>> {
        let store = image.store();
        match self.state {
            State::Dot => {
                let dir = store.dir_at(self.dir)?;
                self.state = State::DotDot;
                Ok(Some(DirEntry {
                    name: ".".to_string(),
                    metadata: image.dir_metadata(&dir),
                }))
            }
            State::DotDot => {
                let dir = store.dir_at(self.dir)?;
                let parent = store.dir_at(dir.parent)?;
                self.state = State::Children;
                Ok(Some(DirEntry {
                    name: "..".to_string(),
                    metadata: image.dir_metadata(&parent),
                }))
            }
            State::Children if self.child_dir != SENTINEL => {
                self.check_cycle(store.max_dir_records(), TableKind::Dir, self.child_dir)?;
                let child = store.dir_at(self.child_dir)?;
                self.child_dir = child.sibling;
                self.walked += 1;
                let name = self.entry_name(child.name)?;
                Ok(Some(DirEntry {
                    name,
                    metadata: image.dir_metadata(&child),
                }))
            }
            State::Children if self.child_file != SENTINEL => {
                let limit = store.max_dir_records() + store.max_file_records();
                self.check_cycle(limit, TableKind::File, self.child_file)?;
                let child = store.file_at(self.child_file)?;
                self.child_file = child.sibling;
                self.walked += 1;
                let name = self.entry_name(child.name)?;
                Ok(Some(DirEntry {
                    name,
                    metadata: image.file_metadata(&child),
                }))
            }
            State::Children => Ok(None),
        }
    }

    fn check_cycle(&self, limit: usize, table: TableKind, offset: u32) -> RomfsResult<()> {
        if self.walked >= limit {
            tracing::warn!(dir = self.dir, offset, "sibling chain does not terminate");
            return Err(RomfsError::fault(table, offset));
        }
        Ok(())
    }

    fn entry_name(&self, name: &[u8]) -> RomfsResult<String> {
        if name.len() >= self.name_max {
            return Err(RomfsError::NameTooLong);
        }
        Ok(String::from_utf8_lossy(name).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::types::FileType;

    fn image() -> RomfsImage {
        let mut b = ImageBuilder::new();
        b.add_dir("zeta").unwrap();
        b.add_file("a.txt", b"alpha".to_vec()).unwrap();
        b.add_dir("alpha").unwrap();
        b.add_file("b.txt", vec![]).unwrap();
        b.add_file("alpha/inner", vec![1, 2]).unwrap();
        RomfsImage::from_bytes(b.build()).unwrap()
    }

    fn drain(iter: &mut DirectoryIterator, image: &RomfsImage) -> Vec<(String, FileType)> {
        let mut out = Vec::new();
        while let Some(entry) = iter.next_entry(image).unwrap() {
            out.push((entry.name.clone(), entry.kind()));
        }
        out
    }

    #[test]
    fn test_order_dots_dirs_files() {
        let img = image();
        let mut iter = img.open_dir("/").unwrap();
        let names: Vec<_> = drain(&mut iter, &img);
        assert_eq!(
            names,
            vec![
                (".".to_string(), FileType::Directory),
                ("..".to_string(), FileType::Directory),
                ("zeta".to_string(), FileType::Directory),
                ("alpha".to_string(), FileType::Directory),
                ("a.txt".to_string(), FileType::File),
                ("b.txt".to_string(), FileType::File),
            ]
        );
        // Exhausted stays exhausted.
        assert!(iter.next_entry(&img).unwrap().is_none());
    }

    #[test]
    fn test_reset_replays() {
        let img = image();
        let mut iter = img.open_dir("/alpha").unwrap();
        let first = drain(&mut iter, &img);
        iter.reset();
        assert_eq!(drain(&mut iter, &img), first);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_dotdot_metadata_is_parent() {
        let img = image();
        let mut iter = img.open_dir("/alpha").unwrap();
        let dot = iter.next_entry(&img).unwrap().unwrap();
        let dotdot = iter.next_entry(&img).unwrap().unwrap();
        assert_eq!(dot.metadata, img.stat("/alpha").unwrap());
        assert_eq!(dotdot.metadata, img.stat("/").unwrap());
    }

    #[test]
    fn test_name_too_long_advances() {
        let img = image();
        let mut iter = img.open_dir("/").unwrap().with_name_max(5);
        iter.next_entry(&img).unwrap();
        iter.next_entry(&img).unwrap();
        // "zeta" fits; "alpha", "a.txt" and "b.txt" are 5 bytes and do not.
        assert_eq!(iter.next_entry(&img).unwrap().unwrap().name, "zeta");
        for _ in 0..3 {
            assert!(matches!(iter.next_entry(&img), Err(RomfsError::NameTooLong)));
        }
        assert!(iter.next_entry(&img).unwrap().is_none());

        // Reset brings the skipped entries back; a larger limit lets them through.
        let mut iter = iter.with_name_max(6);
        iter.reset();
        let names: Vec<_> = drain(&mut iter, &img).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, [".", "..", "zeta", "alpha", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_empty_dir() {
        let mut b = ImageBuilder::new();
        b.add_dir("empty").unwrap();
        let img = RomfsImage::from_bytes(b.build()).unwrap();
        let mut iter = img.open_dir("/empty").unwrap();
        assert_eq!(drain(&mut iter, &img).len(), 2);
    }
}
