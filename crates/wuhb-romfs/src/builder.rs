//! Image builder.
//!
//! Lays out a tree of directories and files in the on-disk format: header,
//! directory hash table, directory table, file hash table, file table, then
//! file data. Children keep insertion order in their sibling chains.

use std::collections::VecDeque;
use std::path::Path;

use zerocopy::IntoBytes;
use zerocopy::little_endian::{U32, U64};

use crate::constants::{COMPONENT_MAX, DATA_ALIGN, HEADER_SIZE, MAGIC, ROOT_OFFSET, SENTINEL};
use crate::error::{RomfsError, RomfsResult};
use crate::format::{
    DIR_ENTRY_SIZE, FILE_ENTRY_SIZE, RawDirEntry, RawFileEntry, RomfsHeader, align4,
};
use crate::hash::{bucket, names_match};

#[derive(Debug, Clone)]
struct DirNode {
    name: String,
    parent: usize,
    dirs: Vec<usize>,
    files: Vec<usize>,
}

#[derive(Debug, Clone)]
struct FileNode {
    name: String,
    parent: usize,
    data: Vec<u8>,
}

/// Builds RomFS images in memory.
///
/// ```
/// use wuhb_romfs::ImageBuilder;
///
/// let mut builder = ImageBuilder::new();
/// builder.add_file("content/data.bin", vec![1, 2, 3]).unwrap();
/// let image = builder.build();
/// assert_eq!(&image[..4], b"WUHB");
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// Create a builder holding only the root directory.
    pub fn new() -> Self {
        Self {
            dirs: vec![DirNode {
                name: String::new(),
                parent: 0,
                dirs: Vec::new(),
                files: Vec::new(),
            }],
            files: Vec::new(),
        }
    }

    /// Import a host directory tree, entries sorted by name.
    pub fn from_host_dir(root: impl AsRef<Path>) -> RomfsResult<Self> {
        let mut builder = Self::new();
        builder.import_dir(root.as_ref(), 0)?;
        Ok(builder)
    }

    /// Number of directories, including the root.
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Number of files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Add a directory, creating missing parents.
    pub fn add_dir(&mut self, path: &str) -> RomfsResult<&mut Self> {
        let mut dir = 0;
        for component in components(path)? {
            dir = self.child_dir_or_create(dir, component)?;
        }
        Ok(self)
    }

    /// Add a file, creating missing parent directories.
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> RomfsResult<&mut Self> {
        let parts = components(path)?;
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(RomfsError::illegal_sequence(path));
        };
        let mut dir = 0;
        for component in parents {
            dir = self.child_dir_or_create(dir, component)?;
        }
        if self.find_child(dir, leaf).is_some() {
            return Err(RomfsError::AlreadyExists(path.to_string()));
        }
        let idx = self.files.len();
        self.files.push(FileNode {
            name: leaf.to_string(),
            parent: dir,
            data: data.into(),
        });
        self.dirs[dir].files.push(idx);
        Ok(self)
    }

    /// Serialize the tree into an image.
    pub fn build(&self) -> Vec<u8> {
        // Breadth-first directory order; root first at offset 0.
        let mut order = Vec::with_capacity(self.dirs.len());
        let mut queue = VecDeque::from([0usize]);
        while let Some(d) = queue.pop_front() {
            order.push(d);
            queue.extend(self.dirs[d].dirs.iter().copied());
        }

        let mut dir_off = vec![0u32; self.dirs.len()];
        let mut dir_table_size = 0usize;
        for &d in &order {
            dir_off[d] = dir_table_size as u32;
            dir_table_size += DIR_ENTRY_SIZE + align4(self.dirs[d].name.len());
        }

        let file_order: Vec<usize> = order
            .iter()
            .flat_map(|&d| self.dirs[d].files.iter().copied())
            .collect();
        let mut file_off = vec![0u32; self.files.len()];
        let mut data_off = vec![0u64; self.files.len()];
        let mut file_table_size = 0usize;
        let mut data_size = 0u64;
        for &f in &file_order {
            file_off[f] = file_table_size as u32;
            file_table_size += FILE_ENTRY_SIZE + align4(self.files[f].name.len());
            data_off[f] = data_size;
            data_size = align_up(data_size + self.files[f].data.len() as u64, DATA_ALIGN);
        }

        // Hash chains: each new record is pushed onto the head of its bucket.
        let dir_buckets = bucket_count(self.dirs.len());
        let mut dir_heads = vec![SENTINEL; dir_buckets as usize];
        let mut dir_next = vec![SENTINEL; self.dirs.len()];
        for &d in &order {
            let node = &self.dirs[d];
            let parent = dir_off[node.parent];
            if let Some(b) = bucket(parent, node.name.as_bytes(), u64::from(dir_buckets)) {
                dir_next[d] = dir_heads[b as usize];
                dir_heads[b as usize] = dir_off[d];
            }
        }
        let file_buckets = bucket_count(self.files.len());
        let mut file_heads = vec![SENTINEL; file_buckets as usize];
        let mut file_next = vec![SENTINEL; self.files.len()];
        for &f in &file_order {
            let node = &self.files[f];
            let parent = dir_off[node.parent];
            if let Some(b) = bucket(parent, node.name.as_bytes(), u64::from(file_buckets)) {
                file_next[f] = file_heads[b as usize];
                file_heads[b as usize] = file_off[f];
            }
        }

        let dir_hash_offset = u64::from(HEADER_SIZE);
        let dir_hash_size = u64::from(dir_buckets) * 4;
        let dir_table_offset = dir_hash_offset + dir_hash_size;
        let file_hash_offset = dir_table_offset + dir_table_size as u64;
        let file_hash_size = u64::from(file_buckets) * 4;
        let file_table_offset = file_hash_offset + file_hash_size;
        let file_data_offset = align_up(file_table_offset + file_table_size as u64, DATA_ALIGN);

        let header = RomfsHeader {
            magic: MAGIC,
            header_size: U32::new(HEADER_SIZE),
            dir_hash_table_offset: U64::new(dir_hash_offset),
            dir_hash_table_size: U64::new(dir_hash_size),
            dir_table_offset: U64::new(dir_table_offset),
            dir_table_size: U64::new(dir_table_size as u64),
            file_hash_table_offset: U64::new(file_hash_offset),
            file_hash_table_size: U64::new(file_hash_size),
            file_table_offset: U64::new(file_table_offset),
            file_table_size: U64::new(file_table_size as u64),
            file_data_offset: U64::new(file_data_offset),
        };

        let mut out = Vec::with_capacity((file_data_offset + data_size) as usize);
        out.extend_from_slice(header.as_bytes());
        for head in &dir_heads {
            out.extend_from_slice(&head.to_le_bytes());
        }
        for &d in &order {
            let node = &self.dirs[d];
            let raw = RawDirEntry {
                parent: U32::new(dir_off[node.parent]),
                sibling: U32::new(next_sibling(&self.dirs[node.parent].dirs, d, &dir_off)),
                child_dir: U32::new(node.dirs.first().map_or(SENTINEL, |&c| dir_off[c])),
                child_file: U32::new(node.files.first().map_or(SENTINEL, |&c| file_off[c])),
                next_hash: U32::new(dir_next[d]),
                name_len: U32::new(node.name.len() as u32),
            };
            out.extend_from_slice(raw.as_bytes());
            push_name(&mut out, &node.name);
        }
        for head in &file_heads {
            out.extend_from_slice(&head.to_le_bytes());
        }
        for &f in &file_order {
            let node = &self.files[f];
            let raw = RawFileEntry {
                parent: U32::new(dir_off[node.parent]),
                sibling: U32::new(next_sibling(&self.dirs[node.parent].files, f, &file_off)),
                data_offset: U64::new(data_off[f]),
                data_size: U64::new(node.data.len() as u64),
                next_hash: U32::new(file_next[f]),
                name_len: U32::new(node.name.len() as u32),
            };
            out.extend_from_slice(raw.as_bytes());
            push_name(&mut out, &node.name);
        }
        out.resize(file_data_offset as usize, 0);
        for &f in &file_order {
            out.resize((file_data_offset + data_off[f]) as usize, 0);
            out.extend_from_slice(&self.files[f].data);
        }
        out.resize((file_data_offset + data_size) as usize, 0);
        out
    }

    fn find_child(&self, dir: usize, name: &str) -> Option<Child> {
        let node = &self.dirs[dir];
        if let Some(&d) = node
            .dirs
            .iter()
            .find(|&&d| names_match(self.dirs[d].name.as_bytes(), name.as_bytes()))
        {
            return Some(Child::Dir(d));
        }
        node.files
            .iter()
            .find(|&&f| names_match(self.files[f].name.as_bytes(), name.as_bytes()))
            .map(|&f| Child::File(f))
    }

    fn child_dir_or_create(&mut self, dir: usize, name: &str) -> RomfsResult<usize> {
        match self.find_child(dir, name) {
            Some(Child::Dir(d)) => Ok(d),
            Some(Child::File(_)) => Err(RomfsError::AlreadyExists(name.to_string())),
            None => {
                let idx = self.dirs.len();
                self.dirs.push(DirNode {
                    name: name.to_string(),
                    parent: dir,
                    dirs: Vec::new(),
                    files: Vec::new(),
                });
                self.dirs[dir].dirs.push(idx);
                Ok(idx)
            }
        }
    }

    fn import_dir(&mut self, host: &Path, dir: usize) -> RomfsResult<()> {
        let mut entries = std::fs::read_dir(host)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            check_component(&name)?;
            let meta = std::fs::metadata(entry.path())?;
            if meta.is_dir() {
                let child = self.child_dir_or_create(dir, &name)?;
                self.import_dir(&entry.path(), child)?;
            } else if meta.is_file() {
                if self.find_child(dir, &name).is_some() {
                    return Err(RomfsError::AlreadyExists(entry.path().display().to_string()));
                }
                let data = std::fs::read(entry.path())?;
                let idx = self.files.len();
                self.files.push(FileNode {
                    name,
                    parent: dir,
                    data,
                });
                self.dirs[dir].files.push(idx);
            } else {
                tracing::debug!(path = %entry.path().display(), "skipping special file");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Child {
    Dir(usize),
    File(usize),
}

fn components(path: &str) -> RomfsResult<Vec<&str>> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(RomfsError::illegal_sequence(path));
    }
    let parts: Vec<&str> = trimmed.split('/').collect();
    for part in &parts {
        check_component(part).map_err(|e| match e {
            RomfsError::IllegalSequence(_) => RomfsError::illegal_sequence(path),
            other => other,
        })?;
    }
    Ok(parts)
}

fn check_component(name: &str) -> RomfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', ':']) {
        return Err(RomfsError::illegal_sequence(name));
    }
    if name.len() > COMPONENT_MAX {
        return Err(RomfsError::NameTooLong);
    }
    Ok(())
}

/// Offset of the entry after `idx` in `siblings`. The root never appears in
/// its own child list, so it gets no sibling.
fn next_sibling(siblings: &[usize], idx: usize, offsets: &[u32]) -> u32 {
    siblings
        .iter()
        .position(|&s| s == idx)
        .and_then(|pos| siblings.get(pos + 1))
        .map_or(SENTINEL, |&next| offsets[next])
}

fn push_name(out: &mut Vec<u8>, name: &str) {
    out.extend_from_slice(name.as_bytes());
    out.resize(out.len() + align4(name.len()) - name.len(), 0);
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Hash table slot count for `entries` records: small tables get an odd
/// count, larger ones the next value free of small prime factors.
fn bucket_count(entries: usize) -> u32 {
    let n = entries as u32;
    if n < 3 {
        3
    } else if n < 19 {
        n | 1
    } else {
        let mut count = n;
        while [2, 3, 5, 7, 11, 13, 17].iter().any(|p| count % p == 0) {
            count += 1;
        }
        count
    }
}
