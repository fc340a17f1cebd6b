//! Name hashing and hash-chain lookup.
//!
//! The hash tables are precomputed by the image builder, so the hash must
//! match it bit for bit: seed with `parent ^ HASH_SEED`, then for each name
//! byte rotate right by five and XOR in the ASCII-uppercased byte.

use crate::constants::{HASH_SEED, SENTINEL};
use crate::error::{RomfsError, RomfsResult, TableKind};
use crate::table::{DirRecord, FileRecord, TableStore};

/// Fold ASCII `a`-`z` to `A`-`Z`; other bytes are left alone.
#[inline]
pub fn fold(c: u8) -> u8 {
    c.to_ascii_uppercase()
}

/// Case-insensitive name comparison over the ASCII range.
///
/// Names of different byte length never match.
pub fn names_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| fold(x) == fold(y))
}

/// Unreduced hash of `name` under the directory at `parent`.
pub fn fold_hash(parent: u32, name: &[u8]) -> u32 {
    name.iter()
        .fold(parent ^ HASH_SEED, |hash, &c| hash.rotate_right(5) ^ u32::from(fold(c)))
}

/// Bucket index for `name` under `parent` in a table of `buckets` slots.
///
/// Returns `None` when the table has no buckets.
pub fn bucket(parent: u32, name: &[u8], buckets: u64) -> Option<u64> {
    if buckets == 0 {
        return None;
    }
    Some(u64::from(fold_hash(parent, name)) % buckets)
}

/// Find the child directory `name` of the directory at `parent`.
pub fn lookup_dir<'a>(
    store: &'a TableStore,
    parent: u32,
    name: &[u8],
) -> RomfsResult<DirRecord<'a>> {
    let Some(idx) = bucket(parent, name, store.dir_bucket_count()) else {
        return Err(not_found(name));
    };
    let mut offset = store.dir_bucket(idx)?;
    let mut steps = 0;
    while offset != SENTINEL {
        steps += 1;
        if steps > store.max_dir_records() {
            tracing::warn!(offset, "directory hash chain does not terminate");
            return Err(RomfsError::fault(TableKind::Dir, offset));
        }
        let dir = store.dir_at(offset)?;
        if dir.parent == parent && names_match(dir.name, name) {
            return Ok(dir);
        }
        offset = dir.next_hash;
    }
    Err(not_found(name))
}

/// Find the child file `name` of the directory at `parent`.
pub fn lookup_file<'a>(
    store: &'a TableStore,
    parent: u32,
    name: &[u8],
) -> RomfsResult<FileRecord<'a>> {
    let Some(idx) = bucket(parent, name, store.file_bucket_count()) else {
        return Err(not_found(name));
    };
    let mut offset = store.file_bucket(idx)?;
    let mut steps = 0;
    while offset != SENTINEL {
        steps += 1;
        if steps > store.max_file_records() {
            tracing::warn!(offset, "file hash chain does not terminate");
            return Err(RomfsError::fault(TableKind::File, offset));
        }
        let file = store.file_at(offset)?;
        if file.parent == parent && names_match(file.name, name) {
            return Ok(file);
        }
        offset = file.next_hash;
    }
    Err(not_found(name))
}

fn not_found(name: &[u8]) -> RomfsError {
    RomfsError::not_found(String::from_utf8_lossy(name))
}
