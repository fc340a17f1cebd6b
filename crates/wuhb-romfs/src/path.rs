//! Path resolution.
//!
//! Paths are `/`-separated, optionally behind a `mount:` prefix. Resolution
//! runs in one of two modes:
//!
//! - [`ResolveMode::Directory`]: every component, including the last, must
//!   name a directory (chdir, opendir).
//! - [`ResolveMode::LeafDeferred`]: all but the last component must name
//!   directories; the last is handed back unresolved so the caller can try
//!   a directory match first and a file match second (open, stat).

use crate::constants::{COMPONENT_MAX, ROOT_OFFSET};
use crate::error::{RomfsError, RomfsResult};
use crate::hash::{lookup_dir, lookup_file};
use crate::table::TableStore;

/// How far to resolve a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Resolve every component as a directory.
    Directory,
    /// Stop before the final component.
    LeafDeferred,
}

/// Outcome of a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'p> {
    /// Directory table offset reached.
    pub dir: u32,
    /// Unconsumed final component; empty when the path ended at a directory.
    pub leaf: &'p str,
}

/// Strip everything up to and including the first `:`.
pub fn strip_mount_prefix(path: &str) -> &str {
    match path.find(':') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Walk `path` starting from the root (absolute paths) or `cwd`.
pub fn resolve<'p>(
    store: &TableStore,
    cwd: u32,
    path: &'p str,
    mode: ResolveMode,
) -> RomfsResult<Resolved<'p>> {
    let mut rest = strip_mount_prefix(path);
    if rest.is_empty() {
        return Err(RomfsError::illegal_sequence(path));
    }

    let mut dir = cwd;
    if let Some(stripped) = rest.strip_prefix('/') {
        dir = ROOT_OFFSET;
        rest = stripped;
    }

    while !rest.is_empty() {
        let component = match rest.find('/') {
            Some(0) => return Err(RomfsError::illegal_sequence(path)),
            Some(i) => {
                let component = &rest[..i];
                rest = &rest[i + 1..];
                component
            }
            None if mode == ResolveMode::Directory => std::mem::take(&mut rest),
            None => {
                if rest.len() > COMPONENT_MAX {
                    return Err(RomfsError::NameTooLong);
                }
                tracing::trace!(path, dir, leaf = rest, "resolved to parent");
                return Ok(Resolved { dir, leaf: rest });
            }
        };
        if component.len() > COMPONENT_MAX {
            return Err(RomfsError::NameTooLong);
        }

        match component {
            "." => {}
            ".." => {
                let current = store.dir_at(dir)?;
                dir = store.dir_at(current.parent)?.offset;
            }
            name => match lookup_dir(store, dir, name.as_bytes()) {
                Ok(child) => dir = child.offset,
                Err(RomfsError::NotFound(_)) => {
                    if mode == ResolveMode::LeafDeferred
                        && lookup_file(store, dir, name.as_bytes()).is_ok()
                    {
                        return Err(RomfsError::not_a_directory(path));
                    }
                    return Err(RomfsError::not_found(path));
                }
                Err(e) => return Err(e),
            },
        }
    }

    tracing::trace!(path, dir, "resolved to directory");
    Ok(Resolved { dir, leaf: "" })
}
