//! Subcommand implementations. Each writes its result to `out`.

use std::io::Write;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::Serialize;

use wuhb_romfs::{DirEntry, ImageBuilder, Metadata, MountId, MountTable, OpenFlags};

use crate::DEFAULT_MOUNT;
use crate::tree;

const CAT_CHUNK: usize = 64 * 1024;

/// Split `name:/path` into the mount name; bare paths use the default mount.
///
/// The path is handed on unchanged; the resolver strips the prefix itself.
pub fn mount_name(target: &str) -> &str {
    match target.find(':') {
        Some(i) => &target[..i],
        None => DEFAULT_MOUNT,
    }
}

fn resolve_mount(table: &MountTable, target: &str) -> Result<MountId> {
    let name = mount_name(target);
    table
        .find(name)
        .with_context(|| format!("no mount named {name:?}"))
}

fn write_json(out: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn mode_string(meta: &Metadata) -> String {
    let kind = if meta.is_dir() { 'd' } else { '-' };
    let perms: String = (0..9)
        .rev()
        .map(|bit| {
            if meta.mode & (1 << bit) == 0 {
                '-'
            } else {
                ['x', 'w', 'r'][bit % 3]
            }
        })
        .collect();
    format!("{kind}{perms}")
}

pub fn info(table: &MountTable, json: bool, out: &mut impl Write) -> Result<()> {
    let mounts = table.mounts();
    if json {
        return write_json(out, &mounts);
    }
    for m in mounts {
        writeln!(out, "{}: {}", m.name, m.source)?;
        writeln!(out, "  slot:             {}", m.id.slot())?;
        writeln!(out, "  dir buckets:      {}", m.dir_buckets)?;
        writeln!(out, "  file buckets:     {}", m.file_buckets)?;
        writeln!(out, "  dir table size:   {:#x}", m.dir_table_size)?;
        writeln!(out, "  file data offset: {:#x}", m.file_data_offset)?;
    }
    Ok(())
}

pub fn ls(table: &MountTable, target: &str, json: bool, out: &mut impl Write) -> Result<()> {
    let mount = resolve_mount(table, target)?;
    let mut handle = table
        .open_dir(mount, target)
        .with_context(|| format!("opening {target}"))?;
    let mut entries: Vec<DirEntry> = Vec::new();
    while let Some(entry) = table.next_entry(&mut handle)? {
        if entry.name != "." && entry.name != ".." {
            entries.push(entry);
        }
    }
    if json {
        return write_json(out, &entries);
    }
    for entry in entries {
        let suffix = if entry.metadata.is_dir() { "/" } else { "" };
        writeln!(
            out,
            "{} {:>10} {}{}",
            mode_string(&entry.metadata),
            entry.metadata.size,
            entry.name,
            suffix
        )?;
    }
    Ok(())
}

pub fn tree(
    table: &MountTable,
    target: &str,
    max_depth: Option<usize>,
    json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let mount = resolve_mount(table, target)?;
    let root = tree::collect(table, mount, target, max_depth)
        .with_context(|| format!("walking {target}"))?;
    if json {
        return write_json(out, &root);
    }
    for line in tree::format_tree(&root) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn stat(table: &MountTable, target: &str, json: bool, out: &mut impl Write) -> Result<()> {
    let mount = resolve_mount(table, target)?;
    let meta = table
        .stat(mount, target)
        .with_context(|| format!("stat {target}"))?;
    if json {
        return write_json(out, &meta);
    }
    let mtime = meta
        .mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    writeln!(out, "  path: {target}")?;
    writeln!(out, "  type: {}", meta.kind)?;
    writeln!(out, "  size: {}", meta.size)?;
    writeln!(out, " inode: {}", meta.ino)?;
    writeln!(out, " links: {}", meta.nlink)?;
    writeln!(out, "  mode: {:o} ({})", meta.mode, mode_string(&meta))?;
    writeln!(out, "blocks: {} x {}", meta.blocks, meta.blksize)?;
    writeln!(out, " mtime: {mtime}")?;
    Ok(())
}

pub fn cat(table: &MountTable, target: &str, out: &mut impl Write) -> Result<()> {
    let mount = resolve_mount(table, target)?;
    let mut file = table
        .open_file(mount, target, OpenFlags::read())
        .with_context(|| format!("opening {target}"))?;
    let mut buf = vec![0u8; CAT_CHUNK];
    loop {
        let n = table.read(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    out.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct Location<'a> {
    mount: &'a str,
    path: &'a str,
    offset: u64,
    length: u64,
}

pub fn locate(table: &MountTable, target: &str, json: bool, out: &mut impl Write) -> Result<()> {
    let name = mount_name(target);
    let info = table
        .file_info(name, target)
        .with_context(|| format!("locating {target}"))?;
    if json {
        return write_json(
            out,
            &Location {
                mount: name,
                path: target,
                offset: info.offset,
                length: info.length,
            },
        );
    }
    writeln!(out, "{:#x} {}", info.offset, info.length)?;
    Ok(())
}

#[derive(Serialize)]
struct PackSummary {
    dirs: usize,
    files: usize,
    bytes: usize,
}

pub fn pack(dir: &Path, image: &Path, json: bool, out: &mut impl Write) -> Result<()> {
    let builder = ImageBuilder::from_host_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?;
    let bytes = builder.build();
    std::fs::write(image, &bytes).with_context(|| format!("writing {}", image.display()))?;
    tracing::info!(image = %image.display(), bytes = bytes.len(), "packed image");

    let summary = PackSummary {
        dirs: builder.dir_count(),
        files: builder.file_count(),
        bytes: bytes.len(),
    };
    if json {
        return write_json(out, &summary);
    }
    writeln!(
        out,
        "packed {} directories, {} files into {} ({} bytes)",
        summary.dirs,
        summary.files,
        image.display(),
        summary.bytes
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wuhb_romfs::MemorySource;

    fn table() -> MountTable {
        let mut b = ImageBuilder::new();
        b.add_file("A.TXT", b"sixteen bytes!!!".to_vec()).unwrap();
        b.add_file("sub/b.bin", vec![]).unwrap();
        let table = MountTable::new();
        table.mount("rom", MemorySource::new(b.build())).unwrap();
        table
    }

    fn run(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_mount_name() {
        assert_eq!(mount_name("/a"), "rom");
        assert_eq!(mount_name("dlc:/a"), "dlc");
        assert_eq!(mount_name("dlc:"), "dlc");
    }

    #[test]
    fn test_mode_string() {
        let table = table();
        let rom = table.find("rom").unwrap();
        assert_eq!(mode_string(&table.stat(rom, "/").unwrap()), "dr--r--r--");
        assert_eq!(mode_string(&table.stat(rom, "/a.txt").unwrap()), "-r--r--r--");
    }

    #[test]
    fn test_ls() {
        let table = table();
        let text = run(|out| ls(&table, "/", false, out));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" sub/"));
        assert!(lines[1].ends_with(" 16 A.TXT"));

        let json = run(|out| ls(&table, "rom:/sub", true, out));
        let entries: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(entries[0]["name"], "b.bin");
    }

    #[test]
    fn test_cat_and_locate() {
        let table = table();
        assert_eq!(run(|out| cat(&table, "/a.txt", out)), "sixteen bytes!!!");
        assert!(run(|out| cat(&table, "/sub/b.bin", out)).is_empty());

        let text = run(|out| locate(&table, "rom:/a.txt", false, out));
        assert!(text.trim_end().ends_with(" 16"));
        let mut out = Vec::new();
        assert!(locate(&table, "sd:/a.txt", false, &mut out).is_err());
    }

    #[test]
    fn test_stat_missing_has_context() {
        let table = table();
        let mut out = Vec::new();
        let err = stat(&table, "/missing", false, &mut out).unwrap_err();
        assert!(format!("{err:#}").contains("/missing"));
    }

    #[test]
    fn test_pack_then_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("content");
        std::fs::create_dir_all(src.join("levels")).unwrap();
        std::fs::write(src.join("levels/1.lvl"), b"level one").unwrap();
        let image = tmp.path().join("out.wuhb");

        let text = run(|out| pack(&src, &image, false, out));
        assert!(text.starts_with("packed 2 directories, 1 files"));

        let table = MountTable::new();
        table.mount_file("rom", &image, 0).unwrap();
        assert_eq!(run(|out| cat(&table, "/LEVELS/1.lvl", out)), "level one");
    }
}
