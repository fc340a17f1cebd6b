//! Directory tree collection and ASCII rendering.

use anyhow::Result;
use serde::Serialize;

use wuhb_romfs::path::strip_mount_prefix;
use wuhb_romfs::{Metadata, MountId, MountTable};

/// One entry in a collected tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub metadata: Metadata,
    pub children: Vec<TreeNode>,
}

/// Walk the directory at `path`, descending at most `max_depth` levels.
pub fn collect(
    table: &MountTable,
    mount: MountId,
    path: &str,
    max_depth: Option<usize>,
) -> Result<TreeNode> {
    let metadata = table.stat(mount, path)?;
    let name = strip_mount_prefix(path)
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("/")
        .to_string();
    let mut root = TreeNode {
        name,
        metadata,
        children: Vec::new(),
    };
    if root.metadata.is_dir() {
        root.children = collect_children(table, mount, path, 1, max_depth)?;
    }
    Ok(root)
}

fn collect_children(
    table: &MountTable,
    mount: MountId,
    path: &str,
    depth: usize,
    max_depth: Option<usize>,
) -> Result<Vec<TreeNode>> {
    if max_depth.is_some_and(|max| depth > max) {
        return Ok(Vec::new());
    }

    let mut handle = table.open_dir(mount, path)?;
    let mut nodes = Vec::new();
    while let Some(entry) = table.next_entry(&mut handle)? {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        let children = if entry.metadata.is_dir() {
            let child_path = format!("{}/{}", path.trim_end_matches('/'), entry.name);
            collect_children(table, mount, &child_path, depth + 1, max_depth)?
        } else {
            Vec::new()
        };
        nodes.push(TreeNode {
            name: entry.name,
            metadata: entry.metadata,
            children,
        });
    }
    Ok(nodes)
}

/// Render a tree as ASCII lines.
pub fn format_tree(root: &TreeNode) -> Vec<String> {
    let mut lines = vec![root.name.clone()];
    format_children(&root.children, "", &mut lines);
    lines
}

fn format_children(children: &[TreeNode], prefix: &str, lines: &mut Vec<String>) {
    for (idx, node) in children.iter().enumerate() {
        let is_last = idx == children.len() - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let label = if node.metadata.is_dir() {
            format!("{}/", node.name)
        } else {
            format!("{} ({} bytes)", node.name, node.metadata.size)
        };
        lines.push(format!("{prefix}{connector}{label}"));

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        format_children(&node.children, &child_prefix, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wuhb_romfs::{ImageBuilder, MemorySource};

    fn table() -> (MountTable, MountId) {
        let mut b = ImageBuilder::new();
        b.add_file("a.txt", b"hello".to_vec()).unwrap();
        b.add_file("sub/b.bin", vec![]).unwrap();
        b.add_file("sub/deep/c", vec![1, 2, 3]).unwrap();
        let table = MountTable::new();
        let rom = table.mount("rom", MemorySource::new(b.build())).unwrap();
        (table, rom)
    }

    #[test]
    fn test_format_tree() {
        let (table, rom) = table();
        let root = collect(&table, rom, "/", None).unwrap();
        assert_eq!(
            format_tree(&root),
            vec![
                "/",
                "├── sub/",
                "│   ├── deep/",
                "│   │   └── c (3 bytes)",
                "│   └── b.bin (0 bytes)",
                "└── a.txt (5 bytes)",
            ]
        );
    }

    #[test]
    fn test_max_depth() {
        let (table, rom) = table();
        let root = collect(&table, rom, "rom:/sub", Some(1)).unwrap();
        assert_eq!(root.name, "sub");
        assert_eq!(root.children.len(), 2);
        assert!(root.children.iter().all(|c| c.children.is_empty()));
    }
}
