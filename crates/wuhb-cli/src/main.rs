//! `wuhb` - inspect WUHB RomFS images.
//!
//! Usage:
//!   # Mount one image as `rom` and list its root
//!   wuhb --image game.wuhb ls /
//!
//!   # Image embedded in a bundle at a known offset
//!   wuhb --image bundle.bin --offset 0x1c0 tree
//!
//!   # Several mounts from a config file, addressed as `name:/path`
//!   wuhb --config mounts.ron stat dlc:/content/data.bin
//!
//!   # Build an image from a host directory
//!   wuhb pack ./content out.wuhb
//!
//! Logs go to stderr; `RUST_LOG` overrides `-v`.

mod commands;
mod tree;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use wuhb_romfs::{MountTable, RomfsConfig};

/// Mount name used for `--image`.
const DEFAULT_MOUNT: &str = "rom";

/// Inspect WUHB RomFS images.
#[derive(Parser, Debug)]
#[command(name = "wuhb")]
#[command(about = "Inspect and build WUHB RomFS images")]
struct Args {
    /// Image file, mounted as `rom`
    #[arg(short, long, global = true)]
    image: Option<PathBuf>,

    /// Byte offset of the image within --image (decimal or 0x hex)
    #[arg(long, global = true, default_value = "0", value_parser = parse_offset)]
    offset: u64,

    /// RON file listing mounts
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show mounts and their table sizes
    Info,
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a directory tree
    Tree {
        #[arg(default_value = "/")]
        path: String,
        /// Stop descending below this depth
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Show metadata for a file or directory
    Stat { path: String },
    /// Write a file's contents to stdout
    Cat { path: String },
    /// Print a file's absolute byte range within its image
    Locate { path: String },
    /// Build an image from a host directory
    Pack { dir: PathBuf, out: PathBuf },
}

fn parse_offset(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid offset {s:?}: {e}"))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Build the mount table from `--config` and `--image`.
fn open_mounts(args: &Args) -> Result<MountTable> {
    let table = match &args.config {
        Some(path) => {
            let config = RomfsConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            MountTable::from_config(&config)
                .with_context(|| format!("mounting images from {}", path.display()))?
        }
        None => MountTable::new(),
    };
    if let Some(image) = &args.image {
        table
            .mount_file(DEFAULT_MOUNT, image, args.offset)
            .with_context(|| format!("mounting {}", image.display()))?;
    }
    if table.mounts().is_empty() {
        bail!("nothing mounted; pass --image or --config");
    }
    Ok(table)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    // Pack needs no mounts; everything else opens them first.
    let mounts = || open_mounts(&args);
    let json = args.json;
    match &args.command {
        Command::Info => commands::info(&mounts()?, json, &mut out),
        Command::Ls { path } => commands::ls(&mounts()?, path, json, &mut out),
        Command::Tree { path, max_depth } => {
            commands::tree(&mounts()?, path, *max_depth, json, &mut out)
        }
        Command::Stat { path } => commands::stat(&mounts()?, path, json, &mut out),
        Command::Cat { path } => commands::cat(&mounts()?, path, &mut out),
        Command::Locate { path } => commands::locate(&mounts()?, path, json, &mut out),
        Command::Pack { dir, out: image } => commands::pack(dir, image, json, &mut out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("0").unwrap(), 0);
        assert_eq!(parse_offset("448").unwrap(), 448);
        assert_eq!(parse_offset("0x1c0").unwrap(), 0x1c0);
        assert!(parse_offset("0xzz").is_err());
        assert!(parse_offset("-1").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "wuhb", "--image", "a.wuhb", "--offset", "0x10", "-vv", "stat", "/a.txt",
        ])
        .unwrap();
        assert_eq!(args.offset, 0x10);
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Command::Stat { ref path } if path == "/a.txt"));

        let args = Args::try_parse_from(["wuhb", "ls", "--json"]).unwrap();
        assert!(args.json);
        assert!(matches!(args.command, Command::Ls { ref path } if path == "/"));
    }

    #[test]
    fn test_open_mounts_requires_a_source() {
        let args = Args::try_parse_from(["wuhb", "info"]).unwrap();
        assert!(open_mounts(&args).is_err());
    }

    #[test]
    fn test_open_mounts_image() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.wuhb");
        std::fs::write(&path, wuhb_romfs::ImageBuilder::new().build()).unwrap();
        let args =
            Args::try_parse_from(["wuhb", "--image", path.to_str().unwrap(), "info"]).unwrap();
        let table = open_mounts(&args).unwrap();
        assert!(table.find(DEFAULT_MOUNT).is_some());
    }
}
