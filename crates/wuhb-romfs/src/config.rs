//! Mount configuration.
//!
//! A RON file listing images to mount at startup:
//!
//! ```ron
//! RomfsConfig(
//!     capacity: Some(8),
//!     mounts: [
//!         (name: "rom", image: "game.wuhb", offset: 0),
//!         (name: "dlc", image: "dlc.wuhb"),
//!     ],
//! )
//! ```
//!
//! Relative image paths are resolved against the config file's directory.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RomfsResult;
use crate::mount::{MountId, MountTable};

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// One image to mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Mount name.
    pub name: String,
    /// Host path of the image, or of a container holding it.
    pub image: PathBuf,
    /// Byte offset of the image within the file.
    #[serde(default)]
    pub offset: u64,
}

/// Startup mounts and table size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomfsConfig {
    /// Slot count; the default table size when absent.
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Images to mount, in order.
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

impl FromStr for RomfsConfig {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(ron::from_str(text)?)
    }
}

impl RomfsConfig {
    /// Read a config file, anchoring relative image paths at its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = text.parse()?;
        if let Some(base) = path.parent() {
            for spec in &mut config.mounts {
                if spec.image.is_relative() {
                    spec.image = base.join(&spec.image);
                }
            }
        }
        tracing::debug!(path = %path.display(), mounts = config.mounts.len(), "loaded config");
        Ok(config)
    }
}

impl MountTable {
    /// Create a table sized by `config` with every listed image mounted.
    pub fn from_config(config: &RomfsConfig) -> RomfsResult<Self> {
        let table = match config.capacity {
            Some(capacity) => Self::with_capacity(capacity),
            None => Self::new(),
        };
        table.mount_config(config)?;
        Ok(table)
    }

    /// Mount every image listed in `config`, in order.
    ///
    /// Stops at the first failure; images mounted before it stay mounted.
    pub fn mount_config(&self, config: &RomfsConfig) -> RomfsResult<Vec<MountId>> {
        config
            .mounts
            .iter()
            .map(|spec| self.mount_file(&spec.name, &spec.image, spec.offset))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::error::RomfsError;

    #[test]
    fn test_parse_defaults() {
        let config: RomfsConfig = r#"(mounts: [(name: "rom", image: "a.wuhb")])"#.parse().unwrap();
        assert_eq!(config.capacity, None);
        assert_eq!(config.mounts[0].offset, 0);
        assert_eq!(config.mounts[0].image, PathBuf::from("a.wuhb"));
    }

    #[test]
    fn test_parse_error() {
        let err = "(mounts: [(name: 3)])".parse::<RomfsConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Ron(_)));
    }

    #[test]
    fn test_load_and_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let mut b = ImageBuilder::new();
        b.add_file("hello.txt", b"hi".to_vec()).unwrap();
        let mut container = vec![0xEE; 0x20];
        container.extend(b.build());
        std::fs::write(tmp.path().join("game.bin"), &container).unwrap();
        std::fs::write(
            tmp.path().join("mounts.ron"),
            r#"RomfsConfig(capacity: Some(4), mounts: [(name: "rom", image: "game.bin", offset: 32)])"#,
        )
        .unwrap();

        let config = RomfsConfig::load(tmp.path().join("mounts.ron")).unwrap();
        assert_eq!(config.mounts[0].image, tmp.path().join("game.bin"));

        let table = MountTable::from_config(&config).unwrap();
        assert_eq!(table.capacity(), 4);
        let rom = table.find("rom").unwrap();
        assert_eq!(table.stat(rom, "/hello.txt").unwrap().size, 2);
    }

    #[test]
    fn test_mount_config_keeps_earlier_mounts() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("ok.wuhb"), ImageBuilder::new().build()).unwrap();
        let config = RomfsConfig {
            capacity: None,
            mounts: vec![
                MountSpec {
                    name: "ok".into(),
                    image: tmp.path().join("ok.wuhb"),
                    offset: 0,
                },
                MountSpec {
                    name: "gone".into(),
                    image: tmp.path().join("missing.wuhb"),
                    offset: 0,
                },
            ],
        };
        let table = MountTable::new();
        let err = table.mount_config(&config).unwrap_err();
        assert!(matches!(err, RomfsError::Io(_)));
        assert!(table.find("ok").is_some());
    }
}
