//! Backend configuration.
//!
//! `vmtest.toml` holds one optional command-hook section per platform:
//!
//! ```toml
//! [qemu]
//! create = "my-qemu boot {name} {user_data}"
//! exec = "ssh core@{address} {command}"
//! copy = "scp {local} core@{address}:"
//! destroy = "my-qemu kill {id}"
//! board = "arm64-usr"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use plfm_platform::{Backends, CommandConfig, CommandFactory, Platform};
use serde::Deserialize;
use tracing::debug;

/// Configuration file name.
pub const CONFIG_FILE: &str = "vmtest.toml";

/// Per-user config directory.
fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "plfm", "vmtest").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Parsed `vmtest.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub qemu: Option<CommandConfig>,
    #[serde(default)]
    pub gce: Option<CommandConfig>,
    #[serde(default)]
    pub aws: Option<CommandConfig>,
}

impl Config {
    /// Load the configuration. An explicit path must exist; otherwise
    /// `./vmtest.toml` and then the per-user config directory are tried,
    /// and finding neither yields an empty configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidates = std::iter::once(PathBuf::from(CONFIG_FILE))
            .chain(config_dir().map(|dir| dir.join(CONFIG_FILE)));
        for path in candidates {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }

        debug!("No backend configuration found");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        debug!(path = %path.display(), platforms = ?config.platforms(), "Loaded backend configuration");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn get(&self, platform: Platform) -> Option<&CommandConfig> {
        match platform {
            Platform::Qemu => self.qemu.as_ref(),
            Platform::Gce => self.gce.as_ref(),
            Platform::Aws => self.aws.as_ref(),
        }
    }

    /// Configured platforms.
    pub fn platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.get(*p).is_some())
            .collect()
    }

    /// Board configured for `platform`.
    pub fn board(&self, platform: Platform) -> Option<&str> {
        self.get(platform)?.board.as_deref()
    }

    /// One command-hook backend per configured platform.
    pub fn backends(&self) -> Backends {
        let mut backends = Backends::new();
        for platform in Platform::ALL {
            if let Some(config) = self.get(platform) {
                backends.insert(platform, Arc::new(CommandFactory::new(config.clone())));
            }
        }
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[qemu]
create = "boot {name} {user_data}"
exec = "run {id} {command}"
copy = "push {id} {local}"
destroy = "kill {id}"
board = "arm64-usr"

[aws]
create = "aws-boot {name}"
exec = "aws-ssh {address} {command}"
copy = "aws-scp {local} {address}"
destroy = "aws-kill {id}"
discovery = "new-discovery {size}"
timeout_secs = 60
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.platforms(), vec![Platform::Qemu, Platform::Aws]);
        assert_eq!(config.board(Platform::Qemu), Some("arm64-usr"));
        assert_eq!(config.board(Platform::Aws), None);
        assert_eq!(config.aws.as_ref().unwrap().timeout_secs, 60);
        assert_eq!(config.qemu.as_ref().unwrap().timeout_secs, 300);

        let backends = config.backends();
        assert!(backends.get(Platform::Qemu).is_ok());
        assert!(backends.get(Platform::Gce).is_err());
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(Config::parse("[azure]\ncreate = \"x\"\n").is_err());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("vmtest.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert!(config.qemu.is_some());
    }

    #[test]
    fn test_empty_config_has_no_backends() {
        let config = Config::default();
        assert!(config.platforms().is_empty());
        assert!(config.backends().platforms().is_empty());
    }
}
