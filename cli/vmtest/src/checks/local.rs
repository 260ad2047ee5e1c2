//! Checks the agent runs on the machine it was copied to.
//!
//! [`LocalChecks`] is a group so the whole set shares one verdict table
//! and can be filtered like any other suite. Every path is resolved under
//! `root`, which is `/` on a real machine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use plfm_harness::{Group, GroupTest, TestResult, H};

use crate::checks::os_release::check_os_release;
use crate::error::{check, SkipError};

/// Single-node checks against the local filesystem.
pub struct LocalChecks {
    root: PathBuf,
}

impl LocalChecks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, abs: &str) -> PathBuf {
        self.root.join(abs.trim_start_matches('/'))
    }

    async fn test_os_release(&self, h: &H) -> TestResult {
        check(h, check_os_release(&self.path("/etc/os-release")))
    }

    async fn test_usr_read_only(&self, h: &H) -> TestResult {
        let mounts = fs::read_to_string(self.path("/proc/mounts")).context("reading mounts");
        let mounts = check(h, mounts)?;
        check(h, usr_read_only(&mounts))
    }

    async fn test_symlink_resolv_conf(&self, h: &H) -> TestResult {
        check(h, is_symlink(&self.path("/etc/resolv.conf")))
    }
}

#[async_trait]
impl Group for LocalChecks {
    fn name(&self) -> &str {
        "LocalChecks"
    }

    fn methods(&self) -> Vec<GroupTest<Self>> {
        vec![
            GroupTest::new("TestOsRelease", |g, h| Box::pin(g.test_os_release(h))),
            GroupTest::new("TestUsrReadOnly", |g, h| Box::pin(g.test_usr_read_only(h))),
            GroupTest::new("TestSymlinkResolvConf", |g, h| {
                Box::pin(g.test_symlink_resolv_conf(h))
            }),
        ]
    }

    async fn prepare(&self, h: &H) -> TestResult {
        if !self.root.is_dir() {
            return Err(h.fatal(format!("{} is not a directory", self.root.display())));
        }
        Ok(())
    }
}

/// `/usr` must be mounted read-only. Skips when it is not a mount point.
pub fn usr_read_only(mounts: &str) -> Result<()> {
    let entry = mounts.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_, "/usr", _, options, ..] => Some(*options),
            _ => None,
        }
    });

    match entry {
        None => Err(SkipError::new("/usr is not a separate mount").into()),
        Some(options) if options.split(',').any(|o| o == "ro") => Ok(()),
        Some(options) => anyhow::bail!("/usr is mounted with {options}"),
    }
}

fn is_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(()),
        Ok(_) => anyhow::bail!("{} is not a symlink", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            anyhow::bail!("{} does not exist", path.display())
        }
        Err(e) => Err(e).with_context(|| format!("inspecting {}", path.display())),
    }
}
