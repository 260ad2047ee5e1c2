//! os-release sanity, checked on the machine itself by the agent.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use plfm_harness::TestResult;

use crate::cluster::TestCluster;
use crate::driver::parse_os_release_version;
use crate::error::{RegistryError, SkipError};
use crate::register::{Registry, TestDefinition};

pub const OS_RELEASE: &str = "/etc/os-release";

const NATIVE_FUNC: &str = "OsRelease";

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(
        TestDefinition::new("native.osrelease", run_on_machines)
            .cluster_size(1)
            .user_data("#cloud-config")
            .native_func(NATIVE_FUNC, os_release),
    )
}

async fn run_on_machines(c: TestCluster) -> TestResult {
    for machine in c.machines() {
        let out = c.run_native(NATIVE_FUNC, machine.as_ref()).await;
        let out = c.check(out)?;
        if !out.is_empty() {
            c.log(out);
        }
    }
    Ok(())
}

/// Native entry point.
fn os_release() -> Result<()> {
    check_os_release(Path::new(OS_RELEASE))
}

/// `path` must name the distribution and carry a parseable version.
pub fn check_os_release(path: &Path) -> Result<()> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SkipError::new(format!("{} does not exist", path.display())).into())
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    if !text.lines().any(|line| line.starts_with("ID=")) {
        anyhow::bail!("{} has no ID", path.display());
    }
    parse_os_release_version(&text)?;
    Ok(())
}
