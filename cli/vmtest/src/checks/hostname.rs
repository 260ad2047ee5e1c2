//! Hostname set through Ignition on cloud platforms.

use anyhow::Context;
use plfm_harness::TestResult;
use plfm_platform::Platform;
use semver::Version;

use crate::cluster::TestCluster;
use crate::error::RegistryError;
use crate::register::{Registry, TestDefinition};

const HOSTNAME: &str = "core1";

const CONFIG: &str = r#"{
  "ignition": { "version": "2.0.0" },
  "storage": {
    "files": [
      {
        "filesystem": "root",
        "path": "/etc/hostname",
        "mode": 420,
        "contents": { "source": "data:,core1" }
      }
    ]
  }
}"#;

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    for (platform, min_major) in [(Platform::Aws, 1010), (Platform::Gce, 1045)] {
        registry.register(
            TestDefinition::new(format!("ignition.v2.sethostname.{platform}"), set_hostname)
                .cluster_size(1)
                .platforms([platform])
                .min_version(Version::new(min_major, 0, 0))
                .user_data(CONFIG),
        )?;
    }
    Ok(())
}

async fn set_hostname(c: TestCluster) -> TestResult {
    let Some(machine) = c.machines().first() else {
        return Err(c.fatal("no machines provisioned"));
    };

    let out = machine
        .ssh("hostnamectl")
        .await
        .context("failed to run hostnamectl");
    let out = String::from_utf8_lossy(&c.check(out)?).into_owned();

    if !out.contains(&format!("Static hostname: {HOSTNAME}")) {
        return Err(c.fatal(format!("hostname wasn't set correctly:\n{out}")));
    }
    Ok(())
}
