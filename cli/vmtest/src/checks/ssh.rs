//! Every machine of a small cluster answers remote commands.

use plfm_harness::TestResult;

use crate::cluster::TestCluster;
use crate::error::RegistryError;
use crate::register::{Registry, TestDefinition};

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(
        TestDefinition::new("cluster.ssh", ssh)
            .cluster_size(3)
            .user_data("#cloud-config\nhostname: $name\n"),
    )
}

async fn ssh(c: TestCluster) -> TestResult {
    for machine in c.machines() {
        match machine.ssh("uname -a").await {
            Ok(out) => c.log(format!("{}: {}", machine.id(), String::from_utf8_lossy(&out).trim())),
            Err(e) => c.error(format!("{}: {e:#}", machine.id())),
        }
    }
    Ok(())
}
