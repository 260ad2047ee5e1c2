//! Cluster and machine capabilities.
//!
//! Backends implement these traits; the test driver only ever talks to a
//! fleet through them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::warn;

/// A single provisioned machine.
#[async_trait]
pub trait Machine: Send + Sync {
    /// Stable machine identifier.
    fn id(&self) -> &str;

    /// Address the machine is reachable at.
    fn ip(&self) -> &str;

    /// Run a command remotely and return its standard output. A non-zero
    /// exit or a transport failure is an error.
    async fn ssh(&self, cmd: &str) -> Result<Vec<u8>>;

    /// Copy a local file into the login user's home directory.
    async fn copy_file(&self, local: &Path) -> Result<()>;

    /// Destroy just this machine.
    async fn destroy(&self) -> Result<()>;
}

/// A named, sized set of machines living for one test.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn name(&self) -> &str;

    /// Provision one machine booted with `user_data`.
    async fn new_machine(&self, user_data: &str) -> Result<Arc<dyn Machine>>;

    /// Machines created so far, in creation order.
    fn machines(&self) -> Vec<Arc<dyn Machine>>;

    /// Discovery endpoint for a cluster of `size` machines.
    async fn get_discovery_url(&self, size: usize) -> Result<String>;

    /// Destroy every machine. Idempotent and safe after a partial failure.
    async fn destroy(&self) -> Result<()>;
}

/// Per-platform cluster constructor.
#[async_trait]
pub trait ClusterFactory: Send + Sync {
    /// Create an empty cluster writing its logs under `output_dir`.
    async fn new_cluster(&self, output_dir: &Path) -> Result<Arc<dyn Cluster>>;
}

/// Provision one machine per user-data config, concurrently. If any
/// creation fails the machines that did come up are destroyed.
pub async fn new_machines(cluster: &dyn Cluster, configs: &[String]) -> Result<Vec<Arc<dyn Machine>>> {
    let results = join_all(configs.iter().map(|cfg| cluster.new_machine(cfg))).await;

    let mut machines = Vec::with_capacity(results.len());
    let mut first_err = None;
    for result in results {
        match result {
            Ok(machine) => machines.push(machine),
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(e) => warn!(error = %e, "Additional machine creation failure"),
        }
    }

    if let Some(err) = first_err {
        for machine in &machines {
            if let Err(e) = machine.destroy().await {
                warn!(machine = %machine.id(), error = %e, "Failed to destroy machine");
            }
        }
        return Err(err).context("starting machines");
    }

    Ok(machines)
}
