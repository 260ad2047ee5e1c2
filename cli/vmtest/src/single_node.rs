//! Single-machine group mode.
//!
//! [`SingleNode`] provisions one machine in `Prepare`, hands it to its
//! members and destroys it in `Cleanup`. Its only member runs the agent's
//! [`LocalChecks`](crate::checks::LocalChecks) on the machine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use plfm_harness::{Counts, Group, GroupTest, Options, ResultExt, Suite, TestResult, Tests, H};
use plfm_platform::{Backends, Cluster, ClusterFactory, Machine};
use tracing::{info, warn};

use crate::cluster::AGENT_BINARY;
use crate::driver::{clean_output_dir, conclude, locate_native_binary, DriverOptions};
use crate::error::{check, DriverError};
use crate::signal::{LiveClusters, Tracked};

/// Agent subcommand running the local checks.
pub const AGENT_SINGLE_NODE: &str = "single-node";

struct Provisioned {
    cluster: Arc<dyn Cluster>,
    machine: Arc<dyn Machine>,
    _tracked: Tracked,
}

/// Group sharing one provisioned machine between its members.
pub struct SingleNode {
    factory: Arc<dyn ClusterFactory>,
    agent: PathBuf,
    output_dir: PathBuf,
    live: LiveClusters,
    provisioned: Mutex<Option<Provisioned>>,
}

impl SingleNode {
    pub fn new(
        factory: Arc<dyn ClusterFactory>,
        agent: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        live: LiveClusters,
    ) -> Self {
        Self {
            factory,
            agent: agent.into(),
            output_dir: output_dir.into(),
            live,
            provisioned: Mutex::new(None),
        }
    }

    /// Returns true while a machine is held.
    pub fn is_provisioned(&self) -> bool {
        self.provisioned.lock().is_some()
    }

    fn machine(&self) -> Option<Arc<dyn Machine>> {
        self.provisioned
            .lock()
            .as_ref()
            .map(|p| Arc::clone(&p.machine))
    }

    async fn test_agent_single_node(&self, h: &H) -> TestResult {
        let machine = self
            .machine()
            .ok_or_else(|| h.fatal("no machine provisioned"))?;

        let cmd = format!("./{AGENT_BINARY} {AGENT_SINGLE_NODE} --verbose");
        let out = machine
            .ssh(&cmd)
            .await
            .with_context(|| format!("running {cmd} on {}", machine.id()));
        let out = check(h, out)?;
        for line in String::from_utf8_lossy(&out).lines() {
            h.log(line);
        }
        Ok(())
    }
}

async fn boot_one(cluster: &dyn Cluster, agent: &std::path::Path) -> anyhow::Result<Arc<dyn Machine>> {
    let machine = cluster.new_machine("").await.context("creating machine")?;
    machine
        .copy_file(agent)
        .await
        .with_context(|| format!("dropping {AGENT_BINARY} on {}", machine.id()))?;
    Ok(machine)
}

#[async_trait]
impl Group for SingleNode {
    fn name(&self) -> &str {
        "SingleNode"
    }

    fn methods(&self) -> Vec<GroupTest<Self>> {
        vec![GroupTest::new("TestAgentSingleNode", |g, h| {
            Box::pin(g.test_agent_single_node(h))
        })]
    }

    async fn prepare(&self, h: &H) -> TestResult {
        let dir = self.output_dir.join(Group::name(self));
        tokio::fs::create_dir_all(&dir).await.or_fatal(h)?;

        let cluster = self
            .factory
            .new_cluster(&dir)
            .await
            .map_err(|e| h.fatal(format!("Cluster failed: {e:#}")))?;
        let tracked = self.live.track(Arc::clone(&cluster));

        match boot_one(cluster.as_ref(), &self.agent).await {
            Ok(machine) => {
                info!(cluster = %cluster.name(), machine = %machine.id(), "Single node ready");
                *self.provisioned.lock() = Some(Provisioned {
                    cluster,
                    machine,
                    _tracked: tracked,
                });
                Ok(())
            }
            Err(e) => {
                if let Err(destroy_err) = cluster.destroy().await {
                    warn!(cluster = %cluster.name(), error = %destroy_err, "Failed to destroy cluster");
                }
                drop(tracked);
                Err(h.fatal(format!("{e:#}")))
            }
        }
    }

    async fn cleanup(&self, h: &H) -> TestResult {
        let provisioned = self.provisioned.lock().take();
        let Some(provisioned) = provisioned else {
            return Ok(());
        };
        provisioned
            .cluster
            .destroy()
            .await
            .map_err(|e| h.fatal(format!("destroying {}: {e:#}", provisioned.cluster.name())))
    }
}

/// Run the single-node group on the configured platform.
pub async fn run_single_node(
    backends: &Backends,
    opts: &DriverOptions,
    live: LiveClusters,
) -> Result<Counts, DriverError> {
    clean_output_dir(&opts.output_dir)?;
    let factory = backends.get(opts.platform)?;
    let agent = locate_native_binary(&opts.arch(), &opts.agent_dirs())?;

    let mut tests = Tests::new();
    tests.add_group(Arc::new(SingleNode::new(
        factory,
        agent,
        opts.output_dir.clone(),
        live,
    )));

    let suite = Suite::new(
        Options {
            output_dir: Some(opts.output_dir.clone()),
            parallel: 1,
            verbose: opts.verbose,
            pattern: "*".to_string(),
        },
        tests,
    );
    conclude(suite.run().await, opts)
}
