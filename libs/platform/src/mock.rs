//! Mock backend for testing and development.
//!
//! Machines answer remote commands from a canned table and record
//! everything done to them, so tests can assert on provisioning, file
//! drops and teardown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cluster::{Cluster, ClusterFactory, Machine};

/// How mock clusters and machines behave.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Reply to `grep ^VERSION_ID= /etc/os-release`.
    pub os_release: String,
    /// Fail every cluster creation.
    pub fail_clusters: bool,
    /// Fail machine creation once a cluster holds this many machines.
    pub machine_limit: Option<usize>,
    /// Canned standard output per command.
    pub outputs: HashMap<String, String>,
    /// Commands that exit non-zero.
    pub failing: HashSet<String>,
    /// Fail every file copy.
    pub fail_copies: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            os_release: "VERSION_ID=1010.5.0\n".to_string(),
            fail_clusters: false,
            machine_limit: None,
            outputs: HashMap::new(),
            failing: HashSet::new(),
            fail_copies: false,
        }
    }
}

/// Constructor handing out [`MockCluster`]s.
#[derive(Default)]
pub struct MockFactory {
    behavior: Arc<MockBehavior>,
    clusters: Mutex<Vec<Arc<MockCluster>>>,
    counter: AtomicU64,
}

impl MockFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Arc::new(behavior),
            clusters: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Every cluster created so far.
    pub fn clusters(&self) -> Vec<Arc<MockCluster>> {
        self.clusters.lock().clone()
    }
}

#[async_trait]
impl ClusterFactory for MockFactory {
    async fn new_cluster(&self, output_dir: &Path) -> Result<Arc<dyn Cluster>> {
        if self.behavior.fail_clusters {
            anyhow::bail!("Mock backend configured to fail");
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let cluster = Arc::new(MockCluster {
            name: format!("mock-{n}"),
            output_dir: output_dir.to_path_buf(),
            behavior: Arc::clone(&self.behavior),
            machines: Mutex::new(Vec::new()),
            destroy_calls: AtomicUsize::new(0),
        });
        info!(cluster = %cluster.name, output_dir = %output_dir.display(), "[MOCK] Cluster created");

        self.clusters.lock().push(Arc::clone(&cluster));
        Ok(cluster)
    }
}

/// In-memory cluster.
pub struct MockCluster {
    name: String,
    output_dir: PathBuf,
    behavior: Arc<MockBehavior>,
    machines: Mutex<Vec<Arc<MockMachine>>>,
    destroy_calls: AtomicUsize,
}

impl MockCluster {
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Concrete handles to the machines, for inspection.
    pub fn mock_machines(&self) -> Vec<Arc<MockMachine>> {
        self.machines.lock().clone()
    }

    /// How many times `destroy` was called.
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroy_calls() > 0
    }
}

#[async_trait]
impl Cluster for MockCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn new_machine(&self, user_data: &str) -> Result<Arc<dyn Machine>> {
        let mut machines = self.machines.lock();
        if self
            .behavior
            .machine_limit
            .is_some_and(|limit| machines.len() >= limit)
        {
            anyhow::bail!("Mock machine limit reached");
        }

        let n = machines.len();
        let machine = Arc::new(MockMachine {
            id: format!("{}-m{}", self.name, n),
            ip: format!("10.0.0.{}", n + 2),
            user_data: user_data.to_string(),
            behavior: Arc::clone(&self.behavior),
            commands: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        });
        debug!(machine = %machine.id, "[MOCK] Machine started");
        machines.push(Arc::clone(&machine));
        Ok(machine)
    }

    fn machines(&self) -> Vec<Arc<dyn Machine>> {
        self.machines
            .lock()
            .iter()
            .map(|m| Arc::clone(m) as Arc<dyn Machine>)
            .collect()
    }

    async fn get_discovery_url(&self, size: usize) -> Result<String> {
        Ok(format!("http://discovery.mock/{}?size={}", self.name, size))
    }

    async fn destroy(&self) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        for machine in self.mock_machines() {
            machine.destroy().await?;
        }
        info!(cluster = %self.name, "[MOCK] Cluster destroyed");
        Ok(())
    }
}

/// In-memory machine.
pub struct MockMachine {
    id: String,
    ip: String,
    user_data: String,
    behavior: Arc<MockBehavior>,
    commands: Mutex<Vec<String>>,
    files: Mutex<Vec<PathBuf>>,
    destroyed: AtomicBool,
}

impl MockMachine {
    /// User data the machine was booted with.
    pub fn user_data(&self) -> &str {
        &self.user_data
    }

    /// Commands run so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Local files copied to the machine.
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Machine for MockMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn ip(&self) -> &str {
        &self.ip
    }

    async fn ssh(&self, cmd: &str) -> Result<Vec<u8>> {
        self.commands.lock().push(cmd.to_string());

        if self.behavior.failing.contains(cmd) {
            anyhow::bail!("Process exited with status 1");
        }
        if cmd.starts_with("grep ^VERSION_ID=") {
            return Ok(self.behavior.os_release.clone().into_bytes());
        }
        Ok(self
            .behavior
            .outputs
            .get(cmd)
            .cloned()
            .unwrap_or_default()
            .into_bytes())
    }

    async fn copy_file(&self, local: &Path) -> Result<()> {
        if self.behavior.fail_copies {
            anyhow::bail!("Mock copy failed for {}", local.display());
        }
        self.files.lock().push(local.to_path_buf());
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
