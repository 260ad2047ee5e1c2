//! The handle a test body receives.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use plfm_harness::{Abort, H};
use plfm_platform::command::shell_quote;
use plfm_platform::{Cluster, Machine};

use crate::error::{check, SkipError};
use crate::options::TestOptions;

/// File name of the companion binary on local disk and on machines.
pub const AGENT_BINARY: &str = "vmtest-agent";

/// Prefix the agent prints when a native function skips.
pub const SKIP_MARKER: &str = "SKIP:";

/// A test's view of its harness, machines and options.
///
/// Dereferences to [`H`], so `c.log(..)`, `c.error(..)`, `c.fatal(..)`
/// and `c.skip(..)` work directly.
#[derive(Clone)]
pub struct TestCluster {
    h: Arc<H>,
    name: String,
    cluster: Option<Arc<dyn Cluster>>,
    machines: Vec<Arc<dyn Machine>>,
    native_funcs: Vec<String>,
    options: Arc<TestOptions>,
}

impl TestCluster {
    pub fn new(
        h: Arc<H>,
        name: impl Into<String>,
        cluster: Option<Arc<dyn Cluster>>,
        machines: Vec<Arc<dyn Machine>>,
        native_funcs: Vec<String>,
        options: Arc<TestOptions>,
    ) -> Self {
        Self {
            h,
            name: name.into(),
            cluster,
            machines,
            native_funcs,
            options,
        }
    }

    pub fn h(&self) -> &Arc<H> {
        &self.h
    }

    /// Name of the test definition.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provisioned cluster; `None` for cluster-less tests.
    pub fn cluster(&self) -> Option<&Arc<dyn Cluster>> {
        self.cluster.as_ref()
    }

    /// Machines provisioned for this test, in creation order.
    pub fn machines(&self) -> &[Arc<dyn Machine>] {
        &self.machines
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key)
    }

    pub fn native_funcs(&self) -> &[String] {
        &self.native_funcs
    }

    /// Copy a local file to every machine.
    pub async fn drop_file(&self, local: &Path) -> Result<()> {
        let results = join_all(self.machines.iter().map(|m| m.copy_file(local))).await;
        for (machine, result) in self.machines.iter().zip(results) {
            result.with_context(|| format!("copying {} to {}", local.display(), machine.id()))?;
        }
        Ok(())
    }

    /// Run one of this test's native functions on `machine` and return its
    /// output. A skip reported by the agent comes back as [`SkipError`].
    pub async fn run_native(&self, func: &str, machine: &dyn Machine) -> Result<String> {
        if !self.native_funcs.iter().any(|f| f == func) {
            anyhow::bail!("{} has no native function {func:?}", self.name);
        }

        let cmd = format!(
            "./{AGENT_BINARY} run {} {}",
            shell_quote(&self.name),
            shell_quote(func)
        );
        let out = machine
            .ssh(&cmd)
            .await
            .with_context(|| format!("native function {func} on {}", machine.id()))?;
        let out = String::from_utf8_lossy(&out).trim().to_string();

        if let Some(reason) = out.strip_prefix(SKIP_MARKER) {
            return Err(SkipError::new(reason.trim()).into());
        }
        Ok(out)
    }

    /// Turn a fallible step into a verdict: skips skip, anything else is
    /// fatal.
    pub fn check<T>(&self, result: Result<T>) -> Result<T, Abort> {
        check(&self.h, result)
    }
}

impl Deref for TestCluster {
    type Target = H;

    fn deref(&self) -> &H {
        &self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_skip;
    use plfm_platform::{ClusterFactory, MockBehavior, MockFactory};
    use std::collections::HashMap;

    async fn single_machine(behavior: MockBehavior) -> (TestCluster, Arc<dyn Machine>) {
        let factory = MockFactory::new(behavior);
        let cluster = factory.new_cluster(Path::new("/tmp/vmtest")).await.unwrap();
        let machine = cluster.new_machine("").await.unwrap();
        let tc = TestCluster::new(
            H::new("native.check"),
            "native.check",
            Some(cluster),
            vec![Arc::clone(&machine)],
            vec!["Check".to_string()],
            Arc::new(TestOptions::new().with("k", "v").unwrap()),
        );
        (tc, machine)
    }

    #[tokio::test]
    async fn test_run_native_reports_skip() {
        let behavior = MockBehavior {
            outputs: HashMap::from([(
                "./vmtest-agent run 'native.check' 'Check'".to_string(),
                "SKIP: not on this image\n".to_string(),
            )]),
            ..Default::default()
        };
        let (tc, machine) = single_machine(behavior).await;

        let err = tc.run_native("Check", machine.as_ref()).await.unwrap_err();
        assert!(is_skip(&err));
        assert_eq!(err.to_string(), "not on this image");

        let _ = tc.check::<String>(Err(err));
        assert!(tc.skipped());
    }

    #[tokio::test]
    async fn test_run_native_unknown_function() {
        let (tc, machine) = single_machine(MockBehavior::default()).await;
        assert!(tc.run_native("Nope", machine.as_ref()).await.is_err());
        assert_eq!(tc.option("k"), Some("v"));
    }

    #[tokio::test]
    async fn test_check_failure_is_fatal() {
        let (tc, _machine) = single_machine(MockBehavior::default()).await;
        let result = tc.check::<()>(Err(anyhow::anyhow!("broken")));
        assert!(result.is_err());
        assert!(tc.failed());
        assert_eq!(tc.logs(), vec!["broken".to_string()]);
    }
}
