//! Orchestration driver.
//!
//! Ties selection, provisioning and the suite together for one run:
//!
//! 1. Wipe the output directory.
//! 2. Read the fleet version, unless bounds cannot change the selection.
//! 3. Filter the catalog and resolve the backend and companion binary.
//! 4. Run every selected test as a suite unit. Each test with a cluster
//!    size provisions its own cluster and always destroys it afterwards.
//! 5. Publish the TAP report and print `PASS` or `FAIL`.
//!
//! Everything before step 4 is a setup-phase error and aborts the run.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use futures_util::future::join_all;
use plfm_harness::tap::TAP_FILE;
use plfm_harness::{
    catch_panic, Counts, HarnessError, Options, Pattern, ResultExt, Suite, TestResult, Tests, H,
};
use plfm_platform::{
    copy_regular_file, new_machines, Backends, Cluster, ClusterFactory, Platform,
};
use rand::Rng;
use semver::Version;
use tracing::{debug, info, warn};

use crate::cluster::{TestCluster, AGENT_BINARY};
use crate::error::DriverError;
use crate::filter::{filter_tests, needs_version};
use crate::options::TestOptions;
use crate::register::{zero_version, Registry, TestDefinition};
use crate::signal::LiveClusters;

/// Upper bound of the random delay before each test starts.
pub const DEFAULT_SPLAY: Duration = Duration::from_secs(2);

/// Pause before destroying the cluster of a failed test.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(2);

/// Architecture of the companion binary unless a board says otherwise.
pub const DEFAULT_ARCH: &str = "amd64";

/// System-wide install location of per-architecture companion binaries.
pub const SYSTEM_AGENT_DIR: &str = "/usr/lib/vmtest";

/// Remote command used to read the fleet version.
pub const OS_RELEASE_COMMAND: &str = "grep ^VERSION_ID= /etc/os-release";

/// Settings of one run.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub platform: Platform,
    pub output_dir: PathBuf,
    pub parallel: usize,
    pub verbose: bool,
    /// Where to copy the TAP report after the run.
    pub tap_file: Option<PathBuf>,
    /// Image board, e.g. `arm64-usr`; selects the companion binary.
    pub board: Option<String>,
    pub splay: Duration,
    pub grace_delay: Duration,
    /// Directories searched for the companion binary; `None` searches the
    /// default locations.
    pub agent_dirs: Option<Vec<PathBuf>>,
    pub options: Arc<TestOptions>,
}

impl DriverOptions {
    pub fn new(platform: Platform, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            output_dir: output_dir.into(),
            parallel: 1,
            verbose: false,
            tap_file: None,
            board: None,
            splay: DEFAULT_SPLAY,
            grace_delay: DEFAULT_GRACE_DELAY,
            agent_dirs: None,
            options: Arc::new(TestOptions::new()),
        }
    }

    pub fn arch(&self) -> String {
        native_arch(self.platform, self.board.as_deref())
    }

    /// Where to look for the companion binary.
    pub fn agent_dirs(&self) -> Vec<PathBuf> {
        match &self.agent_dirs {
            Some(dirs) => dirs.clone(),
            None => default_agent_dirs(&self.arch()),
        }
    }
}

/// State shared by every test of a run.
struct RunContext {
    output_dir: PathBuf,
    factory: Option<Arc<dyn ClusterFactory>>,
    agent: Option<PathBuf>,
    options: Arc<TestOptions>,
    live: LiveClusters,
    splay: Duration,
    grace_delay: Duration,
}

/// Runs selected tests from a catalog against one platform.
pub struct Driver {
    registry: Arc<Registry>,
    backends: Backends,
    opts: DriverOptions,
    live: LiveClusters,
}

impl Driver {
    pub fn new(registry: Arc<Registry>, backends: Backends, opts: DriverOptions) -> Self {
        Self {
            registry,
            backends,
            opts,
            live: LiveClusters::new(),
        }
    }

    /// Clusters currently provisioned by this driver, for signal teardown.
    pub fn live_clusters(&self) -> LiveClusters {
        self.live.clone()
    }

    /// Run every test matching `pattern`. Returns the counts on success;
    /// `DriverError::Harness(TestsFailed)` if any test failed.
    pub async fn run_tests(&self, pattern: &str) -> Result<Counts, DriverError> {
        let pattern = Pattern::new(pattern)?;
        let platform = self.opts.platform;
        let arch = self.opts.arch();
        clean_output_dir(&self.opts.output_dir)?;

        let version = if needs_version(&self.registry, &pattern, platform, &arch) {
            let factory = self.backends.get(platform)?;
            get_cluster_semver(factory.as_ref(), &self.opts.output_dir, &self.live).await?
        } else {
            zero_version()
        };

        let selected = filter_tests(&self.registry, &pattern, platform, &arch, &version);
        info!(
            pattern = %pattern,
            platform = %platform,
            arch = %arch,
            version = %version,
            selected = selected.len(),
            "Tests selected"
        );

        let factory = if selected.iter().any(|def| def.needs_cluster()) {
            Some(self.backends.get(platform)?)
        } else {
            None
        };

        let agent = if selected.iter().any(|def| !def.native_funcs.is_empty()) {
            Some(locate_native_binary(&arch, &self.opts.agent_dirs())?)
        } else {
            None
        };

        let ctx = Arc::new(RunContext {
            output_dir: self.opts.output_dir.clone(),
            factory,
            agent,
            options: Arc::clone(&self.opts.options),
            live: self.live.clone(),
            splay: self.opts.splay,
            grace_delay: self.opts.grace_delay,
        });

        let mut tests = Tests::new();
        for def in selected {
            let ctx = Arc::clone(&ctx);
            let def = def.clone();
            tests.add(def.name.clone(), move |h| {
                run_test(Arc::clone(&ctx), def.clone(), h)
            })?;
        }

        let suite = Suite::new(
            Options {
                output_dir: Some(self.opts.output_dir.clone()),
                parallel: self.opts.parallel,
                verbose: self.opts.verbose,
                pattern: "*".to_string(),
            },
            tests,
        );

        conclude(suite.run().await, &self.opts)
    }
}

/// Publish the report of a finished suite and print the overall verdict.
pub(crate) fn conclude(
    result: Result<Counts, HarnessError>,
    opts: &DriverOptions,
) -> Result<Counts, DriverError> {
    let completed = match &result {
        Ok(_) => true,
        Err(err) => err.is_test_failure(),
    };

    if completed {
        if let Some(tap_file) = &opts.tap_file {
            copy_regular_file(&opts.output_dir.join(TAP_FILE), tap_file)?;
        }
    }

    match result {
        Ok(counts) => {
            println!("{}", "PASS".green().bold());
            Ok(counts)
        }
        Err(err) if err.is_test_failure() => {
            println!("{}", "FAIL".red().bold());
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

async fn run_test(ctx: Arc<RunContext>, def: TestDefinition, h: Arc<H>) -> TestResult {
    h.parallel();
    splay(ctx.splay).await;

    let native_funcs: Vec<String> = def.native_funcs.keys().cloned().collect();
    if !def.needs_cluster() {
        let tc = TestCluster::new(
            Arc::clone(&h),
            def.name.clone(),
            None,
            Vec::new(),
            native_funcs,
            Arc::clone(&ctx.options),
        );
        return (def.run)(tc).await;
    }

    let factory = ctx
        .factory
        .as_ref()
        .ok_or_else(|| h.fatal("no cluster backend selected"))?;

    let dir = ctx.output_dir.join(&def.name);
    tokio::fs::create_dir_all(&dir).await.or_fatal(&h)?;

    let cluster = factory
        .new_cluster(&dir)
        .await
        .map_err(|e| h.fatal(format!("Cluster failed: {e:#}")))?;
    let tracked = ctx.live.track(Arc::clone(&cluster));

    let result = provision_and_run(&ctx, &def, &h, &cluster, native_funcs).await;

    if h.failed() && !ctx.grace_delay.is_zero() {
        debug!(test = %def.name, delay = ?ctx.grace_delay, "Waiting before teardown");
        tokio::time::sleep(ctx.grace_delay).await;
    }
    if let Err(e) = cluster.destroy().await {
        warn!(test = %def.name, cluster = %cluster.name(), error = %e, "Failed to destroy cluster");
        h.log(format!("destroying cluster: {e:#}"));
    }
    drop(tracked);

    result
}

async fn provision_and_run(
    ctx: &RunContext,
    def: &TestDefinition,
    h: &Arc<H>,
    cluster: &Arc<dyn Cluster>,
    native_funcs: Vec<String>,
) -> TestResult {
    let discovery = if def.needs_discovery() {
        cluster
            .get_discovery_url(def.cluster_size)
            .await
            .map_err(|e| h.fatal(format!("Failed to create discovery endpoint: {e:#}")))?
    } else {
        String::new()
    };

    let configs = def.machine_configs(&discovery);
    let machines = new_machines(cluster.as_ref(), &configs)
        .await
        .map_err(|e| h.fatal(format!("Cluster failed: {e:#}")))?;

    if !def.native_funcs.is_empty() {
        let agent = ctx
            .agent
            .as_deref()
            .ok_or_else(|| h.fatal(format!("{AGENT_BINARY} was not located")))?;
        let copies = join_all(machines.iter().map(|m| m.copy_file(agent))).await;
        for (machine, copied) in machines.iter().zip(copies) {
            copied.map_err(|e| {
                h.fatal(format!("dropping {AGENT_BINARY} on {}: {e:#}", machine.id()))
            })?;
        }
    }

    let tc = TestCluster::new(
        Arc::clone(h),
        def.name.clone(),
        Some(Arc::clone(cluster)),
        machines,
        native_funcs,
        Arc::clone(&ctx.options),
    );
    if let Err(panic) = catch_panic((def.run)(tc)).await {
        h.error(format!("panic: {panic}"));
    }
    Ok(())
}

async fn splay(max: Duration) {
    if max.is_zero() {
        return;
    }
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let delay = Duration::from_millis(rand::rng().random_range(0..=max_ms));
    tokio::time::sleep(delay).await;
}

/// Read the fleet version by booting one throwaway machine.
pub async fn get_cluster_semver(
    factory: &dyn ClusterFactory,
    output_dir: &Path,
    live: &LiveClusters,
) -> Result<Version, DriverError> {
    let dir = output_dir.join("get_cluster_semver");
    tokio::fs::create_dir_all(&dir).await?;

    let cluster = factory
        .new_cluster(&dir)
        .await
        .context("creating cluster for semver check")
        .map_err(DriverError::Version)?;
    let tracked = live.track(Arc::clone(&cluster));

    let result = async {
        let machine = cluster
            .new_machine("")
            .await
            .context("creating new machine for semver check")?;
        let out = machine
            .ssh(OS_RELEASE_COMMAND)
            .await
            .context("reading /etc/os-release")?;
        parse_os_release_version(&String::from_utf8_lossy(&out))
    }
    .await;

    if let Err(e) = cluster.destroy().await {
        warn!(cluster = %cluster.name(), error = %e, "Failed to destroy semver check cluster");
    }
    drop(tracked);

    let version = result.map_err(DriverError::Version)?;
    info!(version = %version, "Fleet version");
    Ok(version)
}

/// Parse `VERSION_ID=...` out of os-release text. Purely numeric ids may
/// omit minor and patch components, which are then zero.
pub fn parse_os_release_version(text: &str) -> anyhow::Result<Version> {
    let raw = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("VERSION_ID="))
        .with_context(|| format!("no VERSION_ID in {text:?}"))?;
    let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'');

    let numbers: Result<Vec<u64>, _> = raw.split('.').map(str::parse).collect();
    if let Ok(numbers) = numbers {
        if let [major, rest @ ..] = numbers.as_slice() {
            if rest.len() <= 2 {
                let minor = rest.first().copied().unwrap_or(0);
                let patch = rest.get(1).copied().unwrap_or(0);
                return Ok(Version::new(*major, minor, patch));
            }
        }
    }
    Version::parse(raw).with_context(|| format!("parsing version {raw:?}"))
}

/// Architecture of the companion binary for a platform and board.
pub fn native_arch(platform: Platform, board: Option<&str>) -> String {
    match (platform, board) {
        (Platform::Qemu, Some(board)) if !board.is_empty() => board
            .split_once('-')
            .map_or(board, |(arch, _)| arch)
            .to_string(),
        _ => DEFAULT_ARCH.to_string(),
    }
}

/// Default search path for the companion binary, in order.
pub fn default_agent_dirs(arch: &str) -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir.join(arch));
        dirs.insert(1, exe_dir);
    }
    dirs.push(Path::new(SYSTEM_AGENT_DIR).join(arch));
    dirs
}

/// First `vmtest-agent` found in `dirs`.
pub fn locate_native_binary(arch: &str, dirs: &[PathBuf]) -> Result<PathBuf, DriverError> {
    for dir in dirs {
        let candidate = dir.join(AGENT_BINARY);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Located companion binary");
            return Ok(candidate);
        }
    }
    Err(DriverError::NativeBinaryNotFound {
        binary: AGENT_BINARY,
        arch: arch.to_string(),
        searched: dirs.to_vec(),
    })
}

/// Remove and recreate `dir`. Refuses paths that name no directory of
/// their own, like `""`, `"."`, `".."` or `"/"`.
pub fn clean_output_dir(dir: &Path) -> Result<(), DriverError> {
    let names_nothing = dir
        .components()
        .all(|c| matches!(c, Component::CurDir | Component::ParentDir | Component::RootDir));
    if names_nothing {
        return Err(DriverError::BadOutputDir(dir.to_path_buf()));
    }

    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
