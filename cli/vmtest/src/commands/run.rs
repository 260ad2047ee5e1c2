//! Run command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use plfm_vmtest::driver::{DEFAULT_GRACE_DELAY, DEFAULT_SPLAY};
use plfm_vmtest::{Driver, SignalGuard, TestOptions};
use tracing::info;

use super::CommandContext;

/// Run command - run every test matching a pattern.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Glob selecting tests by name, e.g. `filesystem.*`.
    #[arg(default_value = "*")]
    pattern: String,

    /// Maximum number of tests running at once.
    #[arg(long, short = 'j', env = "VMTEST_PARALLEL", default_value_t = 1)]
    parallel: usize,

    /// Also copy the TAP report here.
    #[arg(long, env = "VMTEST_TAP_FILE")]
    tap_file: Option<PathBuf>,

    /// Option visible to test bodies, as KEY=VALUE. Repeatable.
    #[arg(long = "test-option", value_name = "KEY=VALUE")]
    test_options: Vec<String>,

    /// Print verdicts of passing and skipped tests too.
    #[arg(long, short)]
    verbose: bool,

    /// Upper bound of the random delay before each test, in seconds.
    #[arg(long, default_value_t = DEFAULT_SPLAY.as_secs())]
    splay_secs: u64,

    /// Pause before destroying the cluster of a failed test, in seconds.
    #[arg(long, default_value_t = DEFAULT_GRACE_DELAY.as_secs())]
    grace_secs: u64,
}

impl RunCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let platform = ctx.target_platform();
        let registry = ctx.registry()?;

        let config = ctx.config()?;

        let mut opts = ctx.driver_options(&config, platform);
        opts.parallel = self.parallel;
        opts.verbose = self.verbose;
        opts.tap_file = self.tap_file;
        opts.splay = Duration::from_secs(self.splay_secs);
        opts.grace_delay = Duration::from_secs(self.grace_secs);
        opts.options = Arc::new(TestOptions::parse(&self.test_options)?);

        info!(
            pattern = %self.pattern,
            platform = %platform,
            parallel = opts.parallel,
            output_dir = %opts.output_dir.display(),
            "Starting run"
        );

        let driver = Driver::new(registry, config.backends(), opts);
        let guard = SignalGuard::for_clusters(driver.live_clusters())?;
        let result = driver.run_tests(&self.pattern).await;
        guard.release().await;

        result?;
        Ok(())
    }
}
