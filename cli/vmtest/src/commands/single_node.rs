//! Single-node command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use plfm_vmtest::single_node::run_single_node;
use plfm_vmtest::{LiveClusters, SignalGuard};

use super::CommandContext;

/// Single-node command - provision one machine and run the agent's local
/// checks on it.
#[derive(Debug, Args)]
pub struct SingleNodeCommand {
    /// Also copy the TAP report here.
    #[arg(long, env = "VMTEST_TAP_FILE")]
    tap_file: Option<PathBuf>,

    /// Print verdicts of passing and skipped tests too.
    #[arg(long, short)]
    verbose: bool,
}

impl SingleNodeCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let platform = ctx.target_platform();
        let config = ctx.config()?;
        let mut opts = ctx.driver_options(&config, platform);
        opts.verbose = self.verbose;
        opts.tap_file = self.tap_file;

        let live = LiveClusters::new();
        let guard = SignalGuard::for_clusters(live.clone())?;
        let result = run_single_node(&config.backends(), &opts, live).await;
        guard.release().await;

        result?;
        Ok(())
    }
}
