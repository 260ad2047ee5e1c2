//! Spawn command.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use plfm_platform::new_machines;
use plfm_vmtest::driver::clean_output_dir;
use plfm_vmtest::{LiveClusters, SignalGuard};
use tabled::Tabled;
use tracing::warn;

use crate::output::{print_info, print_table};

use super::CommandContext;

/// Spawn command - provision machines for manual poking.
#[derive(Debug, Args)]
pub struct SpawnCommand {
    /// Number of machines.
    #[arg(long, short = 'c', default_value_t = 1)]
    count: usize,

    /// File with the user data to boot every machine with.
    #[arg(long, short = 'u')]
    user_data: Option<PathBuf>,

    /// Leave the machines running and exit.
    #[arg(long)]
    keep: bool,
}

#[derive(Debug, Tabled)]
struct MachineRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Address")]
    address: String,
}

impl SpawnCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        if self.count == 0 {
            anyhow::bail!("--count must be at least 1");
        }

        let platform = ctx.target_platform();
        let factory = ctx.config()?.backends().get(platform)?;
        let user_data = match &self.user_data {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read user data from {:?}", path))?,
            None => String::new(),
        };

        clean_output_dir(&ctx.output_dir)?;
        let live = LiveClusters::new();
        let guard = SignalGuard::for_clusters(live.clone())?;

        let cluster = factory
            .new_cluster(&ctx.output_dir)
            .await
            .context("creating cluster")?;
        let tracked = live.track(Arc::clone(&cluster));

        let configs = vec![user_data; self.count];
        let machines = match new_machines(cluster.as_ref(), &configs).await {
            Ok(machines) => machines,
            Err(e) => {
                if let Err(destroy_err) = cluster.destroy().await {
                    warn!(cluster = %cluster.name(), error = %destroy_err, "Failed to destroy cluster");
                }
                return Err(e);
            }
        };

        let rows: Vec<MachineRow> = machines
            .iter()
            .map(|m| MachineRow {
                id: m.id().to_string(),
                address: m.ip().to_string(),
            })
            .collect();
        print_table(&rows);

        if self.keep {
            drop(tracked);
            guard.release().await;
            print_info(&format!("Leaving cluster {} running.", cluster.name()));
            return Ok(());
        }

        print_info("Holding machines; interrupt to destroy them.");
        // The guard destroys the cluster and re-raises the signal.
        std::future::pending::<()>().await;
        drop(tracked);
        guard.release().await;
        Ok(())
    }
}
