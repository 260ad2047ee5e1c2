//! CLI commands.

mod list;
mod run;
mod single_node;
mod spawn;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use plfm_platform::Platform;
use plfm_vmtest::checks::builtin_registry;
use plfm_vmtest::{Config, DriverOptions, Registry};

/// Default output directory.
const DEFAULT_OUTPUT_DIR: &str = "_vmtest_temp";

/// vmtest - run integration tests against fleets of ephemeral VMs.
#[derive(Debug, Parser)]
#[command(name = "vmtest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, env = "VMTEST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log as JSON.
    #[arg(long, global = true, env = "VMTEST_LOG_JSON")]
    log_json: bool,

    /// Backend configuration file.
    #[arg(long, global = true, env = "VMTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Platform to test (qemu, gce or aws).
    #[arg(long, short = 'p', global = true, env = "VMTEST_PLATFORM")]
    platform: Option<String>,

    /// Directory for logs and the TAP report. Wiped before each run.
    #[arg(long, short = 'd', global = true, env = "VMTEST_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Image board, e.g. arm64-usr. Overrides the board in the config.
    #[arg(long, global = true, env = "VMTEST_BOARD")]
    board: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run tests matching a pattern.
    Run(run::RunCommand),

    /// List the test catalog.
    List(list::ListCommand),

    /// Provision machines and hold them.
    Spawn(spawn::SpawnCommand),

    /// Run the local checks on a single provisioned machine.
    SingleNode(single_node::SingleNodeCommand),

    /// Show version.
    Version,
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let platform = self
            .platform
            .as_deref()
            .map(str::parse::<Platform>)
            .transpose()?;

        let ctx = CommandContext {
            config_path: self.config,
            platform,
            output_dir: self.output_dir,
            board: self.board,
        };

        match self.command {
            Commands::Run(cmd) => cmd.run(ctx).await,
            Commands::List(cmd) => cmd.run(ctx),
            Commands::Spawn(cmd) => cmd.run(ctx).await,
            Commands::SingleNode(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("vmtest {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    /// `--config`, if given. Read only by commands that provision.
    pub config_path: Option<PathBuf>,
    /// Platform given on the command line, if any.
    pub platform: Option<Platform>,
    pub output_dir: PathBuf,
    pub board: Option<String>,
}

impl CommandContext {
    /// Platform to provision on; `qemu` unless given.
    pub fn target_platform(&self) -> Platform {
        self.platform.unwrap_or(Platform::Qemu)
    }

    /// Backend configuration, loaded on demand.
    pub fn config(&self) -> Result<Config> {
        Config::load(self.config_path.as_deref())
    }

    /// The built-in catalog. A bad declaration aborts start-up.
    pub fn registry(&self) -> Result<Arc<Registry>> {
        Ok(Arc::new(builtin_registry()?))
    }

    /// Driver settings for `platform`, preferring the `--board` flag over
    /// the configured board.
    pub fn driver_options(&self, config: &Config, platform: Platform) -> DriverOptions {
        let mut opts = DriverOptions::new(platform, &self.output_dir);
        opts.board = self
            .board
            .clone()
            .or_else(|| config.board(platform).map(str::to_string));
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cli(config: &std::path::Path, args: &[&str]) -> Cli {
        let config = config.to_string_lossy();
        let mut argv = vec!["vmtest", "--config", config.as_ref()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_config_only_breaks_provisioning_commands() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("vmtest.toml");
        fs::write(&config, "[qemu\ncreate = ").unwrap();
        let output_dir = dir.path().join("out");
        let output_dir = output_dir.to_string_lossy();

        cli(&config, &["version"]).run().await.unwrap();
        cli(&config, &["list"]).run().await.unwrap();

        let err = cli(&config, &["-d", output_dir.as_ref(), "spawn"])
            .run()
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn test_board_flag_beats_config() {
        let config = Config::parse("[qemu]\ncreate = \"c\"\nexec = \"e\"\ncopy = \"p\"\ndestroy = \"d\"\nboard = \"arm64-usr\"\n").unwrap();
        let mut ctx = CommandContext {
            config_path: None,
            platform: None,
            output_dir: PathBuf::from("out"),
            board: None,
        };
        assert_eq!(ctx.driver_options(&config, Platform::Qemu).arch(), "arm64");

        ctx.board = Some("amd64-usr".to_string());
        assert_eq!(ctx.driver_options(&config, Platform::Qemu).arch(), "amd64");
    }
}
