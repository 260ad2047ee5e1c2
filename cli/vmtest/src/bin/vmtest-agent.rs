//! vmtest-agent - companion binary copied onto machines under test.
//!
//! `run <test> <func>` executes one native function of a catalog test and
//! prints `SKIP: <reason>` if the function does not apply here.
//! `single-node` runs the local checks through the harness.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use plfm_harness::{Options, Suite, Tests};
use plfm_vmtest::checks::{builtin_registry, LocalChecks};
use plfm_vmtest::cluster::SKIP_MARKER;
use plfm_vmtest::error::is_skip;

#[derive(Debug, Parser)]
#[command(name = "vmtest-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one native function of a test.
    Run {
        /// Test name.
        test: String,
        /// Native function name.
        func: String,
    },

    /// Run the local single-node checks.
    SingleNode {
        /// Filesystem root the checks inspect.
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Print verdicts of passing and skipped checks too.
        #[arg(long, short)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    plfm_vmtest::logging::init("warn", false);
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { test, func } => run_native(&test, &func),
        Commands::SingleNode { root, verbose } => single_node(root, verbose).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn run_native(test: &str, func: &str) -> Result<()> {
    let registry = builtin_registry()?;
    let native = registry
        .native_func(test, func)
        .with_context(|| format!("{test} has no native function {func:?}"))?;

    match native() {
        Err(e) if is_skip(&e) => {
            println!("{SKIP_MARKER} {e:#}");
            Ok(())
        }
        result => result,
    }
}

async fn single_node(root: PathBuf, verbose: bool) -> Result<()> {
    let mut tests = Tests::new();
    tests.add_group(Arc::new(LocalChecks::new(root)));

    let suite = Suite::new(
        Options {
            output_dir: None,
            parallel: 1,
            verbose,
            pattern: "*".to_string(),
        },
        tests,
    );
    suite.run().await?;
    Ok(())
}
