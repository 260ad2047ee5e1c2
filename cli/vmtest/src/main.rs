//! vmtest - run integration tests against fleets of ephemeral VMs.

use anyhow::Result;
use clap::Parser;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    plfm_vmtest::logging::init(cli.log_level(), cli.log_json());

    if let Err(e) = cli.run().await {
        output::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
