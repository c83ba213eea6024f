use anyhow::Result;
use clap::Parser;
use stockpulse::cli::Cli;
use stockpulse::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    telemetry::init(cli.log_format, level);
    cli.run().await
}
