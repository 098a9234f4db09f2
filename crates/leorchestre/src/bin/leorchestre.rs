//! leorchestre binary entry point

use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    leorchestre::Cli::parse().run().await
}
