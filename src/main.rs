use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bcfeed::logging::init().context("init logging")?;

    let cli = bcfeed::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bcfeed::cli::Command::Gather(args) => {
            bcfeed::gather::run(args).await.context("gather")?;
        }
        bcfeed::cli::Command::Reset(args) => {
            bcfeed::store::run_reset(args).context("reset")?;
        }
        bcfeed::cli::Command::Dashboard(args) => {
            bcfeed::dashboard::run(args).await.context("dashboard")?;
        }
        bcfeed::cli::Command::Serve(args) => {
            bcfeed::serve::run(args).await.context("serve")?;
        }
    }

    Ok(())
}
