use std::process::ExitCode;

use cdk_harness::cli::CliArgs;
use cdk_harness::config::HarnessConfig;
use cdk_harness::core::StageOrchestrator;
use cdk_harness::runner;
use cdk_harness::utils::logging::init_logging;
use clap::Parser as _;
use dotenvy::dotenv;
use harness_ledger::Ledger;
use tracing::info;
use uuid::Uuid;

/// Runs one stage. The exit code is non zero only when the stage crashed, a
/// failed verdict is already recorded in the ledger.
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    init_logging()?;

    let args = CliArgs::parse();
    let run_id = Uuid::new_v4();
    let kind = args.command.stage_kind();
    let ledger = Ledger::new(args.ledger.results_path.clone(), args.ledger.network.clone());
    info!(stage = %kind, %run_id, results = %ledger.path().display(), "Starting harness");

    let config = match HarnessConfig::try_from(args) {
        Ok(config) => config,
        Err(err) => {
            let err = anyhow::Error::new(err).context("Invalid configuration");
            return Ok(StageOrchestrator::new(&ledger, run_id).record_crash(kind, &err).exit_code());
        }
    };

    let termination = runner::run(&config, &ledger, run_id).await;
    info!(stage = %kind, ?termination, "Harness finished");
    Ok(termination.exit_code())
}
