use alloy::primitives::Address;
use anyhow::Context;
use harness_accounts::DEFAULT_ACCOUNT_COUNT;
use harness_ledger::Ledger;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{HarnessConfig, StageConfig};
use crate::core::client::{AlloyChainClient, ChainClient};
use crate::core::orchestrator::{StageOrchestrator, StageTermination};
use crate::error::HarnessError;
use crate::stages::voting::VotingSettings;
use crate::stages::{resolve_accounts, DeploymentStage, PrecompileStage, VotingStage};

/// Connects to the node and runs the configured stage.
///
/// Whatever happens, exactly one record for the stage ends up in the ledger.
pub async fn run(config: &HarnessConfig, ledger: &Ledger, run_id: Uuid) -> StageTermination {
    let orchestrator = StageOrchestrator::new(ledger, run_id);
    let source = harness_accounts::resolve(config.private_key.as_deref(), DEFAULT_ACCOUNT_COUNT);
    let client = AlloyChainClient::connect(config.rpc_url.clone(), source.signers());
    info!(rpc_url = %config.rpc_url, network = %config.network, "Connected to node");

    let accounts = match prepare(&client, config, &source).await {
        Ok(accounts) => accounts,
        Err(err) => return orchestrator.record_crash(config.stage.kind(), &err),
    };
    run_stage(&orchestrator, &client, ledger, config, accounts).await
}

/// Checks the chain id and resolves the accounts transactions are sent from.
pub async fn prepare<C: ChainClient>(
    client: &C,
    config: &HarnessConfig,
    source: &harness_accounts::AccountSource,
) -> anyhow::Result<Vec<Address>> {
    let actual = client.chain_id().await.context("Failed to fetch the chain id")?;
    match config.chain_id {
        Some(configured) if configured != actual => {
            return Err(HarnessError::ChainIdMismatch { configured, actual }.into());
        }
        Some(_) => info!(chain_id = actual, "Chain id verified"),
        None => warn!(chain_id = actual, "CHAIN_ID not set, using the chain id reported by the node"),
    }

    let accounts = resolve_accounts(client, source).await.context("Failed to resolve accounts")?;
    if accounts.is_empty() {
        warn!("No accounts available, only read-only calls will work");
    }
    Ok(accounts)
}

pub async fn run_stage<C: ChainClient>(
    orchestrator: &StageOrchestrator<'_>,
    client: &C,
    ledger: &Ledger,
    config: &HarnessConfig,
    accounts: Vec<Address>,
) -> StageTermination {
    match &config.stage {
        StageConfig::Precompile => {
            let mut stage = PrecompileStage::new(client, accounts.first().copied());
            orchestrator.run(&mut stage).await
        }
        StageConfig::Deploy(settings) => {
            let Some(deployer) = accounts.first().copied() else {
                let err = anyhow::anyhow!("No account available to deploy from");
                return orchestrator.record_crash(config.stage.kind(), &err);
            };
            let mut stage = DeploymentStage::new(
                client,
                deployer,
                config.network.as_str(),
                settings.artifact_path.as_path(),
                settings.proposals.clone(),
            )
            .with_confirmations(settings.confirmations)
            .with_poll_interval(config.poll_interval);
            orchestrator.run(&mut stage).await
        }
        StageConfig::Vote(settings) => {
            let settings = VotingSettings {
                confirmations: settings.confirmations,
                funding_amount: settings.funding_amount,
                poll_interval: config.poll_interval,
            };
            let mut stage = VotingStage::new(client, ledger, accounts, settings);
            orchestrator.run(&mut stage).await
        }
    }
}
