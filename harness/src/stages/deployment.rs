use std::path::PathBuf;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::network::TransactionBuilder;
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use anyhow::Context;
use async_trait::async_trait;
use harness_ledger::{DeploymentPayload, StageKind, Verdict};
use tracing::{info, warn};

use crate::contracts::ballot::constructor_args;
use crate::contracts::{encode_bytes32_string, load_artifact};
use crate::core::client::ChainClient;
use crate::core::executor::TransactionExecutor;
use crate::core::orchestrator::{Stage, StageError, StepFailure};
use crate::stages::log_balances;

const DEPLOY_STEP: &str = "Deploy Ballot";
const VERIFY_STEP: &str = "Verify deployed code";

/// Stage 2: deploys the Ballot with the configured proposals.
///
/// Only the latest deployment matters to later stages, so earlier deployment
/// records are replaced.
pub struct DeploymentStage<'a, C> {
    client: &'a C,
    deployer: Address,
    network: String,
    artifact_path: PathBuf,
    proposals: Vec<String>,
    confirmations: u64,
    poll_interval: Duration,
}

impl<'a, C: ChainClient> DeploymentStage<'a, C> {
    pub fn new(
        client: &'a C,
        deployer: Address,
        network: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
        proposals: Vec<String>,
    ) -> Self {
        Self {
            client,
            deployer,
            network: network.into(),
            artifact_path: artifact_path.into(),
            proposals,
            confirmations: 2,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl<C: ChainClient> Stage for DeploymentStage<'_, C> {
    type Payload = DeploymentPayload;

    fn kind(&self) -> StageKind {
        StageKind::Deployment
    }

    async fn execute(&mut self, payload: &mut Self::Payload) -> Result<Verdict, StageError> {
        let details = &mut payload.deployment_details;
        details.network = self.network.clone();
        details.deployer = Some(self.deployer);
        details.proposals = self.proposals.clone();
        details.chain_id = Some(self.client.chain_id().await.context("Failed to fetch the chain id")?);
        info!(network = %self.network, chain_id = ?details.chain_id, deployer = %self.deployer, "Deploying Ballot");

        let artifact = load_artifact(&self.artifact_path)
            .with_context(|| format!("Failed to load the Ballot artifact from {}", self.artifact_path.display()))?;
        let names = self
            .proposals
            .iter()
            .map(|name| encode_bytes32_string(name))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid proposal name")?;
        info!(proposals = ?self.proposals, "Encoded proposal names");

        log_balances(self.client, "Deployer balance before deployment", &[("Deployer", self.deployer)]).await;

        let mut code = artifact.bytecode.to_vec();
        code.extend_from_slice(&constructor_args(&names));
        let request = TransactionRequest::default().with_from(self.deployer).with_deploy_code(code);

        let executor = TransactionExecutor::new(self.client, self.poll_interval);
        let outcome = executor.submit(DEPLOY_STEP, request, self.confirmations, Some(&artifact.interface)).await;

        payload.transaction_hash = outcome.tx_hash;
        let details = &mut payload.deployment_details;
        details.receipt = outcome.receipt_json();
        details.transaction = outcome.response_json();
        if let Some(response) = &outcome.response {
            details.gas_limit = Some(response.gas_limit());
        }
        if let Some(receipt) = &outcome.receipt {
            details.gas_price = Some(receipt.effective_gas_price);
            payload.block_number = receipt.block_number;
            payload.gas_used = Some(receipt.gas_used);
        }

        if let Some(reason) = outcome.failure_reason() {
            return Err(StepFailure::new(DEPLOY_STEP, reason).into());
        }
        let address = outcome
            .receipt
            .as_ref()
            .and_then(|receipt| receipt.contract_address)
            .ok_or_else(|| StepFailure::new(DEPLOY_STEP, "receipt does not contain a contract address"))?;
        payload.contract_address = Some(address);
        payload.contract_abi = Some(artifact.abi);
        info!(%address, tx_hash = ?payload.transaction_hash, gas_used = ?payload.gas_used, "Ballot deployed");

        let code = self.client.code(address).await.map_err(|err| StepFailure::new(VERIFY_STEP, err.to_string()))?;
        payload.deployment_details.code_size = Some(code.len());
        if code.is_empty() {
            warn!(%address, "No code at the deployed address");
            return Err(StepFailure::new(VERIFY_STEP, format!("no code found at {address}")).into());
        }
        info!(%address, code_size = code.len(), "Deployed code verified");

        log_balances(self.client, "Deployer balance after deployment", &[("Deployer", self.deployer)]).await;
        Ok(Verdict::Success)
    }
}
