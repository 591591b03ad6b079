use std::time::Duration;

use alloy::json_abi::JsonAbi;
use alloy::primitives::{B256, U256};
use alloy::rpc::types::{Transaction, TransactionReceipt, TransactionRequest};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::client::{ChainClient, ChainError};
use crate::core::inspector::{ChainInspector, DecodedCall, DecodedLog};

/// How far a submitted transaction got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
pub enum OutcomeKind {
    /// Mined with a successful status.
    Mined,
    /// Mined, but execution failed.
    Reverted,
    /// Never made it into a block, or we could not observe it there.
    SubmissionFailed,
}

/// Everything known about a transaction after the executor is done with it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutcome {
    pub kind: OutcomeKind,
    pub request: TransactionRequest,
    pub tx_hash: Option<B256>,
    pub response: Option<Transaction>,
    pub receipt: Option<TransactionReceipt>,
    pub decoded_input: Option<DecodedCall>,
    pub decoded_logs: Vec<DecodedLog>,
    pub error: Option<String>,
}

impl TransactionOutcome {
    fn new(request: TransactionRequest) -> Self {
        Self {
            kind: OutcomeKind::SubmissionFailed,
            request,
            tx_hash: None,
            response: None,
            receipt: None,
            decoded_input: None,
            decoded_logs: Vec::new(),
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.kind == OutcomeKind::Mined
    }

    /// The receipt as it is written to the ledger.
    pub fn receipt_json(&self) -> Option<Value> {
        self.receipt.as_ref().and_then(|receipt| serde_json::to_value(receipt).ok())
    }

    pub fn response_json(&self) -> Option<Value> {
        self.response.as_ref().and_then(|response| serde_json::to_value(response).ok())
    }

    /// Reason to report when the transaction did not succeed.
    pub fn failure_reason(&self) -> Option<String> {
        match self.kind {
            OutcomeKind::Mined => None,
            _ => Some(self.error.clone().unwrap_or_else(|| format!("transaction {}", self.kind))),
        }
    }
}

/// Result of sending a transaction that is supposed to be rejected.
#[derive(Debug, Clone)]
pub enum RevertCheck {
    /// Rejected with the expected reason. `recovered` is set when the node accepted
    /// the transaction and it reverted on chain.
    Matched { reason: String, recovered: Option<TransactionOutcome> },
    /// Rejected, but not for the expected reason.
    Mismatched { reason: Option<String>, message: String },
    /// Not rejected at all.
    NotReverted { outcome: TransactionOutcome },
}

/// Submits transactions and waits for them to be buried deep enough.
///
/// Broadcast and mining failures never escape as errors, they are folded into the
/// returned [`TransactionOutcome`] so the caller can decide what a failure means.
pub struct TransactionExecutor<'a, C> {
    client: &'a C,
    inspector: ChainInspector<'a, C>,
    poll_interval: Duration,
}

impl<'a, C: ChainClient> TransactionExecutor<'a, C> {
    pub fn new(client: &'a C, poll_interval: Duration) -> Self {
        Self { client, inspector: ChainInspector::new(client), poll_interval }
    }

    pub fn inspector(&self) -> &ChainInspector<'a, C> {
        &self.inspector
    }

    /// Broadcasts `request` and waits for `confirmations` blocks.
    pub async fn submit(
        &self,
        context: &str,
        request: TransactionRequest,
        confirmations: u64,
        interface: Option<&JsonAbi>,
    ) -> TransactionOutcome {
        match self.client.send(request.clone()).await {
            Ok(hash) => self.track(context, request, hash, confirmations, interface).await,
            Err(err) => {
                warn!(context, error = %err, "Transaction submission failed");
                let mut outcome = TransactionOutcome::new(request);
                outcome.error = Some(err.to_string());
                outcome
            }
        }
    }

    async fn track(
        &self,
        context: &str,
        request: TransactionRequest,
        hash: B256,
        confirmations: u64,
        interface: Option<&JsonAbi>,
    ) -> TransactionOutcome {
        let mut outcome = TransactionOutcome::new(request);
        outcome.tx_hash = Some(hash);
        info!(context, tx_hash = %hash, confirmations, "Transaction sent, waiting for confirmations");

        let receipt = match self.wait_for_confirmations(hash, confirmations).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(context, tx_hash = %hash, error = %err, "Failed while waiting for transaction");
                outcome.error = Some(err.to_string());
                outcome.response = self.fetch_transaction(context, hash).await;
                return outcome;
            }
        };

        let block_number = receipt.block_number;
        if receipt.status() {
            info!(context, tx_hash = %hash, ?block_number, gas_used = receipt.gas_used, "Transaction mined");
            outcome.kind = OutcomeKind::Mined;
        } else {
            warn!(context, tx_hash = %hash, ?block_number, "Transaction reverted");
            outcome.kind = OutcomeKind::Reverted;
            outcome.error = Some(format!("transaction {hash} reverted in block {}", block_number.unwrap_or_default()));
        }

        outcome.response = self.fetch_transaction(context, hash).await;

        let value = outcome.request.value.unwrap_or(U256::ZERO);
        let input = outcome.request.input.input().cloned();
        let diagnostics = self.inspector.describe(context, input.as_ref(), value, Some(&receipt), interface).await;
        outcome.decoded_input = diagnostics.call;
        outcome.decoded_logs = diagnostics.logs;
        outcome.receipt = Some(receipt);
        outcome
    }

    /// Best effort, a missing transaction only costs diagnostics.
    async fn fetch_transaction(&self, context: &str, hash: B256) -> Option<Transaction> {
        match self.client.transaction(hash).await {
            Ok(response) => response,
            Err(err) => {
                debug!(context, tx_hash = %hash, error = %err, "Could not fetch transaction");
                None
            }
        }
    }

    /// Polls until the receipt of `hash` is at least `confirmations` blocks deep,
    /// counting its own block as the first. There is no upper bound on the wait.
    pub async fn wait_for_confirmations(
        &self,
        hash: B256,
        confirmations: u64,
    ) -> Result<TransactionReceipt, ChainError> {
        let required = confirmations.max(1);
        loop {
            if let Some(receipt) = self.client.receipt(hash).await? {
                if let Some(included_in) = receipt.block_number {
                    let head = self.client.block_number().await?;
                    let depth = head.saturating_sub(included_in) + 1;
                    if depth >= required {
                        return Ok(receipt);
                    }
                    debug!(tx_hash = %hash, depth, required, "Waiting for more confirmations");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Sends `request` expecting the node to reject it with `expected_reason`.
    ///
    /// Most nodes reject such a transaction up front while estimating gas. When one
    /// accepts it instead, the executor waits for it and replays the call to learn the
    /// revert reason.
    pub async fn expect_revert(
        &self,
        context: &str,
        request: TransactionRequest,
        expected_reason: &str,
        confirmations: u64,
        interface: Option<&JsonAbi>,
    ) -> RevertCheck {
        match self.client.send(request.clone()).await {
            Err(err) => {
                let input = request.input.input().cloned();
                self.inspector
                    .describe(context, input.as_ref(), request.value.unwrap_or(U256::ZERO), None, interface)
                    .await;
                classify_rejection(context, &err, expected_reason, None)
            }
            Ok(hash) => {
                warn!(context, tx_hash = %hash, "Node accepted a transaction that was expected to revert");
                let outcome = self.track(context, request.clone(), hash, confirmations, interface).await;
                if outcome.kind != OutcomeKind::Reverted {
                    return RevertCheck::NotReverted { outcome };
                }
                match self.client.call(request).await {
                    Err(err) => classify_rejection(context, &err, expected_reason, Some(outcome)),
                    Ok(_) => RevertCheck::Mismatched {
                        reason: None,
                        message: "transaction reverted on chain but the replayed call succeeded".to_string(),
                    },
                }
            }
        }
    }
}

fn classify_rejection(
    context: &str,
    err: &ChainError,
    expected_reason: &str,
    recovered: Option<TransactionOutcome>,
) -> RevertCheck {
    let message = match err {
        ChainError::Reverted { message, .. } => message.clone(),
        ChainError::Rpc(message) => message.clone(),
    };
    let reason = err.revert_reason().map(str::to_string);
    let matched = reason.as_deref() == Some(expected_reason) || message.contains(expected_reason);

    if matched {
        info!(context, reason = expected_reason, "Transaction reverted as expected");
        RevertCheck::Matched { reason: reason.unwrap_or_else(|| expected_reason.to_string()), recovered }
    } else {
        warn!(
            context,
            expected = expected_reason,
            actual = ?reason,
            message = %message,
            "Transaction rejected for an unexpected reason"
        );
        RevertCheck::Mismatched { reason, message }
    }
}
