use alloy::network::TransactionBuilder;
use alloy::primitives::{address, Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use chrono::DateTime;
use harness_ledger::{PrecompileInputs, PrecompilePayload, StageKind, Verdict};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::core::client::{ChainClient, ChainError};
use crate::core::orchestrator::{Stage, StageError};

/// The sha256 precompile.
pub const SHA256_PRECOMPILE: Address = address!("0000000000000000000000000000000000000002");
pub const DEFAULT_INPUT: &str = "Hello, CDK Erigon Precompile!";

/// Stage 1: a plain `eth_call` to the sha256 precompile, compared with a locally
/// computed digest.
pub struct PrecompileStage<'a, C> {
    client: &'a C,
    caller: Option<Address>,
    input: String,
}

impl<'a, C: ChainClient> PrecompileStage<'a, C> {
    pub fn new(client: &'a C, caller: Option<Address>) -> Self {
        Self { client, caller, input: DEFAULT_INPUT.to_string() }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    async fn invoke(&self, payload: &mut PrecompilePayload, input: Bytes) -> Result<Bytes, ChainError> {
        match self.client.latest_block().await? {
            Some(block) => {
                payload.block_number = Some(block.header.number);
                payload.call_details.block_hash = Some(block.header.hash);
                payload.call_details.block_timestamp = i64::try_from(block.header.timestamp)
                    .ok()
                    .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0));
            }
            None => warn!("Latest block not available, recording the call without block context"),
        }

        let mut request = TransactionRequest::default().with_to(SHA256_PRECOMPILE).with_input(input);
        if let Some(caller) = self.caller {
            request = request.with_from(caller);
        }
        info!(precompile = %SHA256_PRECOMPILE, block_number = ?payload.block_number, "Calling precompile");
        self.client.call(request).await
    }
}

#[async_trait]
impl<C: ChainClient> Stage for PrecompileStage<'_, C> {
    type Payload = PrecompilePayload;

    fn kind(&self) -> StageKind {
        StageKind::Precompile
    }

    async fn execute(&mut self, payload: &mut Self::Payload) -> Result<Verdict, StageError> {
        let input = Bytes::copy_from_slice(self.input.as_bytes());
        payload.inputs = PrecompileInputs {
            precompile_address: SHA256_PRECOMPILE,
            input_data_hex: input.clone(),
            input_data_string: self.input.clone(),
            caller_address: self.caller,
        };
        payload.receiver_address = Some(SHA256_PRECOMPILE);
        // A read-only call never produces a transaction.
        payload.transaction_hash = None;

        let expected = B256::from_slice(&Sha256::digest(&input));
        payload.expected_output = Some(expected);

        match self.invoke(payload, input).await {
            Ok(output) => {
                payload.decoded_output = Some(output.clone());
                if output.as_ref() == expected.as_slice() {
                    info!(output = %output, "Precompile output matches the expected digest");
                    payload.validation_notes = "Output matches the locally computed sha256 digest".to_string();
                    Ok(Verdict::Success)
                } else {
                    error!(output = %output, expected = %expected, "Precompile output does not match");
                    payload.validation_notes = format!("Output mismatch: expected {expected}, got {output}");
                    Ok(Verdict::Failure)
                }
            }
            Err(err) => {
                error!(error = %err, "Precompile call failed");
                payload.validation_notes = format!("Precompile call failed: {err}");
                payload.call_details.error = Some(err.to_string());
                payload.call_details.revert_data = err.revert_data().cloned();
                Ok(Verdict::Failure)
            }
        }
    }
}
