use alloy::dyn_abi::{DynSolValue, EventExt, JsonAbiExt};
use alloy::json_abi::JsonAbi;
use alloy::primitives::{hex, Bytes, LogData, B256, U256};
use alloy::rpc::types::{Block, TransactionReceipt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::client::ChainClient;

/// A function call recovered from transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCall {
    pub function: String,
    pub signature: String,
    pub args: Vec<String>,
    pub value: String,
}

/// One receipt log, decoded when its topic matches an event of the interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedLog {
    pub index: usize,
    pub event: Option<String>,
    pub topic0: Option<B256>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub hash: B256,
    pub number: u64,
    pub timestamp: u64,
    pub transaction_count: usize,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            hash: block.header.hash,
            number: block.header.number,
            timestamp: block.header.timestamp,
            transaction_count: block.transactions.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub call: Option<DecodedCall>,
    pub logs: Vec<DecodedLog>,
    pub block: Option<BlockSummary>,
}

/// Renders human readable diagnostics for a transaction.
///
/// Nothing in here is allowed to fail a stage: every decoding or lookup problem
/// is logged and the corresponding part of [`Diagnostics`] is left empty.
pub struct ChainInspector<'a, C> {
    client: &'a C,
}

impl<'a, C: ChainClient> ChainInspector<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub async fn describe(
        &self,
        context: &str,
        input: Option<&Bytes>,
        value: U256,
        receipt: Option<&TransactionReceipt>,
        interface: Option<&JsonAbi>,
    ) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();

        match (input, interface) {
            (Some(input), Some(interface)) => match decode_call(interface, input, value) {
                Some(call) => {
                    debug!(
                        context,
                        function = %call.signature,
                        args = ?call.args,
                        value = %call.value,
                        "Decoded transaction input"
                    );
                    diagnostics.call = Some(call);
                }
                None => {
                    debug!(context, "Could not decode transaction input, probably a plain transfer or unknown function")
                }
            },
            (Some(input), None) => debug!(context, input = %input, value = %value, "Raw transaction input"),
            (None, _) => debug!(context, "No transaction input available"),
        }

        let Some(receipt) = receipt else {
            debug!(context, "Receipt not available");
            return diagnostics;
        };
        debug!(
            context,
            tx_hash = %receipt.transaction_hash,
            status = receipt.status(),
            block_number = ?receipt.block_number,
            gas_used = receipt.gas_used,
            contract_address = ?receipt.contract_address,
            "Receipt"
        );

        if let Some(interface) = interface {
            for (index, log) in receipt.inner.logs().iter().enumerate() {
                let decoded = decode_log(interface, log.data(), index);
                match &decoded.event {
                    Some(event) => debug!(context, index, event = %event, args = ?decoded.args, "Decoded log"),
                    None => debug!(context, index, topic0 = ?decoded.topic0, "Log matches no event of the interface"),
                }
                diagnostics.logs.push(decoded);
            }
        }

        if let Some(hash) = receipt.block_hash {
            match self.client.block_by_hash(hash).await {
                Ok(Some(block)) => {
                    let summary = BlockSummary::from(&block);
                    debug!(
                        context,
                        block_number = summary.number,
                        block_hash = %summary.hash,
                        timestamp = summary.timestamp,
                        transactions = summary.transaction_count,
                        "Block"
                    );
                    diagnostics.block = Some(summary);
                }
                Ok(None) => warn!(context, block_hash = %hash, "Block not found"),
                Err(err) => warn!(context, block_hash = %hash, error = %err, "Failed to fetch block"),
            }
        }

        diagnostics
    }
}

/// Matches the selector of `input` against `interface`. `None` when the input is too
/// short, the selector is unknown or the arguments do not decode.
pub fn decode_call(interface: &JsonAbi, input: &[u8], value: U256) -> Option<DecodedCall> {
    let (selector, data) = input.split_first_chunk::<4>()?;
    let function = interface.functions().find(|function| function.selector().0 == *selector)?;
    match function.abi_decode_input(data) {
        Ok(args) => Some(DecodedCall {
            function: function.name.clone(),
            signature: function.signature(),
            args: args.iter().map(render_value).collect(),
            value: value.to_string(),
        }),
        Err(err) => {
            debug!(function = %function.name, error = %err, "Selector matched but arguments did not decode");
            None
        }
    }
}

pub fn decode_log(interface: &JsonAbi, log: &LogData, index: usize) -> DecodedLog {
    let topic0 = log.topics().first().copied();
    let mut decoded = DecodedLog { index, event: None, topic0, args: Vec::new() };

    let Some(event) = interface.events().find(|event| !event.anonymous && Some(event.selector()) == topic0) else {
        return decoded;
    };
    match event.decode_log(log) {
        Ok(values) => {
            decoded.event = Some(event.name.clone());
            decoded.args = values.indexed.iter().chain(values.body.iter()).map(render_value).collect();
        }
        Err(err) => debug!(event = %event.name, error = %err, "Topic matched but log did not decode"),
    }
    decoded
}

fn render_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Bool(flag) => flag.to_string(),
        DynSolValue::Int(int, _) => int.to_string(),
        DynSolValue::Uint(uint, _) => uint.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(text) => text.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            format!("[{}]", items.iter().map(render_value).collect::<Vec<_>>().join(", "))
        }
        other => format!("{other:?}"),
    }
}
