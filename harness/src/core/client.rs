use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Block, BlockNumberOrTag, Transaction, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{Revert, SolError};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

const REVERT_MESSAGE_PREFIX: &str = "execution reverted";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("execution reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Reverted { reason: Option<String>, data: Option<Bytes>, message: String },

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// Decoded `Error(string)` reason, when the node returned one.
    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            ChainError::Reverted { reason, .. } => reason.as_deref(),
            ChainError::Rpc(_) => None,
        }
    }

    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            ChainError::Reverted { data, .. } => data.as_ref(),
            ChainError::Rpc(_) => None,
        }
    }

    /// Builds a revert from raw return data, decoding the reason if it is a standard
    /// `Error(string)` payload.
    pub fn from_revert_data(data: Bytes, message: impl Into<String>) -> Self {
        let reason = Revert::abi_decode(&data).ok().map(|revert| revert.reason);
        ChainError::Reverted { reason, data: Some(data), message: message.into() }
    }
}

impl From<RpcError<TransportErrorKind>> for ChainError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        if let Some(payload) = err.as_error_resp() {
            let message = payload.message.to_string();
            if let Some(data) = payload.as_revert_data() {
                let reason = Revert::abi_decode(&data)
                    .ok()
                    .map(|revert| revert.reason)
                    .or_else(|| reason_from_message(&message));
                return ChainError::Reverted { reason, data: Some(data), message };
            }
            if message.contains(REVERT_MESSAGE_PREFIX) {
                return ChainError::Reverted { reason: reason_from_message(&message), data: None, message };
            }
        }
        ChainError::Rpc(err.to_string())
    }
}

/// Nodes that do not return revert data still tend to put the reason in the message,
/// as in `execution reverted: Has no right to vote`.
fn reason_from_message(message: &str) -> Option<String> {
    message
        .split_once(REVERT_MESSAGE_PREFIX)
        .map(|(_, rest)| rest.trim_start_matches(':').trim())
        .filter(|reason| !reason.is_empty())
        .map(str::to_string)
}

/// The subset of the JSON-RPC surface the harness relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Executes `request` against the latest state without creating a transaction.
    async fn call(&self, request: TransactionRequest) -> Result<Bytes, ChainError>;

    /// Signs (locally or on the node) and broadcasts `request`.
    async fn send(&self, request: TransactionRequest) -> Result<B256, ChainError>;

    async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, ChainError>;

    async fn transaction(&self, hash: B256) -> Result<Option<Transaction>, ChainError>;

    async fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, ChainError>;

    async fn latest_block(&self) -> Result<Option<Block>, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn balance(&self, address: Address) -> Result<U256, ChainError>;

    async fn code(&self, address: Address) -> Result<Bytes, ChainError>;

    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Accounts the node signs for, used when no local keys are configured.
    async fn accounts(&self) -> Result<Vec<Address>, ChainError>;
}

/// [`ChainClient`] over an HTTP alloy provider.
pub struct AlloyChainClient {
    provider: DynProvider,
}

impl AlloyChainClient {
    /// Every signer is registered with the wallet so any of them can be used as
    /// `from`. Without signers, sending relies on the node's own accounts.
    pub fn connect(rpc_url: Url, signers: &[PrivateKeySigner]) -> Self {
        let provider = match signers.split_first() {
            Some((primary, others)) => {
                let mut wallet = EthereumWallet::from(primary.clone());
                for signer in others {
                    wallet.register_signer(signer.clone());
                }
                ProviderBuilder::new().wallet(wallet).connect_http(rpc_url).erased()
            }
            None => ProviderBuilder::new().connect_http(rpc_url).erased(),
        };
        Self { provider }
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn call(&self, request: TransactionRequest) -> Result<Bytes, ChainError> {
        Ok(self.provider.call(request).await?)
    }

    async fn send(&self, request: TransactionRequest) -> Result<B256, ChainError> {
        let pending = self.provider.send_transaction(request).await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }

    async fn transaction(&self, hash: B256) -> Result<Option<Transaction>, ChainError> {
        Ok(self.provider.get_transaction_by_hash(hash).await?)
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<Block>, ChainError> {
        Ok(self.provider.get_block_by_hash(hash).await?)
    }

    async fn latest_block(&self) -> Result<Option<Block>, ChainError> {
        Ok(self.provider.get_block_by_number(BlockNumberOrTag::Latest).await?)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self.provider.get_balance(address).await?)
    }

    async fn code(&self, address: Address) -> Result<Bytes, ChainError> {
        Ok(self.provider.get_code_at(address).await?)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        Ok(self.provider.get_accounts().await?)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("execution reverted: Has no right to vote", Some("Has no right to vote"))]
    #[case("execution reverted", None)]
    #[case("VM Exception: execution reverted: Only chairperson can vote.", Some("Only chairperson can vote."))]
    #[case("insufficient funds for gas * price + value", None)]
    fn reason_is_recovered_from_message(#[case] message: &str, #[case] expected: Option<&str>) {
        assert_eq!(reason_from_message(message).as_deref(), expected);
    }

    #[test]
    fn revert_data_is_decoded() {
        let data = Bytes::from(Revert { reason: "Has no right to vote".to_string() }.abi_encode());
        let error = ChainError::from_revert_data(data.clone(), "execution reverted");
        assert_eq!(error.revert_reason(), Some("Has no right to vote"));
        assert_eq!(error.revert_data(), Some(&data));
        assert_eq!(error.to_string(), "execution reverted: Has no right to vote");
    }

    #[test]
    fn custom_error_data_keeps_the_message() {
        let error = ChainError::from_revert_data(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]), "execution reverted");
        assert!(matches!(error, ChainError::Reverted { data: Some(_), .. }));
        assert_eq!(error.revert_reason(), None);
        assert_eq!(error.to_string(), "execution reverted: no reason given");
    }
}
