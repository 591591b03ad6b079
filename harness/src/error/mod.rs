use std::path::PathBuf;

use thiserror::Error;

/// Configuration validation error
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CDK_ERIGON_RPC_URL is required")]
    MissingRpcUrl,

    #[error("invalid funding amount '{0}': {1}")]
    InvalidFundingAmount(String, String),

    #[error("at least one proposal is required")]
    NoProposals,

    #[error("proposal name '{0}' does not fit in bytes32 (at most 31 bytes)")]
    ProposalTooLong(String),
}

/// Problems reading a compiled contract artifact
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key '{0}' does not exist in the artifact")]
    KeyDoesNotExist(&'static str),

    #[error("artifact bytecode is not valid hex: {0}")]
    InvalidHexValue(#[from] alloy::hex::FromHexError),

    #[error("artifact bytecode is empty, the contract is probably abstract or an interface")]
    EmptyBytecode,

    #[error("artifact ABI is not a valid JSON ABI: {0}")]
    InvalidAbi(String),
}

/// Preconditions the harness checks itself before a stage can run
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Chain id mismatch: configured {configured}, node reports {actual}")]
    ChainIdMismatch { configured: u64, actual: u64 },

    #[error("Not enough accounts for the voting workflow: missing {role} (have {available}, need {required})")]
    MissingActor { role: &'static str, available: usize, required: usize },
}
