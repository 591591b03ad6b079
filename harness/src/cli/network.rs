use std::path::PathBuf;

use clap::Args;
use url::Url;

#[derive(Debug, Clone, Args)]
pub struct NetworkCliArgs {
    /// The URL of the CDK Erigon RPC node.
    #[arg(env = "CDK_ERIGON_RPC_URL", long)]
    pub rpc_url: Option<Url>,

    /// Expected chain id. The run aborts if the node reports a different one.
    #[arg(env = "CHAIN_ID", long)]
    pub chain_id: Option<u64>,

    /// Primary private key (0x + 64 hex characters). Four more test accounts are
    /// derived from it. Without it the node's own accounts are used.
    #[arg(env = "PRIVATE_KEY", long, hide_env_values = true)]
    pub private_key: Option<String>,

    /// How often to poll for receipts and new blocks, in milliseconds.
    #[arg(env = "HARNESS_POLL_INTERVAL_MS", long, default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct LedgerCliArgs {
    /// Path of the JSON results file shared by all stages.
    #[arg(env = "HARNESS_RESULTS_PATH", long, default_value = "results/results.json")]
    pub results_path: PathBuf,

    /// Network name recorded in every result.
    #[arg(env = "HARNESS_NETWORK", long, default_value = "cdkErigon")]
    pub network: String,
}
