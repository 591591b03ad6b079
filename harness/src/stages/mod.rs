pub mod deployment;
pub mod precompile;
pub mod voting;

use alloy::primitives::utils::format_ether;
use alloy::primitives::Address;
use harness_accounts::AccountSource;
use tracing::{info, warn};

use crate::core::client::{ChainClient, ChainError};

pub use deployment::DeploymentStage;
pub use precompile::PrecompileStage;
pub use voting::VotingStage;

/// Addresses transactions are sent from, in role order.
pub async fn resolve_accounts<C: ChainClient>(client: &C, source: &AccountSource) -> Result<Vec<Address>, ChainError> {
    match source {
        AccountSource::Local(_) => Ok(source.addresses()),
        AccountSource::NodeManaged => {
            let accounts = client.accounts().await?;
            warn!(count = accounts.len(), "Using accounts managed by the node");
            Ok(accounts)
        }
    }
}

/// Logs the balance of every labelled account. Lookup failures are logged too.
pub async fn log_balances<C: ChainClient>(client: &C, title: &str, accounts: &[(&str, Address)]) {
    info!("--- {title} ---");
    for (label, address) in accounts {
        match client.balance(*address).await {
            Ok(balance) => info!(account = %label, %address, balance = %format_ether(balance), "Balance (ETH)"),
            Err(err) => warn!(account = %label, %address, error = %err, "Could not fetch balance"),
        }
    }
}
