//! Signing accounts for the harness.
//!
//! A single operator supplied secret is expanded into a handful of accounts by
//! incrementing the key. That is only acceptable against a throwaway test network;
//! nothing here should ever be pointed at real funds.

use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use thiserror::Error;
use tracing::{error, info, warn};

/// Chairperson, three voters and one unauthorized signer.
pub const DEFAULT_ACCOUNT_COUNT: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AccountsError {
    #[error("no private key configured")]
    MissingSecret,

    #[error("private key must be a 32-byte hex string (64 hex characters, optional 0x prefix): {0}")]
    MalformedSecret(String),

    #[error("private key is not a valid secp256k1 scalar: {0}")]
    InvalidKey(String),
}

/// Where transactions get their signatures from.
#[derive(Debug, Clone)]
pub enum AccountSource {
    /// Keys held locally, the first one is the primary account.
    Local(Vec<PrivateKeySigner>),
    /// Accounts unlocked on the node itself.
    NodeManaged,
}

impl AccountSource {
    /// Local signers, empty when the node manages the accounts.
    pub fn signers(&self) -> &[PrivateKeySigner] {
        match self {
            AccountSource::Local(signers) => signers,
            AccountSource::NodeManaged => &[],
        }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.signers().iter().map(PrivateKeySigner::address).collect()
    }
}

/// Decodes a 32-byte hex secret, with or without `0x`.
pub fn parse_secret(secret: &str) -> Result<B256, AccountsError> {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return Err(AccountsError::MissingSecret);
    }
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 64 {
        return Err(AccountsError::MalformedSecret(format!("got {} hex characters", digits.len())));
    }
    B256::from_str(digits).map_err(|err| AccountsError::MalformedSecret(err.to_string()))
}

/// Derives up to `count` signers from `secret`: the key itself followed by key+1,
/// key+2 and so on.
///
/// Derivation stops early, with a warning, when the next key would leave the valid
/// key range. Only a bad primary key is an error.
pub fn provision(secret: &str, count: usize) -> Result<Vec<PrivateKeySigner>, AccountsError> {
    let base = parse_secret(secret)?;
    let primary = PrivateKeySigner::from_bytes(&base).map_err(|err| AccountsError::InvalidKey(err.to_string()))?;
    info!(address = %primary.address(), "Using the configured private key as the primary account");

    let mut signers = Vec::with_capacity(count);
    signers.push(primary);
    if count > 1 {
        warn!("Deriving additional test accounts by incrementing the primary key, only use this on a test network");
    }

    let mut current = U256::from_be_bytes(base.0);
    for index in 1..count {
        let Some(next) = current.checked_add(U256::from(1)) else {
            error!(index, "Incrementing the private key overflowed");
            break;
        };
        current = next;
        match PrivateKeySigner::from_bytes(&B256::from(current)) {
            Ok(signer) => {
                info!(index, address = %signer.address(), "Derived test account");
                signers.push(signer);
            }
            Err(err) => {
                error!(index, error = %err, "Derived key is outside the secp256k1 key range");
                break;
            }
        }
    }

    if signers.len() < count {
        warn!(derived = signers.len(), expected = count, "Fewer test accounts than expected, some tests may fail");
    }
    Ok(signers)
}

/// Local accounts when a usable secret is configured, node managed ones otherwise.
pub fn resolve(secret: Option<&str>, count: usize) -> AccountSource {
    let Some(secret) = secret.filter(|secret| !secret.trim().is_empty()) else {
        warn!("PRIVATE_KEY not set, falling back to accounts managed by the node");
        return AccountSource::NodeManaged;
    };
    match provision(secret, count) {
        Ok(signers) => AccountSource::Local(signers),
        Err(err) => {
            warn!(error = %err, "Ignoring PRIVATE_KEY, falling back to accounts managed by the node");
            AccountSource::NodeManaged
        }
    }
}
