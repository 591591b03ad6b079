use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::utils::parse_ether;
use alloy::primitives::U256;
use harness_ledger::StageKind;
use url::Url;

use crate::cli::{CliArgs, Commands};
use crate::contracts::encode_bytes32_string;
use crate::error::ConfigError;

/// Validated configuration of a single harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub rpc_url: Url,
    pub chain_id: Option<u64>,
    pub private_key: Option<String>,
    pub network: String,
    pub results_path: PathBuf,
    pub poll_interval: Duration,
    pub stage: StageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageConfig {
    Precompile,
    Deploy(DeploySettings),
    Vote(VoteSettings),
}

impl StageConfig {
    pub fn kind(&self) -> StageKind {
        match self {
            StageConfig::Precompile => StageKind::Precompile,
            StageConfig::Deploy(_) => StageKind::Deployment,
            StageConfig::Vote(_) => StageKind::Voting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub artifact_path: PathBuf,
    pub confirmations: u64,
    pub proposals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSettings {
    pub confirmations: u64,
    pub funding_amount: U256,
}

impl TryFrom<CliArgs> for HarnessConfig {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let rpc_url = args.network.rpc_url.ok_or(ConfigError::MissingRpcUrl)?;

        let stage = match args.command {
            Commands::Precompile => StageConfig::Precompile,
            Commands::Deploy(deploy) => {
                let proposals: Vec<String> = deploy
                    .proposals
                    .into_iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect();
                if proposals.is_empty() {
                    return Err(ConfigError::NoProposals);
                }
                if let Some(name) = proposals.iter().find(|name| encode_bytes32_string(name).is_err()) {
                    return Err(ConfigError::ProposalTooLong(name.clone()));
                }
                StageConfig::Deploy(DeploySettings {
                    artifact_path: deploy.artifact_path,
                    confirmations: deploy.confirmations,
                    proposals,
                })
            }
            Commands::Vote(vote) => {
                let funding_amount = parse_ether(&vote.funding_amount)
                    .map_err(|err| ConfigError::InvalidFundingAmount(vote.funding_amount.clone(), err.to_string()))?;
                StageConfig::Vote(VoteSettings { confirmations: vote.confirmations, funding_amount })
            }
        };

        Ok(Self {
            rpc_url,
            chain_id: args.network.chain_id,
            private_key: args.network.private_key.filter(|key| !key.trim().is_empty()),
            network: args.ledger.network,
            results_path: args.ledger.results_path,
            poll_interval: Duration::from_millis(args.network.poll_interval_ms),
            stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::Parser;
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("cdk-harness").chain(args.iter().copied())).expect("valid arguments")
    }

    #[test]
    fn deploy_defaults() {
        let config = HarnessConfig::try_from(parse(&["--rpc-url", "http://localhost:8123", "deploy"])).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.network, "cdkErigon");
        assert_eq!(config.results_path, PathBuf::from("results/results.json"));
        assert_matches!(config.stage, StageConfig::Deploy(settings) => {
            assert_eq!(settings.confirmations, 2);
            assert_eq!(settings.proposals, vec!["Proposal A", "Proposal B", "Proposal C"]);
        });
    }

    #[test]
    fn vote_parses_funding_amount() {
        let config = HarnessConfig::try_from(parse(&[
            "--rpc-url",
            "http://localhost:8123",
            "vote",
            "--funding-amount",
            "0.05",
        ]))
        .unwrap();
        assert_eq!(
            config.stage,
            StageConfig::Vote(VoteSettings {
                confirmations: 1,
                funding_amount: U256::from(50_000_000_000_000_000u64)
            })
        );
    }

    #[rstest]
    #[case::bad_amount(&["--rpc-url", "http://localhost:8123", "vote", "--funding-amount", "lots"])]
    #[case::long_proposal(&[
        "--rpc-url",
        "http://localhost:8123",
        "deploy",
        "--proposals",
        "a proposal name that is far too long for bytes32",
    ])]
    #[case::empty_proposals(&["--rpc-url", "http://localhost:8123", "deploy", "--proposals", " "])]
    fn rejects_invalid_stage_settings(#[case] args: &[&str]) {
        assert!(HarnessConfig::try_from(parse(args)).is_err());
    }

    #[test]
    fn blank_private_key_is_ignored() {
        let config =
            HarnessConfig::try_from(parse(&["--rpc-url", "http://localhost:8123", "--private-key", " ", "precompile"]))
                .unwrap();
        assert_eq!(config.private_key, None);
        assert_eq!(config.stage.kind(), StageKind::Precompile);
    }
}
