use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct DeployCliArgs {
    /// Compiled Ballot artifact (Foundry or Hardhat layout).
    #[arg(env = "HARNESS_BALLOT_ARTIFACT", long, default_value = "contracts/out/Ballot.sol/Ballot.json")]
    pub artifact_path: PathBuf,

    /// Blocks to wait for after the deployment is mined, counting its own block.
    #[arg(env = "HARNESS_DEPLOY_CONFIRMATIONS", long, default_value_t = 2)]
    pub confirmations: u64,

    /// Proposal names passed to the constructor.
    #[arg(env = "HARNESS_PROPOSALS", long, value_delimiter = ',', default_value = "Proposal A,Proposal B,Proposal C")]
    pub proposals: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct VoteCliArgs {
    /// Blocks to wait for after each transaction is mined, counting its own block.
    #[arg(env = "HARNESS_TX_CONFIRMATIONS", long, default_value_t = 1)]
    pub confirmations: u64,

    /// Amount of ether sent from the chairperson to every other test account.
    #[arg(env = "HARNESS_FUNDING_AMOUNT", long, default_value = "0.05")]
    pub funding_amount: String,
}
