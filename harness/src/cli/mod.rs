mod network;
mod stage;

use clap::{Parser, Subcommand};
use harness_ledger::StageKind;
pub use network::{LedgerCliArgs, NetworkCliArgs};
pub use stage::{DeployCliArgs, VoteCliArgs};

/// CDK Erigon staged integration harness
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub network: NetworkCliArgs,

    #[command(flatten)]
    pub ledger: LedgerCliArgs,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Stage 1: call the sha256 precompile directly and check its output
    Precompile,

    /// Stage 2: deploy the Ballot contract
    Deploy(DeployCliArgs),

    /// Stage 3: run the voting workflow against the last deployed Ballot
    Vote(VoteCliArgs),
}

impl Commands {
    pub fn stage_kind(&self) -> StageKind {
        match self {
            Commands::Precompile => StageKind::Precompile,
            Commands::Deploy(_) => StageKind::Deployment,
            Commands::Vote(_) => StageKind::Voting,
        }
    }
}
