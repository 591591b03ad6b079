mod funding;
mod workflow;

use std::time::Duration;

use alloy::primitives::{Address, U256};
use anyhow::Context;
use async_trait::async_trait;
use harness_ledger::{Ledger, StageKind, Verdict, VotingPayload};
use tracing::info;

use crate::contracts::BallotClient;
use crate::core::client::ChainClient;
use crate::core::executor::TransactionExecutor;
use crate::core::orchestrator::{Stage, StageError, StepJournal};
use crate::error::HarnessError;
use crate::stages::log_balances;

pub use funding::fund_actors;
pub use workflow::{VotingWorkflow, EXPECTED_VOTE_COUNT, EXPECTED_WINNER_INDEX, EXPECTED_WINNER_NAME};

/// Proposals snapshotted when the deployment record does not list them.
const DEFAULT_PROPOSAL_COUNT: usize = 3;

const ROLES: [&str; 5] = ["Chairperson", "Voter 1", "Voter 2", "Voter 3 (no rights)", "Unauthorized signer"];

/// Accounts and the part each one plays in the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actors {
    pub chairperson: Address,
    pub voter1: Address,
    pub voter2: Address,
    pub voter3: Address,
    pub unauthorized: Address,
}

impl Actors {
    /// Assigns roles in order. All five are needed.
    pub fn assign(accounts: &[Address]) -> Result<Self, HarnessError> {
        if accounts.len() < ROLES.len() {
            return Err(HarnessError::MissingActor {
                role: ROLES[accounts.len()],
                available: accounts.len(),
                required: ROLES.len(),
            });
        }
        Ok(Self {
            chairperson: accounts[0],
            voter1: accounts[1],
            voter2: accounts[2],
            voter3: accounts[3],
            unauthorized: accounts[4],
        })
    }

    pub fn roles(&self) -> [(&'static str, Address); 5] {
        [
            (ROLES[0], self.chairperson),
            (ROLES[1], self.voter1),
            (ROLES[2], self.voter2),
            (ROLES[3], self.voter3),
            (ROLES[4], self.unauthorized),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotingSettings {
    pub confirmations: u64,
    pub funding_amount: U256,
    pub poll_interval: Duration,
}

/// Stage 3: exercises the Ballot deployed by the most recent successful stage 2.
pub struct VotingStage<'a, C> {
    client: &'a C,
    ledger: &'a Ledger,
    accounts: Vec<Address>,
    settings: VotingSettings,
}

impl<'a, C: ChainClient> VotingStage<'a, C> {
    pub fn new(client: &'a C, ledger: &'a Ledger, accounts: Vec<Address>, settings: VotingSettings) -> Self {
        Self { client, ledger, accounts, settings }
    }
}

#[async_trait]
impl<C: ChainClient> Stage for VotingStage<'_, C> {
    type Payload = VotingPayload;

    fn kind(&self) -> StageKind {
        StageKind::Voting
    }

    async fn execute(&mut self, payload: &mut Self::Payload) -> Result<Verdict, StageError> {
        let deployment = self
            .ledger
            .latest_success(StageKind::Deployment)
            .context("Failed to load deployment data, run the deploy stage first")?;
        let stage = deployment.stage.as_str();
        let details = deployment
            .deployment()
            .ok_or_else(|| anyhow::anyhow!("{stage} record does not look like a deployment"))?;
        let address = details.require_address(stage).context("Invalid deployment record")?;
        let interface = details.interface(stage).context("Invalid deployment record")?;
        let proposal_count = match details.deployment_details.proposals.len() {
            0 => DEFAULT_PROPOSAL_COUNT,
            count => count,
        };
        info!(%address, deployed_at = %deployment.timestamp, proposal_count, "Using deployed Ballot");

        let actors = Actors::assign(&self.accounts).map_err(anyhow::Error::from)?;
        for (role, address) in actors.roles() {
            info!(role, %address, "Actor");
        }
        log_balances(self.client, "Initial account balances", &actors.roles()).await;

        let executor = TransactionExecutor::new(self.client, self.settings.poll_interval);
        let mut journal = StepJournal::new(payload);
        let VotingSettings { confirmations, funding_amount, .. } = self.settings;
        fund_actors(self.client, &executor, &mut journal, &actors, funding_amount, confirmations).await;
        log_balances(self.client, "Balances after funding", &actors.roles()).await;

        let ballot = BallotClient::new(self.client, address);
        VotingWorkflow::new(ballot, executor, journal, actors, interface)
            .with_confirmations(confirmations)
            .with_proposal_count(proposal_count)
            .run()
            .await?;
        Ok(Verdict::Success)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn assigns_roles_in_order() {
        let accounts: Vec<Address> = (1..=6).map(Address::repeat_byte).collect();
        let actors = Actors::assign(&accounts).unwrap();
        assert_eq!(actors.chairperson, accounts[0]);
        assert_eq!(actors.unauthorized, accounts[4]);
    }

    #[test]
    fn names_the_first_missing_role() {
        let accounts: Vec<Address> = (1..=3).map(Address::repeat_byte).collect();
        assert_matches!(
            Actors::assign(&accounts),
            Err(HarnessError::MissingActor { role: "Voter 3 (no rights)", available: 3, required: 5 })
        );
    }
}
