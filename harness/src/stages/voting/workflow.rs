use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use harness_ledger::{ActionKind, ActionStatus, FinalState, ProposalSnapshot, TestStatus};
use tracing::{info, warn};

use super::Actors;
use crate::contracts::ballot::{BallotClient, NO_RIGHT_TO_VOTE, ONLY_CHAIRPERSON};
use crate::core::client::ChainClient;
use crate::core::executor::{OutcomeKind, RevertCheck, TransactionExecutor};
use crate::core::orchestrator::{StepFailure, StepJournal, TestHandle};
use crate::utils::short_address;

pub const EXPECTED_VOTE_COUNT: u64 = 2;
pub const EXPECTED_WINNER_INDEX: u64 = 0;
pub const EXPECTED_WINNER_NAME: &str = "Proposal A";

const INITIAL_STATE: &str = "Initial State Checks";
const VOTER1_VOTES: &str = "Voting Process - Voter1 Votes";
const VOTER2_DELEGATES: &str = "Voting Process - Voter2 Delegates to Voter1";
const VERIFY_VOTE_COUNT: &str = "Voting Process - Verify Vote Count";
const FINAL_STATE: &str = "Final State Verification";

/// The scripted Ballot scenario. Every phase stops the workflow at its first
/// failed check.
pub struct VotingWorkflow<'a, 'j, C> {
    ballot: BallotClient<'a, C>,
    executor: TransactionExecutor<'a, C>,
    journal: StepJournal<'j>,
    actors: Actors,
    interface: JsonAbi,
    confirmations: u64,
    proposal_count: usize,
}

impl<'a, 'j, C: ChainClient> VotingWorkflow<'a, 'j, C> {
    pub fn new(
        ballot: BallotClient<'a, C>,
        executor: TransactionExecutor<'a, C>,
        journal: StepJournal<'j>,
        actors: Actors,
        interface: JsonAbi,
    ) -> Self {
        Self { ballot, executor, journal, actors, interface, confirmations: 1, proposal_count: 3 }
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn with_proposal_count(mut self, proposal_count: usize) -> Self {
        self.proposal_count = proposal_count;
        self
    }

    pub async fn run(mut self) -> Result<(), StepFailure> {
        self.initial_state().await?;
        self.grant_rights().await?;
        self.vote_and_delegate().await?;
        self.unauthorized_attempts().await?;
        self.final_state().await
    }

    async fn initial_state(&mut self) -> Result<(), StepFailure> {
        let test = self.journal.begin_test(INITIAL_STATE);
        let chairperson = self.weight(test, self.actors.chairperson).await?;
        self.journal.ensure_eq(test, chairperson, U256::from(1), "Chairperson weight")?;
        let voter1 = self.weight(test, self.actors.voter1).await?;
        self.journal.ensure_eq(test, voter1, U256::ZERO, "Voter 1 weight before any grant")?;
        self.journal.pass(test, TestStatus::Passed);
        Ok(())
    }

    async fn grant_rights(&mut self) -> Result<(), StepFailure> {
        let chairperson = self.actors.chairperson;
        for voter in [self.actors.voter1, self.actors.voter2] {
            let name = format!("Grant Voting Rights to {}...", short_address(&voter));
            let test = self.journal.begin_test(name.as_str());
            let request = self.ballot.give_right_to_vote(chairperson, voter);
            self.transact(test, &name, ActionKind::GrantVoteRight { by: chairperson, to: voter }, request).await?;

            let weight = self.weight(test, voter).await?;
            self.journal.ensure_eq(test, weight, U256::from(1), "Weight after grant")?;
            self.journal.pass(test, TestStatus::Passed);
        }
        Ok(())
    }

    async fn vote_and_delegate(&mut self) -> Result<(), StepFailure> {
        let Actors { voter1, voter2, .. } = self.actors;

        let test = self.journal.begin_test(VOTER1_VOTES);
        let request = self.ballot.vote(voter1, U256::from(EXPECTED_WINNER_INDEX));
        let action = ActionKind::Vote { voter: voter1, proposal_index: EXPECTED_WINNER_INDEX };
        self.transact(test, VOTER1_VOTES, action, request).await?;
        let voted = self.journal.guard(test, self.ballot.voter(voter1).await)?.voted;
        self.journal.ensure_eq(test, voted, true, "Voter 1 voted flag")?;
        self.journal.pass(test, TestStatus::Passed);

        let test = self.journal.begin_test(VOTER2_DELEGATES);
        let request = self.ballot.delegate(voter2, voter1);
        self.transact(test, VOTER2_DELEGATES, ActionKind::Delegate { delegator: voter2, to: voter1 }, request).await?;
        let delegate = self.journal.guard(test, self.ballot.voter(voter2).await)?.delegate;
        self.journal.ensure_eq(test, delegate, voter1, "Voter 2 delegate")?;
        self.journal.pass(test, TestStatus::Passed);

        let test = self.journal.begin_test(VERIFY_VOTE_COUNT);
        let proposal = self.journal.guard(test, self.ballot.proposal(U256::from(EXPECTED_WINNER_INDEX)).await)?;
        info!(proposal = %proposal.name, votes = %proposal.vote_count, "Vote count after voting and delegation");
        self.journal.ensure_eq(test, proposal.vote_count, U256::from(EXPECTED_VOTE_COUNT), "Vote count of proposal 0")?;
        self.journal.pass(test, TestStatus::Passed);
        Ok(())
    }

    async fn unauthorized_attempts(&mut self) -> Result<(), StepFailure> {
        let Actors { voter3, unauthorized, .. } = self.actors;

        let name = format!("Negative Test - Unauthorized Vote by {}...", short_address(&voter3));
        let test = self.journal.begin_test(name.as_str());
        let request = self.ballot.vote(voter3, U256::from(EXPECTED_WINNER_INDEX));
        let action = ActionKind::UnauthorizedVoteAttempt { voter: voter3 };
        self.expect_rejection(test, &name, action, request, NO_RIGHT_TO_VOTE).await?;

        let name = format!("Negative Test - Unauthorized Grant by {}...", short_address(&unauthorized));
        let test = self.journal.begin_test(name.as_str());
        let request = self.ballot.give_right_to_vote(unauthorized, voter3);
        let action = ActionKind::UnauthorizedGrantAttempt { granter: unauthorized, to: voter3 };
        self.expect_rejection(test, &name, action, request, ONLY_CHAIRPERSON).await
    }

    async fn final_state(&mut self) -> Result<(), StepFailure> {
        let test = self.journal.begin_test(FINAL_STATE);
        let winner_index = self.journal.guard(test, self.ballot.winning_proposal().await)?;
        let winner_name = self.journal.guard(test, self.ballot.winner_name().await)?;
        let all_proposals = self.snapshot_proposals().await;

        let winning_proposal_vote_count = usize::try_from(winner_index)
            .ok()
            .and_then(|index| all_proposals.get(index))
            .and_then(|proposal| proposal.vote_count);
        info!(%winner_index, winner_name = %winner_name, votes = ?winning_proposal_vote_count, "Final state");
        self.journal.payload_mut().final_state = Some(FinalState {
            winner_index: Some(winner_index),
            winner_name: winner_name.clone(),
            winning_proposal_vote_count,
            all_proposals,
        });

        self.journal.ensure_eq(test, winner_index, U256::from(EXPECTED_WINNER_INDEX), "Winning proposal index")?;
        self.journal.ensure_eq(test, winner_name, EXPECTED_WINNER_NAME.to_string(), "Winning proposal name")?;
        self.journal.pass(test, TestStatus::Passed);
        Ok(())
    }

    /// Reads every proposal. Unreadable ones keep their error instead of a count.
    async fn snapshot_proposals(&self) -> Vec<ProposalSnapshot> {
        let mut snapshots = Vec::with_capacity(self.proposal_count);
        for index in 0..self.proposal_count {
            match self.ballot.proposal(U256::from(index)).await {
                Ok(proposal) => snapshots.push(ProposalSnapshot {
                    name: proposal.name,
                    vote_count: Some(proposal.vote_count),
                    error: None,
                }),
                Err(err) => {
                    warn!(index, error = %err, "Could not read proposal");
                    snapshots.push(ProposalSnapshot {
                        name: format!("Proposal #{index}"),
                        vote_count: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        snapshots
    }

    async fn weight(&mut self, test: TestHandle, voter: Address) -> Result<U256, StepFailure> {
        let result = self.ballot.voter(voter).await.map(|info| info.weight);
        self.journal.guard(test, result)
    }

    /// Submits a state changing call that has to succeed.
    async fn transact(
        &mut self,
        test: TestHandle,
        context: &str,
        kind: ActionKind,
        request: TransactionRequest,
    ) -> Result<(), StepFailure> {
        let action = self.journal.begin_action(kind, ActionStatus::PendingAction);
        let outcome = self.executor.submit(context, request, self.confirmations, Some(&self.interface)).await;

        if let Some(entry) = self.journal.action_mut(action) {
            entry.tx_hash = outcome.tx_hash;
            entry.receipt = outcome.receipt_json();
        }
        let status = match outcome.kind {
            OutcomeKind::Mined => ActionStatus::SuccessAction,
            OutcomeKind::Reverted => ActionStatus::FailureAction,
            OutcomeKind::SubmissionFailed => ActionStatus::ExceptionAction,
        };
        let reason = outcome.failure_reason();
        self.journal.finish_action(action, status, reason.clone());
        match reason {
            None => Ok(()),
            Some(reason) => Err(self.journal.fail(test, reason)),
        }
    }

    /// Submits a call the contract must reject with `expected`.
    async fn expect_rejection(
        &mut self,
        test: TestHandle,
        context: &str,
        kind: ActionKind,
        request: TransactionRequest,
        expected: &str,
    ) -> Result<(), StepFailure> {
        let action = self.journal.begin_action(kind, ActionStatus::PendingAction);
        let check =
            self.executor.expect_revert(context, request, expected, self.confirmations, Some(&self.interface)).await;

        match check {
            RevertCheck::Matched { reason, recovered } => {
                if let (Some(outcome), Some(entry)) = (recovered, self.journal.action_mut(action)) {
                    entry.tx_hash = outcome.tx_hash;
                    entry.receipt = outcome.receipt_json();
                }
                info!(context, reason = %reason, "Rejected as expected");
                self.journal.finish_action(action, ActionStatus::SuccessRevertedExpectedly, None);
                self.journal.pass(test, TestStatus::PassedRevertedExpectedly);
                Ok(())
            }
            RevertCheck::Mismatched { reason, message } => {
                let actual = reason.unwrap_or(message);
                let failure = format!("expected revert with '{expected}', got '{actual}'");
                self.journal.finish_action(action, ActionStatus::FailureAction, Some(failure.clone()));
                Err(self.journal.fail(test, failure))
            }
            RevertCheck::NotReverted { outcome } => {
                if let Some(entry) = self.journal.action_mut(action) {
                    entry.tx_hash = outcome.tx_hash;
                    entry.receipt = outcome.receipt_json();
                }
                let failure = match outcome.failure_reason() {
                    Some(reason) => {
                        format!("expected revert with '{expected}', the transaction failed otherwise: {reason}")
                    }
                    None => format!("expected revert with '{expected}', but the transaction succeeded"),
                };
                self.journal.finish_action(action, ActionStatus::FailureAction, Some(failure.clone()));
                Err(self.journal.fail(test, failure))
            }
        }
    }
}
