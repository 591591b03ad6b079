use alloy::network::TransactionBuilder;
use alloy::primitives::utils::format_ether;
use alloy::primitives::U256;
use alloy::rpc::types::TransactionRequest;
use harness_ledger::{ActionKind, ActionStatus};
use tracing::{error, info, warn};

use super::Actors;
use crate::core::client::ChainClient;
use crate::core::executor::{OutcomeKind, TransactionExecutor};
use crate::core::orchestrator::StepJournal;

/// Sends `amount` from the chairperson to every other actor that holds less.
///
/// Each transfer is its own action. A failed transfer is recorded and the loop
/// moves on, funding never fails the stage.
pub async fn fund_actors<C: ChainClient>(
    client: &C,
    executor: &TransactionExecutor<'_, C>,
    journal: &mut StepJournal<'_>,
    actors: &Actors,
    amount: U256,
    confirmations: u64,
) {
    let funder = actors.chairperson;
    info!(%funder, amount = %format_ether(amount), "Funding test accounts");

    for (role, recipient) in actors.roles() {
        if recipient == funder {
            continue;
        }
        match client.balance(recipient).await {
            Ok(balance) if balance >= amount => {
                info!(role, %recipient, balance = %format_ether(balance), "Already funded, skipping");
                continue;
            }
            Ok(_) => {}
            Err(err) => warn!(role, %recipient, error = %err, "Could not fetch balance, funding anyway"),
        }

        let handle = journal.begin_action(
            ActionKind::FundAccount { from: funder, to: recipient, value: amount },
            ActionStatus::PendingFund,
        );
        let request = TransactionRequest::default().with_from(funder).with_to(recipient).with_value(amount);
        let context = format!("Fund {role}");
        let outcome = executor.submit(&context, request, confirmations, None).await;

        if let Some(action) = journal.action_mut(handle) {
            action.tx_hash = outcome.tx_hash;
            action.receipt = outcome.receipt_json();
        }
        let status = match outcome.kind {
            OutcomeKind::Mined => ActionStatus::SuccessFund,
            OutcomeKind::Reverted => ActionStatus::FailureFund,
            OutcomeKind::SubmissionFailed => ActionStatus::ExceptionFund,
        };
        if status != ActionStatus::SuccessFund {
            error!(role, %recipient, %status, error = ?outcome.error, "Funding failed");
        }
        journal.finish_action(handle, status, outcome.failure_reason());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy::primitives::{Address, B256};
    use harness_ledger::VotingPayload;

    use super::*;
    use crate::core::client::{ChainError, MockChainClient};
    use crate::tests::fixtures::receipt;

    fn actors() -> Actors {
        Actors::assign(&(1..=5).map(Address::repeat_byte).collect::<Vec<_>>()).unwrap()
    }

    #[tokio::test]
    async fn skips_self_and_funded_accounts_and_keeps_going_after_failures() {
        let actors = actors();
        let amount = U256::from(100);
        let voter1 = actors.voter1;
        let voter2 = actors.voter2;

        let mut client = MockChainClient::new();
        client
            .expect_balance()
            .returning(move |address| Ok(if address == voter1 { U256::from(500) } else { U256::ZERO }));
        // Voter 2 is rejected by the node, everyone else is funded.
        client.expect_send().times(3).returning(move |request| {
            if request.to == Some(voter2.into()) {
                Err(ChainError::Rpc("insufficient funds".to_string()))
            } else {
                Ok(B256::repeat_byte(1))
            }
        });
        client
            .expect_receipt()
            .returning(|hash| Ok(Some(receipt(hash, 5, true, Address::repeat_byte(1), None, None))));
        client.expect_block_number().returning(|| Ok(5));
        client.expect_transaction().returning(|_| Ok(None));
        client.expect_block_by_hash().returning(|_| Ok(None));

        let executor = TransactionExecutor::new(&client, Duration::from_millis(1));
        let mut payload = VotingPayload::default();
        let mut journal = StepJournal::new(&mut payload);
        fund_actors(&client, &executor, &mut journal, &actors, amount, 1).await;

        let recipients: Vec<_> = payload
            .actions
            .iter()
            .map(|action| match &action.kind {
                ActionKind::FundAccount { from, to, value } => {
                    assert_eq!(*from, actors.chairperson);
                    assert_eq!(*value, amount);
                    (*to, action.status)
                }
                other => panic!("unexpected action {other:?}"),
            })
            .collect();
        assert_eq!(
            recipients,
            vec![
                (actors.voter2, ActionStatus::ExceptionFund),
                (actors.voter3, ActionStatus::SuccessFund),
                (actors.unauthorized, ActionStatus::SuccessFund),
            ]
        );
        assert!(payload.actions[0].error.as_deref().is_some_and(|error| error.contains("insufficient funds")));
        assert!(payload.actions[1].tx_hash.is_some());
    }

    #[tokio::test]
    async fn reverted_transfer_is_a_failure() {
        let actors = actors();
        let mut client = MockChainClient::new();
        client.expect_balance().returning(|_| Ok(U256::ZERO));
        client.expect_send().returning(|_| Ok(B256::repeat_byte(9)));
        client
            .expect_receipt()
            .returning(|hash| Ok(Some(receipt(hash, 5, false, Address::repeat_byte(1), None, None))));
        client.expect_block_number().returning(|| Ok(5));
        client.expect_transaction().returning(|_| Ok(None));
        client.expect_block_by_hash().returning(|_| Ok(None));

        let executor = TransactionExecutor::new(&client, Duration::from_millis(1));
        let mut payload = VotingPayload::default();
        let mut journal = StepJournal::new(&mut payload);
        fund_actors(&client, &executor, &mut journal, &actors, U256::from(1), 1).await;

        assert_eq!(payload.actions.len(), 4);
        assert!(payload.actions.iter().all(|action| action.status == ActionStatus::FailureFund));
    }
}
