use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use thiserror::Error;

use crate::core::client::{ChainClient, ChainError};

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    interface Ballot {
        function chairperson() external view returns (address);
        function voters(address voter)
            external
            view
            returns (uint256 weight, bool voted, address delegate, uint256 vote);
        function proposals(uint256 index) external view returns (bytes32 name, uint256 voteCount);
        function giveRightToVote(address voter) external;
        function delegate(address to) external;
        function vote(uint256 proposal) external;
        function winningProposal() external view returns (uint256 winningProposal_);
        function winnerName() external view returns (bytes32 winnerName_);
    }
}

/// Revert reason of `vote` for an account without voting weight.
pub const NO_RIGHT_TO_VOTE: &str = "Has no right to vote";
/// Revert reason of `giveRightToVote` when not sent by the chairperson.
pub const ONLY_CHAIRPERSON: &str = "Only chairperson can give right to vote.";

#[derive(Error, Debug)]
pub enum BallotError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("failed to decode return data: {0}")]
    Decode(#[from] alloy::sol_types::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("'{0}' is longer than 31 bytes and cannot be stored as a bytes32 string")]
pub struct Bytes32Error(pub String);

/// NUL padded UTF-8 in a single word, leaving room for the terminator.
pub fn encode_bytes32_string(text: &str) -> Result<B256, Bytes32Error> {
    let bytes = text.as_bytes();
    if bytes.len() > 31 {
        return Err(Bytes32Error(text.to_string()));
    }
    let mut word = B256::ZERO;
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(word)
}

pub fn decode_bytes32_string(word: &B256) -> String {
    let end = word.iter().position(|byte| *byte == 0).unwrap_or(word.len());
    String::from_utf8_lossy(&word[..end]).into_owned()
}

/// Constructor arguments, to be appended to the creation bytecode.
pub fn constructor_args(proposals: &[B256]) -> Bytes {
    Bytes::from((proposals.to_vec(),).abi_encode_params())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub name: String,
    pub vote_count: U256,
}

/// Typed access to a deployed Ballot through a [`ChainClient`].
///
/// Views are executed with `eth_call`. State changing methods only build the
/// request, sending it is up to the caller.
pub struct BallotClient<'a, C> {
    client: &'a C,
    address: Address,
}

impl<'a, C: ChainClient> BallotClient<'a, C> {
    pub fn new(client: &'a C, address: Address) -> Self {
        Self { client, address }
    }

    async fn view<T: SolCall>(&self, call: T) -> Result<T::Return, BallotError> {
        let request = TransactionRequest::default().with_to(self.address).with_input(call.abi_encode());
        let output = self.client.call(request).await?;
        Ok(T::abi_decode_returns(&output)?)
    }

    fn request<T: SolCall>(&self, from: Address, call: T) -> TransactionRequest {
        TransactionRequest::default().with_from(from).with_to(self.address).with_input(call.abi_encode())
    }

    pub async fn voter(&self, voter: Address) -> Result<Ballot::votersReturn, BallotError> {
        self.view(Ballot::votersCall { voter }).await
    }

    pub async fn proposal(&self, index: U256) -> Result<Proposal, BallotError> {
        let proposal = self.view(Ballot::proposalsCall { index }).await?;
        Ok(Proposal { name: decode_bytes32_string(&proposal.name), vote_count: proposal.voteCount })
    }

    pub async fn winning_proposal(&self) -> Result<U256, BallotError> {
        self.view(Ballot::winningProposalCall {}).await
    }

    pub async fn winner_name(&self) -> Result<String, BallotError> {
        let name = self.view(Ballot::winnerNameCall {}).await?;
        Ok(decode_bytes32_string(&name))
    }

    pub fn give_right_to_vote(&self, from: Address, voter: Address) -> TransactionRequest {
        self.request(from, Ballot::giveRightToVoteCall { voter })
    }

    pub fn delegate(&self, from: Address, to: Address) -> TransactionRequest {
        self.request(from, Ballot::delegateCall { to })
    }

    pub fn vote(&self, from: Address, proposal: U256) -> TransactionRequest {
        self.request(from, Ballot::voteCall { proposal })
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use assert_matches::assert_matches;
    use mockall::predicate::function;
    use rstest::rstest;

    use super::*;
    use crate::core::client::MockChainClient;

    const BALLOT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

    #[rstest]
    #[case("Proposal A")]
    #[case("")]
    #[case("exactly thirty-one bytes long!!")]
    fn bytes32_strings_survive_encoding(#[case] text: &str) {
        let word = encode_bytes32_string(text).unwrap();
        assert_eq!(decode_bytes32_string(&word), text);
    }

    #[test]
    fn bytes32_rejects_long_strings() {
        let text = "a".repeat(32);
        assert_eq!(encode_bytes32_string(&text), Err(Bytes32Error(text.clone())));
    }

    #[test]
    fn bytes32_layout_is_left_aligned() {
        let word = encode_bytes32_string("AB").unwrap();
        assert_eq!(word[0], b'A');
        assert_eq!(word[1], b'B');
        assert!(word[2..].iter().all(|byte| *byte == 0));
    }

    #[tokio::test]
    async fn proposal_view_decodes_name_and_count() {
        let mut client = MockChainClient::new();
        client
            .expect_call()
            .with(function(|request: &TransactionRequest| {
                request.to == Some(BALLOT.into())
                    && request.input.input().is_some_and(|input| input.starts_with(&Ballot::proposalsCall::SELECTOR))
            }))
            .returning(|_| {
                let name = encode_bytes32_string("Proposal A").unwrap();
                Ok(Bytes::from((name, U256::from(2)).abi_encode_params()))
            });

        let ballot = BallotClient::new(&client, BALLOT);
        let proposal = ballot.proposal(U256::ZERO).await.unwrap();
        assert_eq!(proposal, Proposal { name: "Proposal A".to_string(), vote_count: U256::from(2) });
    }

    #[tokio::test]
    async fn view_propagates_revert() {
        let mut client = MockChainClient::new();
        client.expect_call().returning(|_| Err(ChainError::Rpc("connection refused".to_string())));

        let ballot = BallotClient::new(&client, BALLOT);
        assert_matches!(ballot.winning_proposal().await, Err(BallotError::Chain(ChainError::Rpc(_))));
    }

    #[test]
    fn requests_target_the_contract() {
        let client = MockChainClient::new();
        let ballot = BallotClient::new(&client, BALLOT);
        let from = Address::repeat_byte(1);

        let request = ballot.vote(from, U256::from(1));
        assert_eq!(request.from, Some(from));
        assert_eq!(request.to, Some(BALLOT.into()));
        let input = request.input.input().cloned().unwrap_or_default();
        assert_eq!(
            Ballot::voteCall::abi_decode(&input).unwrap(),
            Ballot::voteCall { proposal: U256::from(1) }
        );
    }
}
