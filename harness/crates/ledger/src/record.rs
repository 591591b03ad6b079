use std::fmt;

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use tracing::warn;
use uuid::Uuid;

use crate::error::LedgerError;

const PRECOMPILE_LABEL: &str = "Stage 1: Raw Precompile Invocation (sha256)";
const DEPLOYMENT_LABEL: &str = "Stage 2: Contract Deployment (Ballot)";
const VOTING_LABEL: &str = "Stage 3: Contract Invocation and Tests (Ballot)";

/// The three stages the harness knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Precompile,
    Deployment,
    Voting,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Precompile, StageKind::Deployment, StageKind::Voting];

    /// Stable label written into the `stage` field of every record.
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Precompile => PRECOMPILE_LABEL,
            StageKind::Deployment => DEPLOYMENT_LABEL,
            StageKind::Voting => VOTING_LABEL,
        }
    }

    /// Label used when the stage aborted outside of its own step handling.
    pub fn crash_label(&self) -> String {
        format!("{} - CRASH", self.label())
    }

    /// Recognises both the plain label and any suffixed variant of it.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| label.starts_with(kind.label()))
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Pending,
    Success,
    Failure,
}

/// One entry of the ledger.
///
/// The envelope fields are shared by every stage, the rest of the object is the
/// stage specific [`StagePayload`] flattened next to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: String,
    pub verdict: Verdict,
    pub timestamp: DateTime<Utc>,
    pub network_used: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_chain: Option<String>,
    #[serde(flatten)]
    pub payload: StagePayload,
}

impl StageRecord {
    pub fn new(stage: impl Into<String>, verdict: Verdict, payload: StagePayload) -> Self {
        Self {
            stage: stage.into(),
            verdict,
            timestamp: Utc::now(),
            network_used: String::new(),
            run_id: None,
            error: None,
            error_chain: None,
            payload,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_error(mut self, error: Option<String>, error_chain: Option<String>) -> Self {
        self.error = error;
        self.error_chain = error_chain;
        self
    }

    pub fn kind(&self) -> Option<StageKind> {
        StageKind::from_label(&self.stage)
    }

    pub fn is_success_of(&self, kind: StageKind) -> bool {
        self.verdict == Verdict::Success && self.kind() == Some(kind)
    }

    pub fn deployment(&self) -> Option<&DeploymentPayload> {
        match &self.payload {
            StagePayload::Deployment(payload) => Some(payload),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStageRecord {
    stage: String,
    verdict: Verdict,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    network_used: String,
    #[serde(default)]
    run_id: Option<Uuid>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_chain: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl<'de> Deserialize<'de> for StageRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawStageRecord::deserialize(deserializer)?;
        let payload = StagePayload::from_fields(StageKind::from_label(&raw.stage), raw.rest);
        Ok(Self {
            stage: raw.stage,
            verdict: raw.verdict,
            timestamp: raw.timestamp,
            network_used: raw.network_used,
            run_id: raw.run_id,
            error: raw.error,
            error_chain: raw.error_chain,
            payload,
        })
    }
}

/// Stage specific part of a record. Entries whose shape does not match their stage
/// (older writers, hand edits) are kept verbatim in [`StagePayload::Other`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StagePayload {
    Precompile(PrecompilePayload),
    Deployment(DeploymentPayload),
    Voting(VotingPayload),
    Other(Map<String, Value>),
}

impl StagePayload {
    fn from_fields(kind: Option<StageKind>, fields: Map<String, Value>) -> Self {
        let value = Value::Object(fields.clone());
        let parsed = match kind {
            Some(StageKind::Precompile) => serde_json::from_value(value).map(StagePayload::Precompile),
            Some(StageKind::Deployment) => serde_json::from_value(value).map(StagePayload::Deployment),
            Some(StageKind::Voting) => serde_json::from_value(value).map(StagePayload::Voting),
            None => return StagePayload::Other(fields),
        };
        parsed.unwrap_or_else(|err| {
            warn!(error = %err, "Stage payload does not match its stage, keeping it as raw JSON");
            StagePayload::Other(fields)
        })
    }
}

impl From<PrecompilePayload> for StagePayload {
    fn from(payload: PrecompilePayload) -> Self {
        StagePayload::Precompile(payload)
    }
}

impl From<DeploymentPayload> for StagePayload {
    fn from(payload: DeploymentPayload) -> Self {
        StagePayload::Deployment(payload)
    }
}

impl From<VotingPayload> for StagePayload {
    fn from(payload: VotingPayload) -> Self {
        StagePayload::Voting(payload)
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrecompilePayload {
    pub inputs: PrecompileInputs,
    pub call_details: CallDetails,
    pub decoded_output: Option<Bytes>,
    pub expected_output: Option<B256>,
    /// Always empty, a read-only call produces no transaction.
    pub transaction_hash: Option<B256>,
    pub receiver_address: Option<Address>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub block_number: Option<u64>,
    pub validation_notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrecompileInputs {
    pub precompile_address: Address,
    pub input_data_hex: Bytes,
    pub input_data_string: String,
    pub caller_address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallDetails {
    pub block_hash: Option<B256>,
    pub block_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_data: Option<Bytes>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentPayload {
    pub contract_address: Option<Address>,
    pub transaction_hash: Option<B256>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub block_number: Option<u64>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub gas_used: Option<u64>,
    /// Either a standard JSON ABI or a list of human-readable signatures.
    pub contract_abi: Option<Value>,
    pub deployment_details: DeploymentDetails,
}

impl DeploymentPayload {
    pub fn require_address(&self, stage: &str) -> Result<Address, LedgerError> {
        self.contract_address
            .ok_or_else(|| LedgerError::MissingField { stage: stage.to_string(), field: "contractAddress" })
    }

    /// Parses the stored ABI into an interface usable for encoding and decoding.
    pub fn interface(&self, stage: &str) -> Result<JsonAbi, LedgerError> {
        let abi = match &self.contract_abi {
            Some(Value::Null) | None => {
                return Err(LedgerError::MissingField { stage: stage.to_string(), field: "contractAbi" });
            }
            Some(abi) => abi,
        };
        let invalid = |reason: String| LedgerError::InvalidAbi { stage: stage.to_string(), reason };

        let human_readable = abi
            .as_array()
            .filter(|items| !items.is_empty() && items.iter().all(Value::is_string))
            .map(|items| items.iter().filter_map(Value::as_str).collect::<Vec<_>>());

        match human_readable {
            Some(signatures) => JsonAbi::parse(signatures).map_err(|err| invalid(err.to_string())),
            None => serde_json::from_value(abi.clone()).map_err(|err| invalid(err.to_string())),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeploymentDetails {
    pub network: String,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub chain_id: Option<u64>,
    pub deployer: Option<Address>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub gas_price: Option<u128>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub gas_limit: Option<u64>,
    pub code_size: Option<usize>,
    pub proposals: Vec<String>,
    pub receipt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VotingPayload {
    pub actions: Vec<Action>,
    pub test_results: Vec<TestResult>,
    pub final_state: Option<FinalState>,
}

impl VotingPayload {
    pub fn test(&self, name: &str) -> Option<&TestResult> {
        self.test_results.iter().find(|result| result.test == name)
    }
}

/// A chain interaction attempted by the voting workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind, status: ActionStatus) -> Self {
        Self { kind, status, tx_hash: None, receipt: None, error: None }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum ActionKind {
    FundAccount {
        from: Address,
        to: Address,
        #[serde_as(as = "DisplayFromStr")]
        value: U256,
    },
    GrantVoteRight {
        by: Address,
        to: Address,
    },
    Vote {
        voter: Address,
        proposal_index: u64,
    },
    Delegate {
        delegator: Address,
        to: Address,
    },
    UnauthorizedVoteAttempt {
        voter: Address,
    },
    UnauthorizedGrantAttempt {
        granter: Address,
        to: Address,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    PendingFund,
    SuccessFund,
    FailureFund,
    ExceptionFund,
    PendingAction,
    SuccessAction,
    FailureAction,
    ExceptionAction,
    SuccessRevertedExpectedly,
}

impl ActionStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, ActionStatus::PendingFund | ActionStatus::PendingAction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TestStatus {
    PendingTest,
    Passed,
    PassedRevertedExpectedly,
    Failed,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinalState {
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub winner_index: Option<U256>,
    pub winner_name: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub winning_proposal_vote_count: Option<U256>,
    pub all_proposals: Vec<ProposalSnapshot>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProposalSnapshot {
    pub name: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub vote_count: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
