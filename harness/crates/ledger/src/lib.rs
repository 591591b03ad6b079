//! Persistent record of stage outcomes.
//!
//! Every stage run appends exactly one [`StageRecord`] to a JSON array on disk. Later
//! stages read their inputs back from it, so the file doubles as the hand-off channel
//! between independently launched processes.

mod error;
mod ledger;
mod record;

pub use error::LedgerError;
pub use ledger::{select_latest_success, Ledger, MergePolicy};
pub use record::{
    Action, ActionKind, ActionStatus, CallDetails, DeploymentDetails, DeploymentPayload, FinalState,
    PrecompileInputs, PrecompilePayload, ProposalSnapshot, StageKind, StagePayload, StageRecord, TestResult,
    TestStatus, Verdict, VotingPayload,
};
