// Chain access and the machinery every stage shares

pub mod client;
pub mod executor;
pub mod inspector;
pub mod orchestrator;

pub use client::{AlloyChainClient, ChainClient, ChainError};
pub use executor::{OutcomeKind, RevertCheck, TransactionExecutor, TransactionOutcome};
pub use inspector::{ChainInspector, DecodedCall, DecodedLog, Diagnostics};
pub use orchestrator::{Stage, StageError, StageOrchestrator, StageTermination, StepFailure, StepJournal};
