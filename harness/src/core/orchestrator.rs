use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;

use async_trait::async_trait;
use futures::FutureExt;
use harness_ledger::{
    Action, ActionKind, ActionStatus, Ledger, MergePolicy, StageKind, StagePayload, StageRecord, TestResult, TestStatus,
    Verdict, VotingPayload,
};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A step that did not go as expected. The stage stops at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}: {reason}")]
pub struct StepFailure {
    pub context: String,
    pub reason: String,
}

impl StepFailure {
    pub fn new(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { context: context.into(), reason: reason.into() }
    }
}

#[derive(Error, Debug)]
pub enum StageError {
    /// A step failed. The record is still a regular one, with verdict `failure`.
    #[error(transparent)]
    Step(#[from] StepFailure),

    /// Anything outside of step handling, e.g. missing inputs during setup. The record
    /// gets the crash label.
    #[error(transparent)]
    Crash(#[from] anyhow::Error),
}

/// One stage of the harness.
///
/// `execute` fills in the payload as it goes, so whatever it managed to collect is
/// persisted no matter how it ends.
#[async_trait]
pub trait Stage: Send {
    type Payload: Default + Into<StagePayload> + Send;

    fn kind(&self) -> StageKind;

    fn merge_policy(&self) -> MergePolicy {
        self.kind().merge_policy()
    }

    async fn execute(&mut self, payload: &mut Self::Payload) -> Result<Verdict, StageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTermination {
    Completed(Verdict),
    Crashed,
}

impl StageTermination {
    /// Only a crash fails the process. A failed verdict is data, it lives in the ledger.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            StageTermination::Completed(_) => ExitCode::SUCCESS,
            StageTermination::Crashed => ExitCode::FAILURE,
        }
    }
}

/// Runs stages and guarantees that every run leaves exactly one record behind.
pub struct StageOrchestrator<'a> {
    ledger: &'a Ledger,
    run_id: Uuid,
}

impl<'a> StageOrchestrator<'a> {
    pub fn new(ledger: &'a Ledger, run_id: Uuid) -> Self {
        Self { ledger, run_id }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn run<S: Stage>(&self, stage: &mut S) -> StageTermination {
        let kind = stage.kind();
        let span = info_span!("stage", stage = %kind, run_id = %self.run_id);
        async move {
            info!("--- {} ---", kind);
            let mut payload = S::Payload::default();
            let result = AssertUnwindSafe(stage.execute(&mut payload)).catch_unwind().await;

            let (stage_label, verdict, error, error_chain, termination) = match result {
                Ok(Ok(verdict)) => {
                    info!(%verdict, "Stage finished");
                    (kind.label().to_string(), verdict, None, None, StageTermination::Completed(verdict))
                }
                Ok(Err(StageError::Step(failure))) => {
                    error!(error = %failure, "Stage failed");
                    let termination = StageTermination::Completed(Verdict::Failure);
                    (kind.label().to_string(), Verdict::Failure, Some(failure.to_string()), None, termination)
                }
                Ok(Err(StageError::Crash(err))) => {
                    error!(error = %err, error_chain = ?err, "Stage crashed");
                    let chain = Some(format!("{err:?}"));
                    (kind.crash_label(), Verdict::Failure, Some(err.to_string()), chain, StageTermination::Crashed)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(error = %message, "Stage panicked");
                    (kind.crash_label(), Verdict::Failure, Some(message), None, StageTermination::Crashed)
                }
            };

            let record = StageRecord::new(stage_label, verdict, payload.into())
                .with_run_id(self.run_id)
                .with_error(error, error_chain);
            self.ledger.append(record, stage.merge_policy());
            termination
        }
        .instrument(span)
        .await
    }

    /// Records a crash for a stage that could not even be constructed.
    pub fn record_crash(&self, kind: StageKind, err: &anyhow::Error) -> StageTermination {
        let _span = info_span!("stage", stage = %kind, run_id = %self.run_id).entered();
        error!(error = %err, error_chain = ?err, "Stage crashed before it started");
        let record = StageRecord::new(kind.crash_label(), Verdict::Failure, empty_payload(kind))
            .with_run_id(self.run_id)
            .with_error(Some(err.to_string()), Some(format!("{err:?}")));
        self.ledger.append(record, kind.merge_policy());
        StageTermination::Crashed
    }
}

fn empty_payload(kind: StageKind) -> StagePayload {
    match kind {
        StageKind::Precompile => StagePayload::Precompile(Default::default()),
        StageKind::Deployment => StagePayload::Deployment(Default::default()),
        StageKind::Voting => StagePayload::Voting(Default::default()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionHandle(usize);

/// Step bookkeeping for the voting workflow.
///
/// Every test and action is pushed as pending before any work happens and later
/// moved to a terminal status, so an interrupted run still shows where it stopped.
pub struct StepJournal<'a> {
    payload: &'a mut VotingPayload,
}

impl<'a> StepJournal<'a> {
    pub fn new(payload: &'a mut VotingPayload) -> Self {
        Self { payload }
    }

    pub fn payload_mut(&mut self) -> &mut VotingPayload {
        &mut *self.payload
    }

    pub fn begin_test(&mut self, name: impl Into<String>) -> TestHandle {
        let name = name.into();
        info!(test = %name, "Running test");
        self.payload.test_results.push(TestResult { test: name, status: TestStatus::PendingTest, reason: None });
        TestHandle(self.payload.test_results.len() - 1)
    }

    pub fn pass(&mut self, handle: TestHandle, status: TestStatus) {
        if let Some(result) = self.payload.test_results.get_mut(handle.0) {
            info!(test = %result.test, %status, "Test passed");
            result.status = status;
        }
    }

    /// Marks the test failed and hands back the failure to propagate.
    pub fn fail(&mut self, handle: TestHandle, reason: impl Into<String>) -> StepFailure {
        let reason = reason.into();
        match self.payload.test_results.get_mut(handle.0) {
            Some(result) => {
                error!(test = %result.test, reason = %reason, "Test failed");
                result.status = TestStatus::Failed;
                result.reason = Some(reason.clone());
                StepFailure::new(result.test.clone(), reason)
            }
            None => StepFailure::new("unknown test", reason),
        }
    }

    /// Converts an error into a failure of `handle`.
    pub fn guard<T, E>(&mut self, handle: TestHandle, result: Result<T, E>) -> Result<T, StepFailure>
    where
        E: std::fmt::Display,
    {
        result.map_err(|err| self.fail(handle, err.to_string()))
    }

    /// Fails `handle` unless `actual == expected`.
    pub fn ensure_eq<T>(&mut self, handle: TestHandle, actual: T, expected: T, message: &str) -> Result<(), StepFailure>
    where
        T: PartialEq + std::fmt::Display,
    {
        if actual == expected {
            Ok(())
        } else {
            Err(self.fail(handle, format!("{message}: expected {expected}, got {actual}")))
        }
    }

    pub fn begin_action(&mut self, kind: ActionKind, status: ActionStatus) -> ActionHandle {
        if !status.is_pending() {
            warn!(%status, "Action recorded with a non pending initial status");
        }
        self.payload.actions.push(Action::new(kind, status));
        ActionHandle(self.payload.actions.len() - 1)
    }

    pub fn action_mut(&mut self, handle: ActionHandle) -> Option<&mut Action> {
        self.payload.actions.get_mut(handle.0)
    }

    pub fn finish_action(&mut self, handle: ActionHandle, status: ActionStatus, error: Option<String>) {
        if let Some(action) = self.action_mut(handle) {
            action.status = status;
            action.error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use harness_ledger::{PrecompilePayload, VotingPayload};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;

    enum Ending {
        Verdict(Verdict),
        Step,
        Crash,
        Panic,
    }

    struct ScriptedStage {
        ending: Ending,
    }

    #[async_trait]
    impl Stage for ScriptedStage {
        type Payload = PrecompilePayload;

        fn kind(&self) -> StageKind {
            StageKind::Precompile
        }

        async fn execute(&mut self, payload: &mut Self::Payload) -> Result<Verdict, StageError> {
            payload.validation_notes = "partial".to_string();
            match self.ending {
                Ending::Verdict(verdict) => Ok(verdict),
                Ending::Step => Err(StepFailure::new("Call precompile", "connection refused").into()),
                Ending::Crash => Err(anyhow::anyhow!("node unreachable").context("setup failed").into()),
                Ending::Panic => panic!("boom"),
            }
        }
    }

    #[fixture]
    fn workdir() -> TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    #[rstest]
    #[case::success(Ending::Verdict(Verdict::Success), StageTermination::Completed(Verdict::Success), false)]
    #[case::failure(Ending::Verdict(Verdict::Failure), StageTermination::Completed(Verdict::Failure), false)]
    #[case::step(Ending::Step, StageTermination::Completed(Verdict::Failure), false)]
    #[case::crash(Ending::Crash, StageTermination::Crashed, true)]
    #[case::panic(Ending::Panic, StageTermination::Crashed, true)]
    #[tokio::test]
    async fn every_run_writes_exactly_one_record(
        workdir: TempDir,
        #[case] ending: Ending,
        #[case] expected: StageTermination,
        #[case] crash_label: bool,
    ) {
        let ledger = Ledger::new(workdir.path().join("results.json"), "test");
        let orchestrator = StageOrchestrator::new(&ledger, Uuid::new_v4());

        let termination = orchestrator.run(&mut ScriptedStage { ending }).await;
        assert_eq!(termination, expected);

        let records = ledger.read().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.run_id, Some(orchestrator.run_id()));
        assert_eq!(record.stage.ends_with(" - CRASH"), crash_label);
        assert_eq!(record.kind(), Some(StageKind::Precompile));
        assert_matches!(&record.payload, StagePayload::Precompile(payload) if payload.validation_notes == "partial");
        if let StageTermination::Completed(verdict) = expected {
            assert_eq!(record.verdict, verdict);
        } else {
            assert_eq!(record.verdict, Verdict::Failure);
            assert!(record.error.is_some());
        }
    }

    #[rstest]
    #[tokio::test]
    async fn crash_keeps_the_error_chain(workdir: TempDir) {
        let ledger = Ledger::new(workdir.path().join("results.json"), "test");
        let orchestrator = StageOrchestrator::new(&ledger, Uuid::new_v4());

        orchestrator.run(&mut ScriptedStage { ending: Ending::Crash }).await;

        let record = ledger.read().unwrap().remove(0);
        assert_eq!(record.error.as_deref(), Some("setup failed"));
        assert!(record.error_chain.is_some_and(|chain| chain.contains("node unreachable")));
    }

    #[rstest]
    #[traced_test]
    fn record_crash_before_start(workdir: TempDir) {
        let ledger = Ledger::new(workdir.path().join("results.json"), "test");
        let orchestrator = StageOrchestrator::new(&ledger, Uuid::new_v4());

        let err = anyhow::anyhow!("CDK_ERIGON_RPC_URL is not set");
        let termination = orchestrator.record_crash(StageKind::Voting, &err);

        assert_eq!(termination, StageTermination::Crashed);
        let record = ledger.read().unwrap().remove(0);
        assert_eq!(record.stage, StageKind::Voting.crash_label());
        assert!(logs_contain("Stage crashed before it started"));
    }

    #[rstest]
    #[case::deployment(StageKind::Deployment, 1)]
    #[case::voting(StageKind::Voting, 3)]
    fn repeated_crashes_follow_the_stage_merge_policy(
        workdir: TempDir,
        #[case] kind: StageKind,
        #[case] expected: usize,
    ) {
        let ledger = Ledger::new(workdir.path().join("results.json"), "test");
        for _ in 0..3 {
            let orchestrator = StageOrchestrator::new(&ledger, Uuid::new_v4());
            orchestrator.record_crash(kind, &anyhow::anyhow!("Chain id mismatch"));
        }

        let records = ledger.read().unwrap();
        assert_eq!(records.iter().filter(|record| record.kind() == Some(kind)).count(), expected);
        assert!(records.iter().all(|record| record.stage == kind.crash_label()));
    }

    #[test]
    fn exit_code_is_failure_only_for_crashes() {
        assert_eq!(StageTermination::Completed(Verdict::Failure).exit_code(), ExitCode::SUCCESS);
        assert_eq!(StageTermination::Crashed.exit_code(), ExitCode::FAILURE);
    }

    #[test]
    fn journal_moves_steps_to_terminal_states() {
        let mut payload = VotingPayload::default();
        let mut journal = StepJournal::new(&mut payload);

        let passed = journal.begin_test("Initial State Checks");
        journal.pass(passed, TestStatus::Passed);

        let failed = journal.begin_test("Voting Process - Verify Vote Count");
        let failure = journal.ensure_eq(failed, 1u64, 2u64, "Vote count").unwrap_err();
        assert_eq!(failure.context, "Voting Process - Verify Vote Count");
        assert_eq!(failure.reason, "Vote count: expected 2, got 1");

        let action = journal.begin_action(
            ActionKind::Vote { voter: Default::default(), proposal_index: 0 },
            ActionStatus::PendingAction,
        );
        journal.finish_action(action, ActionStatus::FailureAction, Some("reverted".to_string()));

        assert_eq!(payload.test_results[0].status, TestStatus::Passed);
        assert_eq!(payload.test_results[1].status, TestStatus::Failed);
        assert_eq!(payload.actions[0].status, ActionStatus::FailureAction);
        assert_eq!(payload.actions[0].error.as_deref(), Some("reverted"));
    }
}
