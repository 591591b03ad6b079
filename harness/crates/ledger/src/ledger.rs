use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::record::{StageKind, StageRecord};

const PREVIEW_LEN: usize = 200;

/// How a new record is merged into the existing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Keep every prior entry.
    #[default]
    Append,
    /// Drop prior entries whose stage label contains this stage's label first.
    ReplaceStage,
}

impl StageKind {
    /// Deployments replace their earlier records so later stages find a single
    /// contract. Every other stage keeps its history.
    pub fn merge_policy(&self) -> MergePolicy {
        match self {
            StageKind::Deployment => MergePolicy::ReplaceStage,
            StageKind::Precompile | StageKind::Voting => MergePolicy::Append,
        }
    }
}

/// File backed, append-only list of [`StageRecord`]s.
///
/// Reads are always of the whole file and writes always rewrite the whole file.
/// There is no locking, stages are expected to run one after the other.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    network: String,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self { path: path.into(), network: network.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Appends `record`, logging instead of propagating any write failure.
    ///
    /// Returns whether the record reached the disk.
    pub fn append(&self, record: StageRecord, policy: MergePolicy) -> bool {
        let stage = record.stage.clone();
        match self.try_append(record, policy) {
            Ok(entries) => {
                info!(path = %self.path.display(), stage = %stage, entries, "Results saved");
                true
            }
            Err(err) => {
                error!(path = %self.path.display(), stage = %stage, error = %err, "Failed to write results file");
                false
            }
        }
    }

    /// Appends `record` and returns the number of entries now in the file.
    ///
    /// `networkUsed` is always overwritten with the ledger's network name. Existing
    /// entries that are not valid records are preserved as they are.
    pub fn try_append(&self, mut record: StageRecord, policy: MergePolicy) -> Result<usize, LedgerError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut entries = self.load_lenient();
        if policy == MergePolicy::ReplaceStage {
            let label = record.kind().map_or(record.stage.as_str(), |kind| kind.label());
            let before = entries.len();
            entries.retain(|entry| {
                !entry.get("stage").and_then(Value::as_str).is_some_and(|stage| stage.contains(label))
            });
            debug!(label, removed = before - entries.len(), "Replaced previous entries for stage");
        }

        record.network_used = self.network.clone();
        entries.push(serde_json::to_value(&record)?);

        let content = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, content)?;
        Ok(entries.len())
    }

    /// Reads every record in the file.
    ///
    /// Unlike the append path this is strict: a missing, empty or malformed file is
    /// an error, since a consuming stage cannot proceed without its inputs. Entries
    /// that are not records are skipped with a warning.
    pub fn read(&self) -> Result<Vec<StageRecord>, LedgerError> {
        let content = fs::read_to_string(&self.path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => LedgerError::NotFound(self.path.clone()),
            _ => LedgerError::Io(err),
        })?;
        if content.trim().is_empty() {
            return Err(LedgerError::Empty(self.path.clone()));
        }

        let value: Value = serde_json::from_str(&content).map_err(|source| LedgerError::Malformed {
            path: self.path.clone(),
            preview: content.chars().take(PREVIEW_LEN).collect(),
            source,
        })?;
        let Value::Array(entries) = value else {
            return Err(LedgerError::NotAList(self.path.clone()));
        };

        let records = entries
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| match serde_json::from_value::<StageRecord>(entry) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(index, error = %err, "Skipping ledger entry that is not a stage record");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    /// Most recent successful record of `kind`.
    pub fn latest_success(&self, kind: StageKind) -> Result<StageRecord, LedgerError> {
        let records = self.read()?;
        info!(path = %self.path.display(), entries = records.len(), "Loaded results file");
        select_latest_success(records, kind)
    }

    fn load_lenient(&self) -> Vec<Value> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Could not read results file, starting a new list");
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            warn!(path = %self.path.display(), "Results file is empty, starting a new list");
            return Vec::new();
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                warn!(path = %self.path.display(), "Results file is not a JSON array, starting a new list");
                Vec::new()
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Could not parse results file, starting a new list");
                Vec::new()
            }
        }
    }
}

/// Picks the last record in `records` that is a success of `kind`.
///
/// When there is none, every entry is logged so the operator can see what the file
/// actually holds.
pub fn select_latest_success(mut records: Vec<StageRecord>, kind: StageKind) -> Result<StageRecord, LedgerError> {
    match records.iter().rposition(|record| record.is_success_of(kind)) {
        Some(index) => Ok(records.swap_remove(index)),
        None => {
            for record in &records {
                error!(stage = %record.stage, verdict = %record.verdict, timestamp = %record.timestamp, "Ledger entry");
            }
            Err(LedgerError::NoSuccessfulRecord(kind.label()))
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256};
    use assert_matches::assert_matches;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::*;
    use crate::record::{DeploymentPayload, PrecompilePayload, StagePayload, Verdict, VotingPayload};

    #[fixture]
    fn workdir() -> TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    fn ledger_in(dir: &TempDir) -> Ledger {
        Ledger::new(dir.path().join("results").join("results.json"), "cdkErigon")
    }

    fn deployment(verdict: Verdict, gas_used: u64) -> StageRecord {
        let payload = DeploymentPayload {
            contract_address: Some(address!("5fbdb2315678afecb367f032d93f642f64180aa3")),
            transaction_hash: Some(b256!("00000000000000000000000000000000000000000000000000000000000000ab")),
            gas_used: Some(gas_used),
            contract_abi: Some(json!(["function vote(uint256 proposal)"])),
            ..Default::default()
        };
        StageRecord::new(StageKind::Deployment.label(), verdict, payload.into()).with_run_id(Uuid::new_v4())
    }

    fn precompile() -> StageRecord {
        StageRecord::new(StageKind::Precompile.label(), Verdict::Success, PrecompilePayload::default().into())
    }

    #[rstest]
    fn append_creates_directory_and_sets_network(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        assert!(ledger.append(precompile(), MergePolicy::Append));

        let records = ledger.read().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].network_used, "cdkErigon");
        assert_matches!(records[0].payload, StagePayload::Precompile(_));
    }

    #[rstest]
    fn append_keeps_prior_entries_in_order(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        ledger.try_append(precompile(), MergePolicy::Append).unwrap();
        let before = ledger.read().unwrap();

        let mut next = deployment(Verdict::Success, 21_000);
        ledger.try_append(next.clone(), MergePolicy::Append).unwrap();
        next.network_used = "cdkErigon".to_string();

        let after = ledger.read().unwrap();
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after[..before.len()], before[..]);
        assert_eq!(after.last(), Some(&next));
    }

    #[rstest]
    fn replace_stage_drops_previous_entries_of_that_stage_only(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        ledger.try_append(precompile(), MergePolicy::Append).unwrap();
        ledger.try_append(deployment(Verdict::Failure, 1), MergePolicy::ReplaceStage).unwrap();
        let crash = StageRecord::new(
            StageKind::Deployment.crash_label(),
            Verdict::Failure,
            StagePayload::Deployment(DeploymentPayload::default()),
        );
        ledger.try_append(crash, MergePolicy::Append).unwrap();

        let entries = ledger.try_append(deployment(Verdict::Success, 2), MergePolicy::ReplaceStage).unwrap();
        assert_eq!(entries, 2);

        let records = ledger.read().unwrap();
        assert_eq!(records[0].kind(), Some(StageKind::Precompile));
        assert_eq!(records[1].verdict, Verdict::Success);
        assert_eq!(records[1].deployment().and_then(|d| d.gas_used), Some(2));
    }

    #[rstest]
    #[case::precompile(StageKind::Precompile, MergePolicy::Append)]
    #[case::deployment(StageKind::Deployment, MergePolicy::ReplaceStage)]
    #[case::voting(StageKind::Voting, MergePolicy::Append)]
    fn only_deployments_replace_earlier_records(#[case] kind: StageKind, #[case] expected: MergePolicy) {
        assert_eq!(kind.merge_policy(), expected);
    }

    #[rstest]
    fn file_is_pretty_printed_with_two_space_indent(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        ledger.try_append(deployment(Verdict::Success, 21_000), MergePolicy::Append).unwrap();

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert!(content.starts_with("[\n  {\n    \""));
        assert!(content.contains("\"gasUsed\": \"21000\""));
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("  \n")]
    #[case::garbage("{ this is not json")]
    #[case::object("{\"stage\": \"x\"}")]
    fn append_recovers_from_unusable_file(workdir: TempDir, #[case] content: &str) {
        let ledger = ledger_in(&workdir);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        fs::write(ledger.path(), content).unwrap();

        assert_eq!(ledger.try_append(precompile(), MergePolicy::Append).unwrap(), 1);
        assert_eq!(ledger.read().unwrap().len(), 1);
    }

    #[rstest]
    fn append_preserves_foreign_entries(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        fs::write(ledger.path(), r#"[{"note": "written by hand"}]"#).unwrap();

        ledger.try_append(precompile(), MergePolicy::Append).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(ledger.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["note"], "written by hand");
        assert_eq!(ledger.read().unwrap().len(), 1);
    }

    #[rstest]
    fn append_reports_unwritable_path(workdir: TempDir) {
        // A directory where the file should be cannot be written to.
        let path = workdir.path().join("results.json");
        fs::create_dir_all(&path).unwrap();
        let ledger = Ledger::new(path, "cdkErigon");

        assert!(!ledger.append(precompile(), MergePolicy::Append));
    }

    #[rstest]
    fn read_missing_file_is_not_found(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        assert_matches!(ledger.read(), Err(LedgerError::NotFound(_)));
    }

    #[rstest]
    #[case::empty(" ")]
    #[case::malformed("[{")]
    #[case::not_a_list("{}")]
    fn read_rejects_unusable_file(workdir: TempDir, #[case] content: &str) {
        let ledger = ledger_in(&workdir);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        fs::write(ledger.path(), content).unwrap();

        match ledger.read() {
            Err(LedgerError::Empty(_)) => assert_eq!(content.trim(), ""),
            Err(LedgerError::Malformed { preview, .. }) => assert_eq!(preview, content),
            Err(LedgerError::NotAList(_)) => assert_eq!(content, "{}"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[rstest]
    fn latest_success_picks_most_recent(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        ledger.try_append(deployment(Verdict::Success, 1), MergePolicy::Append).unwrap();
        ledger.try_append(deployment(Verdict::Success, 2), MergePolicy::Append).unwrap();
        ledger.try_append(deployment(Verdict::Failure, 3), MergePolicy::Append).unwrap();

        let latest = ledger.latest_success(StageKind::Deployment).unwrap();
        assert_eq!(latest.deployment().and_then(|d| d.gas_used), Some(2));
    }

    #[rstest]
    fn latest_success_without_success_is_an_error(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        ledger.try_append(deployment(Verdict::Failure, 1), MergePolicy::Append).unwrap();
        ledger
            .try_append(
                StageRecord::new(StageKind::Voting.label(), Verdict::Success, VotingPayload::default().into()),
                MergePolicy::Append,
            )
            .unwrap();

        assert_matches!(
            ledger.latest_success(StageKind::Deployment),
            Err(LedgerError::NoSuccessfulRecord(label)) if label == StageKind::Deployment.label()
        );
    }

    #[rstest]
    fn reads_records_written_by_other_tools(workdir: TempDir) {
        let ledger = ledger_in(&workdir);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        let legacy = json!([
            {
                "timestamp": "2025-03-01T10:00:00.000Z",
                "networkUsed": "cdkErigon",
                "stage": "Stage 2: Contract Deployment (Ballot)",
                "verdict": "success",
                "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000ab",
                "blockNumber": "7",
                "gasUsed": "512345",
                "contractAbi": [
                    "constructor(bytes32[] proposalNames)",
                    "function giveRightToVote(address voter)"
                ],
                "deploymentDetails": {
                    "network": "cdkErigon",
                    "chainId": "1001",
                    "deployer": "0x00000000000000000000000000000000000000aa",
                    "gasPrice": "1000000000",
                    "gasLimit": "600000",
                    "receipt": { "status": 1 },
                    "codeSize": 4321
                }
            }
        ]);
        fs::write(ledger.path(), serde_json::to_string_pretty(&legacy).unwrap()).unwrap();

        let record = ledger.latest_success(StageKind::Deployment).unwrap();
        let deployment = record.deployment().unwrap();
        assert_eq!(deployment.block_number, Some(7));
        assert_eq!(deployment.deployment_details.gas_price, Some(1_000_000_000));
        assert_eq!(deployment.deployment_details.code_size, Some(4321));
        let interface = deployment.interface(&record.stage).unwrap();
        assert!(interface.function("giveRightToVote").is_some());
        assert!(interface.constructor().is_some());
    }
}
