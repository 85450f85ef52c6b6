//! Startup repair of interrupted runs.
//!
//! A crashed process leaves non-terminal entries in the index. The detail
//! files are the evidence: recovery reconciles each non-terminal entry from
//! its detail, rewrites the index atomically, and leaves the detail files
//! untouched. It must run before any writer is instantiated against the
//! directory, is idempotent, and never downgrades a terminal state.

use std::path::Path;

use chrono::Utc;
use tapflow_types::Status;
use tracing::info;

use crate::fs::{read_json, write_json_atomic};
use crate::layout::ReportPaths;
use crate::model::{CommandSummary, FlowDetail, RunIndex, Summary};
use crate::StoreError;

/// Message recorded on flows that never reached a terminal state.
const INTERRUPTED_MESSAGE: &str = "Flow interrupted";

/// What a recovery pass changed.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Ids of flow entries whose status was repaired.
    pub repaired_flows: Vec<String>,
}

impl RecoveryReport {
    pub fn changed(&self) -> bool {
        !self.repaired_flows.is_empty()
    }
}

/// Repairs an interrupted run in `dir`.
///
/// Returns without touching the directory when there is no index or nothing
/// to repair, so repeated invocations converge after the first.
pub fn recover(dir: &Path) -> Result<RecoveryReport, StoreError> {
    let paths = ReportPaths::new(dir);
    if !paths.index().exists() {
        return Ok(RecoveryReport::default());
    }

    let mut index: RunIndex = read_json(&paths.index())?;
    let mut report = RecoveryReport::default();

    for entry in &mut index.flows {
        if entry.status.is_terminal() {
            continue;
        }

        let detail_path = paths.flow_detail(&entry.id);
        let (status, error) = match read_json::<FlowDetail>(&detail_path) {
            Err(_) => (Status::Failed, Some(INTERRUPTED_MESSAGE.to_string())),
            Ok(detail) => {
                entry.commands = CommandSummary::aggregate(&detail.commands);
                infer_terminal_state(&detail)
            }
        };

        entry.status = status;
        if error.is_some() {
            entry.error = error;
        }
        entry.update_seq += 1;
        report.repaired_flows.push(entry.id.clone());
    }

    if !report.changed() {
        return Ok(report);
    }

    index.summary = Summary::aggregate(&index.flows);
    index.status = index.compute_status();
    if index.finished_at.is_none() {
        index.finished_at = Some(Utc::now());
    }
    index.update_seq += 1;
    index.last_updated = Utc::now();
    write_json_atomic(&paths.index(), &index)?;

    info!(repaired = report.repaired_flows.len(), "recovered interrupted run");
    Ok(report)
}

/// Infers the terminal state of an interrupted flow from its commands.
fn infer_terminal_state(detail: &FlowDetail) -> (Status, Option<String>) {
    let all_terminal = detail.commands.iter().all(|command| command.status.is_terminal());
    if !all_terminal {
        return (Status::Failed, Some(INTERRUPTED_MESSAGE.to_string()));
    }

    let first_failure = detail.commands.iter().find(|command| command.status == Status::Failed);
    match first_failure {
        None => (Status::Passed, None),
        Some(command) => {
            let message = command
                .error
                .as_ref()
                .map(|error| error.message.clone())
                .unwrap_or_else(|| INTERRUPTED_MESSAGE.to_string());
            (Status::Failed, Some(message))
        }
    }
}
