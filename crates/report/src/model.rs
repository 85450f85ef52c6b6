//! Report entities persisted as JSON.
//!
//! All keys serialize as camelCase; asset and detail-file paths are stored
//! relative to the report directory with forward slashes regardless of host
//! OS, so any consumer can join them portably.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapflow_types::{ElementInfo, RunnerError, Status};

/// Report schema version recorded in the index.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Device the run executed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Application under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppInfo {
    pub app_id: Option<String>,
}

/// CI metadata attached verbatim when the caller supplies it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CiInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// The runner binary that produced the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInfo {
    pub name: String,
    pub version: String,
}

impl Default for RunnerInfo {
    fn default() -> Self {
        Self {
            name: "tapflow".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Per-status flow counts on the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Summary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    /// Recomputes the summary from flow entry statuses.
    pub fn aggregate(entries: &[FlowEntry]) -> Self {
        let mut summary = Summary {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.status {
                Status::Pending => summary.pending += 1,
                Status::Running => summary.running += 1,
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Per-state command counts plus the index of the command currently running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_index: Option<usize>,
}

impl CommandSummary {
    /// Recomputes the summary from a detail file's command list.
    pub fn aggregate(commands: &[CommandRecord]) -> Self {
        let mut summary = CommandSummary {
            total: commands.len(),
            ..Default::default()
        };
        for command in commands {
            match command.status {
                Status::Pending => summary.pending += 1,
                Status::Running => {
                    summary.running += 1;
                    summary.current_index = Some(command.index);
                }
                Status::Passed => summary.passed += 1,
                Status::Failed => summary.failed += 1,
                Status::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// One flow's row in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEntry {
    /// Zero-based input-order position.
    pub position: usize,
    /// Deterministic `flow-%03d` identifier.
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// Relative pointer to the detail file, e.g. `flows/flow-000.json`.
    pub data_file: String,
    /// Relative assets directory, e.g. `assets/flow-000`.
    pub assets_dir: String,
    pub status: Status,
    /// Monotonic per-entry version; advances on every flush touching this entry.
    pub update_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub commands: CommandSummary,
    pub retry_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Root report object, one per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIndex {
    pub schema_version: String,
    /// Monotonic version; strictly increases across every persisted write.
    pub update_seq: u64,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<AppInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci: Option<CiInfo>,
    pub runner: RunnerInfo,
    pub summary: Summary,
    pub flows: Vec<FlowEntry>,
}

impl RunIndex {
    pub fn entry(&self, flow_id: &str) -> Option<&FlowEntry> {
        self.flows.iter().find(|entry| entry.id == flow_id)
    }

    pub fn entry_mut(&mut self, flow_id: &str) -> Option<&mut FlowEntry> {
        self.flows.iter_mut().find(|entry| entry.id == flow_id)
    }

    /// Overall status per the aggregation rule: failed wins, then passed once
    /// every entry is terminal, then running once started.
    pub fn compute_status(&self) -> Status {
        if self.flows.iter().any(|entry| entry.status == Status::Failed) {
            return Status::Failed;
        }
        if self.flows.iter().all(|entry| entry.status.is_terminal()) {
            return Status::Passed;
        }
        if self.started_at.is_some() { Status::Running } else { Status::Pending }
    }
}

/// Human-useful parameters extracted from a step at skeleton time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Structured error recorded on a failed command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorInfo {
    /// Semantic kind: driver, assertion, script, io, cancellation, configuration.
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ErrorInfo {
    pub fn from_error(error: &RunnerError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.message().to_string(),
            details: None,
            suggestion: suggestion_for(error),
        }
    }
}

fn suggestion_for(error: &RunnerError) -> Option<String> {
    match error {
        RunnerError::Driver(message) if message.contains("not found") => {
            Some("Verify the selector matches a visible element, or raise the step timeout.".to_string())
        }
        RunnerError::Configuration(_) => Some("Check the step definition in the flow file.".to_string()),
        _ => None,
    }
}

/// Paths of artifacts captured for one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_hierarchy: Option<String>,
}

impl CommandArtifacts {
    pub fn is_empty(&self) -> bool {
        self.screenshot_before.is_none() && self.screenshot_after.is_none() && self.view_hierarchy.is_none()
    }
}

/// Report-side record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// `cmd-%03d` for top-level commands, `sub-%d` for nested ones.
    pub id: String,
    pub index: usize,
    /// Step variant tag, e.g. `tapOn`.
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    /// Literal YAML snippet of the authored step.
    pub yaml: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "is_default_params")]
    pub params: CommandParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "CommandArtifacts::is_empty")]
    pub artifacts: CommandArtifacts,
    /// Written only when a compound step completes, never incrementally.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_commands: Vec<CommandRecord>,
}

fn is_default_params(params: &CommandParams) -> bool {
    *params == CommandParams::default()
}

impl CommandRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Video timestamp marker linking a command to an offset in the flow video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTimestamp {
    pub command_index: usize,
    pub offset_ms: u64,
}

/// Flow-level artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub video_timestamps: Vec<VideoTimestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_log: Option<String>,
}

/// One flow's detail file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDetail {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub commands: Vec<CommandRecord>,
    #[serde(default, skip_serializing_if = "is_default_artifacts")]
    pub artifacts: FlowArtifacts,
}

fn is_default_artifacts(artifacts: &FlowArtifacts) -> bool {
    *artifacts == FlowArtifacts::default()
}
