//! Execution status and platform encodings shared by the engine and report.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a run, flow, or command.
///
/// The serialized form is the lower-case string recorded in report JSON
/// (`"pending"`, `"running"`, `"passed"`, `"failed"`, `"skipped"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not started yet; the state every skeleton entity is created in.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Passed,
    /// Finished with a non-optional failure.
    Failed,
    /// Never executed because an earlier failure or cancellation ended the scope.
    Skipped,
}

impl Status {
    /// Returns true for states that will never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Passed | Status::Failed | Status::Skipped)
    }

    /// Lower-case string form used in report JSON and log output.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mobile platform a driver is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
