//! Runner configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tapflow_report::CiInfo;

use crate::progress::ProgressCallbacks;

/// When to capture screenshots and view hierarchies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactPolicy {
    /// Screenshot before and after every step.
    Always,
    /// Screenshot plus view hierarchy, only when a step fails.
    #[default]
    OnFailure,
    Never,
}

/// Default iteration cap applied to `repeat` steps that are pure
/// while-loops. Prevents silent infinite loops.
pub const DEFAULT_REPEAT_CAP: u64 = 1000;

/// Configuration shared by every flow execution in a run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Report directory; created if missing.
    pub output_dir: PathBuf,
    pub artifact_policy: ArtifactPolicy,
    /// `0` runs flows sequentially; `>= 1` bounds in-process parallelism.
    pub parallelism: usize,
    /// When true, the first failed flow stops not-yet-started flows.
    pub stop_on_fail: bool,
    /// Iteration cap for while-style `repeat` steps.
    pub repeat_cap: u64,
    /// CI metadata copied onto the report index.
    pub ci: Option<CiInfo>,
    pub progress: Arc<ProgressCallbacks>,
}

impl RunnerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            artifact_policy: ArtifactPolicy::default(),
            parallelism: 0,
            stop_on_fail: false,
            repeat_cap: DEFAULT_REPEAT_CAP,
            ci: None,
            progress: Arc::new(ProgressCallbacks::default()),
        }
    }

    pub fn with_artifact_policy(mut self, policy: ArtifactPolicy) -> Self {
        self.artifact_policy = policy;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_stop_on_fail(mut self, stop_on_fail: bool) -> Self {
        self.stop_on_fail = stop_on_fail;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallbacks) -> Self {
        self.progress = Arc::new(progress);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_policy_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&ArtifactPolicy::OnFailure).unwrap(), "\"on-failure\"");
        let parsed: ArtifactPolicy = serde_json::from_str("\"always\"").unwrap();
        assert_eq!(parsed, ArtifactPolicy::Always);
    }

    #[test]
    fn defaults_are_sequential_with_on_failure_artifacts() {
        let config = RunnerConfig::new("/tmp/report");
        assert_eq!(config.parallelism, 0);
        assert!(!config.stop_on_fail);
        assert_eq!(config.artifact_policy, ArtifactPolicy::OnFailure);
        assert_eq!(config.repeat_cap, DEFAULT_REPEAT_CAP);
    }
}
