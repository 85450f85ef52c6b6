//! Flow file loading.
//!
//! The engine consumes parsed [`Flow`]s; loading is behind the [`FlowParser`]
//! trait so `retry.file` and `runFlow.file` can resolve referenced flows
//! without the engine owning a concrete format. [`YamlFlowParser`] is the
//! stock implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use tapflow_types::{Flow, FlowConfig, Step};

/// Loads a flow definition from disk.
pub trait FlowParser: Send + Sync {
    fn parse_file(&self, path: &Path) -> Result<Flow>;
}

/// YAML flow document as authored on disk.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FlowDocument {
    name: Option<String>,
    app_id: Option<String>,
    env: IndexMap<String, String>,
    tags: Vec<String>,
    command_timeout_ms: Option<u64>,
    on_flow_start: Vec<Step>,
    on_flow_complete: Vec<Step>,
    steps: Vec<Step>,
}

/// serde_yaml-backed parser for single-flow documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlFlowParser;

impl FlowParser for YamlFlowParser {
    fn parse_file(&self, path: &Path) -> Result<Flow> {
        let content = fs::read_to_string(path).with_context(|| format!("failed to read flow file: {}", path.display()))?;
        let document: FlowDocument =
            serde_yaml::from_str(&content).with_context(|| format!("failed to parse flow file: {}", path.display()))?;

        Ok(Flow {
            config: FlowConfig {
                name: document.name,
                app_id: document.app_id,
                env: document.env,
                tags: document.tags,
                command_timeout_ms: document.command_timeout_ms,
                on_flow_start: document.on_flow_start,
                on_flow_complete: document.on_flow_complete,
                source_path: Some(path.to_path_buf()),
            },
            steps: document.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapflow_types::StepKind;

    #[test]
    fn parses_a_full_flow_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let flow_path = temp_dir.path().join("login.yaml");
        fs::write(
            &flow_path,
            r#"
name: "Login flow"
appId: "com.example.app"
env:
  USERNAME: "alice"
tags: ["smoke"]
commandTimeoutMs: 15000
onFlowStart:
  - type: launchApp
steps:
  - type: tapOn
    selector:
      text: "Login"
  - type: inputText
    text: "$USERNAME"
"#,
        )
        .unwrap();

        let flow = YamlFlowParser.parse_file(&flow_path).expect("parse flow");
        assert_eq!(flow.config.name.as_deref(), Some("Login flow"));
        assert_eq!(flow.config.app_id.as_deref(), Some("com.example.app"));
        assert_eq!(flow.config.env.get("USERNAME").map(String::as_str), Some("alice"));
        assert_eq!(flow.config.command_timeout_ms, Some(15_000));
        assert_eq!(flow.config.on_flow_start.len(), 1);
        assert_eq!(flow.steps.len(), 2);
        assert!(matches!(flow.steps[0].kind, StepKind::TapOn { .. }));
        assert_eq!(flow.config.source_path.as_deref(), Some(flow_path.as_path()));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let error = YamlFlowParser.parse_file(Path::new("/does/not/exist.yaml")).unwrap_err();
        assert!(error.to_string().contains("/does/not/exist.yaml"));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let flow_path = temp_dir.path().join("broken.yaml");
        fs::write(&flow_path, "steps: [{type: ").unwrap();
        assert!(YamlFlowParser.parse_file(&flow_path).is_err());
    }
}
