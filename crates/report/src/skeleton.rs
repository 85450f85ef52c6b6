//! Skeleton build: the initial all-pending index + detail set.
//!
//! Ids are deterministic (`flow-%03d` by input order, `cmd-%03d` by step
//! order) and human-useful params are extracted up front so a freshly-written
//! pending report is already meaningful to readers.

use chrono::Utc;
use tapflow_types::{Flow, Status, Step, StepKind};

use crate::fs::write_json_atomic;
use crate::layout::ReportPaths;
use crate::model::{
    AppInfo, CiInfo, CommandArtifacts, CommandParams, CommandRecord, CommandSummary, DeviceInfo, FlowArtifacts, FlowDetail, FlowEntry,
    RunIndex, RunnerInfo, Summary, SCHEMA_VERSION,
};
use crate::StoreError;

/// Run-level metadata recorded on the index at build time.
#[derive(Debug, Clone, Default)]
pub struct RunMetadata {
    pub device: Option<DeviceInfo>,
    pub app: Option<AppInfo>,
    pub ci: Option<CiInfo>,
    pub runner: RunnerInfo,
}

/// The initial report state: one index plus one detail per flow.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub index: RunIndex,
    pub details: Vec<FlowDetail>,
}

impl Skeleton {
    /// Persists the skeleton: detail files first, then the index, so the
    /// index never points at a file that does not exist yet.
    pub fn write(&self, paths: &ReportPaths) -> Result<(), StoreError> {
        std::fs::create_dir_all(paths.flows_dir())?;
        for detail in &self.details {
            write_json_atomic(&paths.flow_detail(&detail.id), detail)?;
        }
        write_json_atomic(&paths.index(), &self.index)?;
        Ok(())
    }
}

/// Deterministic flow identifier by input order.
pub fn flow_id(position: usize) -> String {
    format!("flow-{position:03}")
}

/// Deterministic command identifier by step order.
pub fn command_id(index: usize) -> String {
    format!("cmd-{index:03}")
}

/// Builds the all-pending skeleton for a flow list.
pub fn build_skeleton(flows: &[Flow], metadata: RunMetadata) -> Skeleton {
    let mut entries = Vec::with_capacity(flows.len());
    let mut details = Vec::with_capacity(flows.len());

    for (position, flow) in flows.iter().enumerate() {
        let id = flow_id(position);
        let name = flow.display_name();
        let source_file = flow
            .config
            .source_path
            .as_deref()
            .map(|path| path.to_string_lossy().into_owned());

        let commands: Vec<CommandRecord> = flow
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| command_skeleton(index, step))
            .collect();

        entries.push(FlowEntry {
            position,
            id: id.clone(),
            name: name.clone(),
            source_file: source_file.clone(),
            data_file: ReportPaths::flow_detail_rel(&id),
            assets_dir: ReportPaths::assets_dir_rel(&id),
            status: Status::Pending,
            update_seq: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            commands: CommandSummary::aggregate(&commands),
            retry_attempts: 0,
            error: None,
        });

        details.push(FlowDetail {
            id,
            name,
            source_file,
            tags: flow.config.tags.clone(),
            device: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            commands,
            artifacts: FlowArtifacts::default(),
        });
    }

    let summary = Summary::aggregate(&entries);
    let index = RunIndex {
        schema_version: SCHEMA_VERSION.to_string(),
        update_seq: 0,
        status: Status::Pending,
        started_at: None,
        finished_at: None,
        last_updated: Utc::now(),
        device: metadata.device,
        app: metadata.app,
        ci: metadata.ci,
        runner: metadata.runner,
        summary,
        flows: entries,
    };

    Skeleton { index, details }
}

/// Builds one pending command record, extracting display params up front.
pub fn command_skeleton(index: usize, step: &Step) -> CommandRecord {
    CommandRecord {
        id: command_id(index),
        index,
        kind: step.kind.tag().to_string(),
        label: step.describe(),
        yaml: step_yaml(step),
        status: Status::Pending,
        started_at: None,
        finished_at: None,
        duration_ms: None,
        params: extract_params(step),
        element: None,
        error: None,
        artifacts: CommandArtifacts::default(),
        sub_commands: Vec::new(),
    }
}

fn step_yaml(step: &Step) -> String {
    serde_yaml::to_string(step).unwrap_or_default().trim_end().to_string()
}

/// Extracts selector / text / direction / timeout params from a step.
pub fn extract_params(step: &Step) -> CommandParams {
    let mut params = CommandParams {
        timeout_ms: step.base.timeout_ms,
        ..Default::default()
    };

    match &step.kind {
        StepKind::TapOn { selector }
        | StepKind::DoubleTapOn { selector }
        | StepKind::LongPressOn { selector }
        | StepKind::CopyTextFrom { selector }
        | StepKind::AssertVisible { selector }
        | StepKind::AssertNotVisible { selector } => {
            apply_selector(&mut params, selector);
        }
        StepKind::ScrollUntilVisible {
            selector,
            direction,
            timeout_ms,
        } => {
            apply_selector(&mut params, selector);
            params.direction = direction.map(|direction| direction.as_str().to_string());
            params.timeout_ms = params.timeout_ms.or(*timeout_ms);
        }
        StepKind::WaitUntil {
            visible,
            not_visible,
            timeout_ms,
        } => {
            if let Some(selector) = visible.as_ref().or(not_visible.as_ref()) {
                apply_selector(&mut params, selector);
            }
            params.timeout_ms = params.timeout_ms.or(*timeout_ms);
        }
        StepKind::InputText { text } => params.text = Some(text.clone()),
        StepKind::PressKey { key } => params.text = Some(key.clone()),
        StepKind::OpenLink { link } => params.text = Some(link.clone()),
        StepKind::Swipe { direction, .. } | StepKind::Scroll { direction } => {
            params.direction = direction.map(|direction| direction.as_str().to_string());
        }
        StepKind::LaunchApp { app_id } | StepKind::StopApp { app_id } | StepKind::KillApp { app_id } | StepKind::ClearState { app_id } => {
            params.text = app_id.clone();
        }
        _ => {}
    }

    params
}

fn apply_selector(params: &mut CommandParams, selector: &tapflow_types::Selector) {
    if let Some((kind, value)) = selector.anchor() {
        params.selector_kind = Some(kind.to_string());
        params.selector_value = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapflow_types::{Flow, FlowConfig, Selector};

    fn sample_flows() -> Vec<Flow> {
        let flow = |name: &str, steps: Vec<Step>| Flow {
            config: FlowConfig {
                name: Some(name.to_string()),
                ..Default::default()
            },
            steps,
        };
        vec![
            flow(
                "login",
                vec![
                    Step::new(StepKind::TapOn {
                        selector: Selector::text("Login"),
                    }),
                    Step::new(StepKind::InputText { text: "alice".into() }),
                ],
            ),
            flow("empty", Vec::new()),
        ]
    }

    #[test]
    fn ids_are_deterministic_by_order() {
        let skeleton = build_skeleton(&sample_flows(), RunMetadata::default());
        assert_eq!(skeleton.index.flows[0].id, "flow-000");
        assert_eq!(skeleton.index.flows[1].id, "flow-001");
        assert_eq!(skeleton.details[0].commands[0].id, "cmd-000");
        assert_eq!(skeleton.details[0].commands[1].id, "cmd-001");
    }

    #[test]
    fn skeleton_is_all_pending_with_consistent_summary() {
        let skeleton = build_skeleton(&sample_flows(), RunMetadata::default());
        assert_eq!(skeleton.index.summary.total, 2);
        assert_eq!(skeleton.index.summary.pending, 2);
        assert!(skeleton.index.flows.iter().all(|entry| entry.status == Status::Pending));
        assert!(skeleton.details[0].commands.iter().all(|command| command.status == Status::Pending));
    }

    #[test]
    fn params_are_extracted_at_build_time() {
        let skeleton = build_skeleton(&sample_flows(), RunMetadata::default());
        let tap = &skeleton.details[0].commands[0];
        assert_eq!(tap.params.selector_kind.as_deref(), Some("text"));
        assert_eq!(tap.params.selector_value.as_deref(), Some("Login"));
        let input = &skeleton.details[0].commands[1];
        assert_eq!(input.params.text.as_deref(), Some("alice"));
    }

    #[test]
    fn yaml_snippet_contains_the_step_tag() {
        let record = command_skeleton(
            0,
            &Step::new(StepKind::TapOn {
                selector: Selector::id("submit"),
            }),
        );
        assert!(record.yaml.contains("type: tapOn"), "yaml was: {}", record.yaml);
        assert!(record.yaml.contains("id: submit"), "yaml was: {}", record.yaml);
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::new(dir.path());
        let skeleton = build_skeleton(&sample_flows(), RunMetadata::default());
        skeleton.write(&paths).unwrap();

        let index: RunIndex = crate::fs::read_json(&paths.index()).unwrap();
        assert_eq!(index.summary.total, 2);
        for entry in &index.flows {
            let detail: FlowDetail = crate::fs::read_json(&paths.flow_detail(&entry.id)).unwrap();
            assert_eq!(detail.id, entry.id);
        }
    }

    #[test]
    fn empty_flow_list_writes_only_index_and_flows_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::new(dir.path());
        let skeleton = build_skeleton(&[], RunMetadata::default());
        skeleton.write(&paths).unwrap();

        assert_eq!(skeleton.index.summary.total, 0);
        assert!(paths.index().exists());
        assert!(paths.flows_dir().exists());
        assert_eq!(std::fs::read_dir(paths.flows_dir()).unwrap().count(), 0);
    }
}
