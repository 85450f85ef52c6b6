//! Per-flow detail persistence.
//!
//! Each [`FlowWriter`] is owned by exactly one flow execution task, so it
//! needs no locking. Every mutation rewrites the whole detail file
//! atomically (the files are kilobytes; whole-file rewrites are cheaper than
//! partial updates and preserve atomic visibility), then notifies the index
//! writer. Detail before index, so the index never references content that
//! is not yet on disk.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tapflow_types::{ElementInfo, RunnerError, Status};
use tracing::debug;

use crate::fs::{write_bytes_atomic, write_json_atomic};
use crate::index_writer::{FlowEntryPatch, IndexWriter};
use crate::layout::ReportPaths;
use crate::model::{CommandArtifacts, CommandRecord, CommandSummary, ErrorInfo, FlowDetail, VideoTimestamp};
use crate::StoreError;

/// Writer for one flow's detail file and assets directory.
pub struct FlowWriter {
    flow_id: String,
    detail: FlowDetail,
    detail_path: PathBuf,
    assets_dir: PathBuf,
    index: IndexWriter,
}

impl FlowWriter {
    pub fn new(paths: &ReportPaths, detail: FlowDetail, index: IndexWriter) -> Self {
        let flow_id = detail.id.clone();
        Self {
            detail_path: paths.flow_detail(&flow_id),
            assets_dir: paths.assets_dir(&flow_id),
            flow_id,
            detail,
            index,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Current in-memory detail state.
    pub fn detail(&self) -> &FlowDetail {
        &self.detail
    }

    /// Marks the flow running.
    pub fn start(&mut self) -> Result<(), StoreError> {
        self.detail.started_at = Some(Utc::now());
        self.persist_detail()?;
        self.index.apply_progress(
            &self.flow_id,
            FlowEntryPatch {
                status: Some(Status::Running),
                started_at: self.detail.started_at,
                commands: Some(self.command_summary()),
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Marks command `index` running.
    pub fn command_start(&mut self, index: usize) -> Result<(), StoreError> {
        {
            let command = self.command_mut(index)?;
            command.status = Status::Running;
            command.started_at = Some(Utc::now());
        }
        self.persist_detail()?;
        self.notify_progress();
        Ok(())
    }

    /// Records the outcome of command `index`.
    pub fn command_end(
        &mut self,
        index: usize,
        status: Status,
        element: Option<ElementInfo>,
        error: Option<&RunnerError>,
        artifacts: CommandArtifacts,
    ) -> Result<(), StoreError> {
        self.command_end_with_subs(index, status, element, error, artifacts, Vec::new())
    }

    /// Records the outcome of compound command `index`, attaching the
    /// accumulated nested records in one shot.
    pub fn command_end_with_subs(
        &mut self,
        index: usize,
        status: Status,
        element: Option<ElementInfo>,
        error: Option<&RunnerError>,
        artifacts: CommandArtifacts,
        sub_commands: Vec<CommandRecord>,
    ) -> Result<(), StoreError> {
        {
            let error_info = error.map(ErrorInfo::from_error);
            let command = self.command_mut(index)?;
            let finished = Utc::now();
            command.status = status;
            command.finished_at = Some(finished);
            command.duration_ms = duration_between(command.started_at, finished);
            command.element = element;
            command.error = error_info;
            if !artifacts.is_empty() {
                command.artifacts = artifacts;
            }
            if !sub_commands.is_empty() {
                command.sub_commands = sub_commands;
            }
        }
        self.persist_detail()?;
        self.notify_progress();
        Ok(())
    }

    /// Marks every still-pending command at `from_index` or later skipped.
    pub fn skip_remaining_commands(&mut self, from_index: usize) -> Result<(), StoreError> {
        let mut changed = false;
        for command in self.detail.commands.iter_mut().skip(from_index) {
            if !command.status.is_terminal() {
                command.status = Status::Skipped;
                changed = true;
            }
        }
        if changed {
            self.persist_detail()?;
            self.notify_progress();
        }
        Ok(())
    }

    /// Records the flow's terminal state; flushes the index synchronously.
    pub fn end(&mut self, status: Status, error: Option<String>) -> Result<(), StoreError> {
        let finished = Utc::now();
        self.detail.finished_at = Some(finished);
        self.detail.duration_ms = duration_between(self.detail.started_at, finished);
        self.persist_detail()?;
        self.index.apply_terminal(
            &self.flow_id,
            FlowEntryPatch {
                status: Some(status),
                finished_at: Some(finished),
                duration_ms: self.detail.duration_ms,
                commands: Some(self.command_summary()),
                error,
                ..Default::default()
            },
        )?;
        debug!(flow_id = %self.flow_id, status = %status, "flow detail finalised");
        Ok(())
    }

    /// Propagates the retry-attempt counter to the flow's index entry.
    pub fn set_retry_attempts(&mut self, attempts: u32) {
        self.index.apply_progress(
            &self.flow_id,
            FlowEntryPatch {
                retry_attempts: Some(attempts),
                ..Default::default()
            },
        );
    }

    /// Records flow-level artifact paths.
    pub fn set_flow_artifacts(&mut self, video: Option<String>, device_log: Option<String>) -> Result<(), StoreError> {
        if let Some(video) = video {
            self.detail.artifacts.video = Some(video);
        }
        if let Some(device_log) = device_log {
            self.detail.artifacts.device_log = Some(device_log);
        }
        self.persist_detail()?;
        self.notify_progress();
        Ok(())
    }

    /// Links command `index` to an offset in the flow video.
    pub fn add_video_timestamp(&mut self, command_index: usize, offset_ms: u64) -> Result<(), StoreError> {
        self.detail.artifacts.video_timestamps.push(VideoTimestamp { command_index, offset_ms });
        self.persist_detail()?;
        self.notify_progress();
        Ok(())
    }

    /// Saves a screenshot for command `index`; `suffix` is `before`/`after`.
    /// Returns the forward-slash path relative to the report directory.
    pub fn save_screenshot(&self, index: usize, suffix: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let file_name = format!("{}-{suffix}.png", crate::skeleton::command_id(index));
        self.save_asset(&file_name, bytes)
    }

    /// Saves the view hierarchy captured for command `index`.
    pub fn save_view_hierarchy(&self, index: usize, bytes: &[u8]) -> Result<String, StoreError> {
        let file_name = format!("{}-hierarchy.xml", crate::skeleton::command_id(index));
        self.save_asset(&file_name, bytes)
    }

    /// Saves the device log captured for the whole flow.
    pub fn save_device_log(&self, bytes: &[u8]) -> Result<String, StoreError> {
        self.save_asset("device.log", bytes)
    }

    fn save_asset(&self, file_name: &str, bytes: &[u8]) -> Result<String, StoreError> {
        write_bytes_atomic(&self.assets_dir.join(file_name), bytes)?;
        Ok(ReportPaths::asset_rel(&self.flow_id, file_name))
    }

    fn command_mut(&mut self, index: usize) -> Result<&mut CommandRecord, StoreError> {
        let flow_id = self.flow_id.clone();
        self.detail
            .commands
            .get_mut(index)
            .ok_or(StoreError::UnknownCommand(flow_id, index))
    }

    fn command_summary(&self) -> CommandSummary {
        CommandSummary::aggregate(&self.detail.commands)
    }

    fn persist_detail(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.detail_path, &self.detail)
    }

    fn notify_progress(&self) {
        self.index.apply_progress(
            &self.flow_id,
            FlowEntryPatch {
                commands: Some(self.command_summary()),
                ..Default::default()
            },
        );
    }
}

fn duration_between(started: Option<DateTime<Utc>>, finished: DateTime<Utc>) -> Option<u64> {
    started.map(|started| (finished - started).num_milliseconds().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::read_json;
    use crate::model::RunIndex;
    use crate::skeleton::{build_skeleton, RunMetadata};
    use tapflow_types::{Flow, FlowConfig, Selector, Step, StepKind};

    fn setup() -> (tempfile::TempDir, ReportPaths, IndexWriter, FlowWriter) {
        let flow = Flow {
            config: FlowConfig {
                name: Some("login".into()),
                ..Default::default()
            },
            steps: vec![
                Step::new(StepKind::TapOn {
                    selector: Selector::text("Login"),
                }),
                Step::new(StepKind::InputText { text: "alice".into() }),
                Step::new(StepKind::Back),
            ],
        };
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::new(dir.path());
        let skeleton = build_skeleton(&[flow], RunMetadata::default());
        skeleton.write(&paths).unwrap();
        let index_writer = IndexWriter::new(&paths, skeleton.index);
        index_writer.start().unwrap();
        let flow_writer = FlowWriter::new(&paths, skeleton.details.into_iter().next().unwrap(), index_writer.clone());
        (dir, paths, index_writer, flow_writer)
    }

    #[test]
    fn command_lifecycle_is_persisted_to_the_detail_file() {
        let (_dir, paths, _index, mut writer) = setup();
        writer.start().unwrap();
        writer.command_start(0).unwrap();
        writer
            .command_end(0, Status::Passed, None, None, CommandArtifacts::default())
            .unwrap();

        let detail: FlowDetail = read_json(&paths.flow_detail("flow-000")).unwrap();
        assert_eq!(detail.commands[0].status, Status::Passed);
        assert!(detail.commands[0].duration_ms.is_some());
        assert_eq!(detail.commands[1].status, Status::Pending);
    }

    #[test]
    fn skip_remaining_marks_only_non_terminal_commands() {
        let (_dir, paths, _index, mut writer) = setup();
        writer.start().unwrap();
        writer.command_start(0).unwrap();
        writer
            .command_end(0, Status::Passed, None, None, CommandArtifacts::default())
            .unwrap();
        writer.skip_remaining_commands(0).unwrap();

        let detail: FlowDetail = read_json(&paths.flow_detail("flow-000")).unwrap();
        assert_eq!(detail.commands[0].status, Status::Passed);
        assert_eq!(detail.commands[1].status, Status::Skipped);
        assert_eq!(detail.commands[2].status, Status::Skipped);
    }

    #[test]
    fn end_flushes_terminal_state_to_the_index() {
        let (_dir, paths, _index, mut writer) = setup();
        writer.start().unwrap();
        writer.end(Status::Failed, Some("driver error: boom".into())).unwrap();

        let index: RunIndex = read_json(&paths.index()).unwrap();
        assert_eq!(index.flows[0].status, Status::Failed);
        assert_eq!(index.flows[0].error.as_deref(), Some("driver error: boom"));
        assert_eq!(index.status, Status::Failed);
        assert!(index.flows[0].duration_ms.is_some());
    }

    #[test]
    fn failed_command_records_error_info() {
        let (_dir, paths, _index, mut writer) = setup();
        writer.start().unwrap();
        writer.command_start(0).unwrap();
        let error = RunnerError::Driver("element not found: Login".into());
        writer
            .command_end(0, Status::Failed, None, Some(&error), CommandArtifacts::default())
            .unwrap();

        let detail: FlowDetail = read_json(&paths.flow_detail("flow-000")).unwrap();
        let recorded = detail.commands[0].error.as_ref().unwrap();
        assert_eq!(recorded.kind, "driver");
        assert_eq!(recorded.message, "element not found: Login");
        assert!(recorded.suggestion.is_some());
    }

    #[test]
    fn sub_commands_attach_in_one_shot() {
        let (_dir, paths, _index, mut writer) = setup();
        writer.start().unwrap();
        writer.command_start(0).unwrap();
        let sub = CommandRecord {
            id: "sub-1".into(),
            index: 0,
            kind: "tapOn".into(),
            label: "tap".into(),
            yaml: String::new(),
            status: Status::Passed,
            started_at: None,
            finished_at: None,
            duration_ms: Some(4),
            params: Default::default(),
            element: None,
            error: None,
            artifacts: CommandArtifacts::default(),
            sub_commands: Vec::new(),
        };
        writer
            .command_end_with_subs(0, Status::Passed, None, None, CommandArtifacts::default(), vec![sub])
            .unwrap();

        let detail: FlowDetail = read_json(&paths.flow_detail("flow-000")).unwrap();
        assert_eq!(detail.commands[0].sub_commands.len(), 1);
        assert_eq!(detail.commands[0].sub_commands[0].id, "sub-1");
    }

    #[test]
    fn flow_artifacts_and_video_timestamps_round_trip() {
        let (_dir, paths, _index, mut writer) = setup();
        writer.start().unwrap();
        let video = writer.save_device_log(b"boot ok").unwrap();
        writer.set_flow_artifacts(Some("assets/flow-000/video.mp4".into()), Some(video)).unwrap();
        writer.add_video_timestamp(0, 120).unwrap();
        writer.add_video_timestamp(1, 840).unwrap();

        let detail: FlowDetail = read_json(&paths.flow_detail("flow-000")).unwrap();
        assert_eq!(detail.artifacts.video.as_deref(), Some("assets/flow-000/video.mp4"));
        assert_eq!(detail.artifacts.device_log.as_deref(), Some("assets/flow-000/device.log"));
        assert_eq!(detail.artifacts.video_timestamps.len(), 2);
        assert_eq!(detail.artifacts.video_timestamps[1].offset_ms, 840);
    }

    #[test]
    fn asset_paths_are_relative_with_forward_slashes() {
        let (_dir, _paths, _index, writer) = setup();
        let path = writer.save_screenshot(2, "before", b"png-bytes").unwrap();
        assert_eq!(path, "assets/flow-000/cmd-002-before.png");
        let log_path = writer.save_device_log(b"log line").unwrap();
        assert_eq!(log_path, "assets/flow-000/device.log");
    }
}
