//! Flow interpreter: executes the ordered step list of one flow.
//!
//! One instance per flow execution, owned by one task. The interpreter
//! routes each step to the script engine, the driver, or a compound
//! handler; reports progress through its [`FlowWriter`]; and aggregates
//! nested work into the parent command's sub-command list.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tapflow_report::skeleton::command_skeleton;
use tapflow_report::{CommandArtifacts, CommandRecord, ErrorInfo, FlowWriter};
use tapflow_types::{CommandResult, Flow, RepeatStep, RetryStep, RunFlowStep, RunnerError, Status, Step, StepKind};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::condition::evaluate_condition;
use crate::config::{ArtifactPolicy, RunnerConfig};
use crate::driver::Driver;
use crate::expand::expand_step;
use crate::parser::FlowParser;
use crate::script::ScriptEngine;

const CANCELLED_MESSAGE: &str = "execution cancelled";

/// Per-flow step counters. Compound steps never count themselves; their
/// nested leaves are counted individually.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepCounters {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of one flow execution.
#[derive(Debug, Clone)]
pub struct FlowResult {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub steps_passed: usize,
    pub steps_failed: usize,
    pub steps_skipped: usize,
}

impl FlowResult {
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

/// Executes one flow against one driver.
pub struct FlowInterpreter {
    cancel: CancelToken,
    flow: Flow,
    driver: Arc<dyn Driver>,
    parser: Arc<dyn FlowParser>,
    config: RunnerConfig,
    writer: FlowWriter,
    engine: ScriptEngine,
    counters: StepCounters,
    nesting_depth: usize,
    current_app_id: Option<String>,
    position: usize,
    total: usize,
}

impl FlowInterpreter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cancel: CancelToken,
        flow: Flow,
        driver: Arc<dyn Driver>,
        parser: Arc<dyn FlowParser>,
        config: RunnerConfig,
        writer: FlowWriter,
        position: usize,
        total: usize,
    ) -> Self {
        let engine = ScriptEngine::for_flow(&flow.config, Some(driver.platform_info().platform));
        let current_app_id = flow.config.app_id.clone();
        Self {
            cancel,
            flow,
            driver,
            parser,
            config,
            writer,
            engine,
            counters: StepCounters::default(),
            nesting_depth: 0,
            current_app_id,
            position,
            total,
        }
    }

    /// Drives the flow to a terminal state and returns its result.
    ///
    /// `onFlowComplete` hooks run on every exit path, including failure and
    /// cancellation.
    pub fn run(mut self) -> FlowResult {
        let flow_name = self.flow.display_name();
        let started = Instant::now();
        info!(flow = %flow_name, position = self.position, "flow started");
        self.config.progress.emit_flow_start(&flow_name, self.position, self.total);

        if let Some(timeout_ms) = self.flow.config.command_timeout_ms {
            self.driver.set_find_timeout(timeout_ms);
        }

        let (mut status, mut error) = match self.writer.start() {
            Ok(()) => self.run_body(),
            Err(store_error) => (Status::Failed, Some(RunnerError::Io(store_error.to_string()).to_string())),
        };

        let complete_hooks = self.flow.config.on_flow_complete.clone();
        if !complete_hooks.is_empty()
            && let Err(hook_error) = self.run_hooks(&complete_hooks, "onFlowComplete")
        {
            warn!(flow = %flow_name, error = %hook_error, "onFlowComplete hook failed");
            if status == Status::Passed {
                status = Status::Failed;
                error = Some(hook_error.to_string());
            }
        }

        if let Err(write_error) = self.writer.end(status, error.clone()) {
            warn!(flow = %flow_name, error = %write_error, "failed to finalise flow detail");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.config.progress.emit_flow_end(&flow_name, status == Status::Passed, duration_ms);
        match status {
            Status::Failed => warn!(flow = %flow_name, duration_ms, "flow failed"),
            _ => info!(flow = %flow_name, status = %status, duration_ms, "flow finished"),
        }

        FlowResult {
            id: self.writer.flow_id().to_string(),
            name: flow_name,
            status,
            duration_ms,
            error,
            steps_passed: self.counters.passed,
            steps_failed: self.counters.failed,
            steps_skipped: self.counters.skipped,
        }
    }

    fn run_body(&mut self) -> (Status, Option<String>) {
        let start_hooks = self.flow.config.on_flow_start.clone();
        if !start_hooks.is_empty()
            && let Err(hook_error) = self.run_hooks(&start_hooks, "onFlowStart")
        {
            if let Err(write_error) = self.writer.skip_remaining_commands(0) {
                warn!(error = %write_error, "failed to skip-mark commands");
            }
            self.count_skipped_from(0);
            return (Status::Failed, Some(hook_error.to_string()));
        }

        let steps = self.flow.steps.clone();
        for (index, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(index, "cancellation observed; skipping remaining steps");
                if let Err(write_error) = self.writer.skip_remaining_commands(index) {
                    warn!(error = %write_error, "failed to skip-mark commands");
                }
                self.count_skipped_from(index);
                return (Status::Skipped, Some(CANCELLED_MESSAGE.to_string()));
            }

            let result = self.execute_top_level(index, step);
            if !result.success && !step.base.optional {
                if let Err(write_error) = self.writer.skip_remaining_commands(index + 1) {
                    warn!(error = %write_error, "failed to skip-mark commands");
                }
                self.count_skipped_from(index + 1);
                return (Status::Failed, Some(result.message));
            }
        }

        (Status::Passed, None)
    }

    /// Executes one top-level step: records start/end on the detail file,
    /// captures artifacts per policy, and updates counters.
    fn execute_top_level(&mut self, index: usize, step: &Step) -> CommandResult {
        let timer = Instant::now();
        if let Err(store_error) = self.writer.command_start(index) {
            warn!(index, error = %store_error, "failed to record command start");
        }

        let mut artifacts = CommandArtifacts::default();
        if self.config.artifact_policy == ArtifactPolicy::Always {
            artifacts.screenshot_before = self.capture_screenshot(index, "before");
        }

        let (result, sub_commands) = self.execute_step(step);
        let status = if result.success { Status::Passed } else { Status::Failed };

        match self.config.artifact_policy {
            ArtifactPolicy::Always => {
                artifacts.screenshot_after = self.capture_screenshot(index, "after");
            }
            ArtifactPolicy::OnFailure if !result.success => {
                artifacts.screenshot_after = self.capture_screenshot(index, "after");
                artifacts.view_hierarchy = self.capture_hierarchy(index);
            }
            _ => {}
        }

        if !step.kind.is_compound() {
            self.count_status(status);
        }

        let write_result = match sub_commands {
            Some(sub_commands) => {
                self.writer
                    .command_end_with_subs(index, status, result.element.clone(), result.error.as_ref(), artifacts, sub_commands)
            }
            None => self
                .writer
                .command_end(index, status, result.element.clone(), result.error.as_ref(), artifacts),
        };
        if let Err(store_error) = write_result {
            warn!(index, error = %store_error, "failed to record command end");
        }

        let duration_ms = timer.elapsed().as_millis() as u64;
        let description = step.describe();
        let error_text = (!result.success).then_some(result.message.as_str());
        self.config
            .progress
            .emit_step_complete(index, &description, result.success, duration_ms, error_text);
        debug!(index, step = %description, success = result.success, duration_ms, "step finished");

        result
    }

    /// Routes a step to its handler. Compound steps return the accumulated
    /// nested records alongside the result.
    fn execute_step(&mut self, step: &Step) -> (CommandResult, Option<Vec<CommandRecord>>) {
        match &step.kind {
            StepKind::Repeat(repeat) => {
                let mut sub_commands = Vec::new();
                let result = self.execute_repeat(repeat, &mut sub_commands);
                (result, Some(sub_commands))
            }
            StepKind::Retry(retry) => {
                let mut sub_commands = Vec::new();
                let result = self.execute_retry(retry, &mut sub_commands);
                (result, Some(sub_commands))
            }
            StepKind::RunFlow(run_flow) => {
                let mut sub_commands = Vec::new();
                let result = self.execute_run_flow(run_flow, &mut sub_commands);
                (result, Some(sub_commands))
            }
            _ => (self.dispatch_leaf(step), None),
        }
    }

    /// The step router for non-compound steps.
    fn dispatch_leaf(&mut self, step: &Step) -> CommandResult {
        match &step.kind {
            StepKind::DefineVariables { variables } => {
                self.engine.define_variables(variables);
                CommandResult::ok(format!("Defined {} variable(s)", variables.len()))
            }
            StepKind::RunScript { script, file } => {
                let text = match (script, file) {
                    (Some(script), _) => script.clone(),
                    (None, Some(file)) => {
                        let path = self.engine.resolve_path(file);
                        match std::fs::read_to_string(&path) {
                            Ok(text) => text,
                            Err(io_error) => {
                                return CommandResult::failure(RunnerError::Io(format!(
                                    "failed to read script {}: {io_error}",
                                    path.display()
                                )));
                            }
                        }
                    }
                    (None, None) => {
                        return CommandResult::failure(RunnerError::Configuration(
                            "runScript requires inline text or a file".to_string(),
                        ));
                    }
                };
                match self.engine.run_script(&text) {
                    Ok(()) => CommandResult::ok("Script executed"),
                    Err(script_error) => CommandResult::failure(script_error),
                }
            }
            StepKind::EvalScript { script } => match self.engine.run_script(script) {
                Ok(()) => CommandResult::ok("Script evaluated"),
                Err(script_error) => CommandResult::failure(script_error),
            },
            StepKind::AssertTrue { condition } => match self.engine.evaluate_assertion(condition) {
                Ok(true) => CommandResult::ok(format!("Assertion held: {condition}")),
                Ok(false) => CommandResult::failure(RunnerError::Assertion(format!("expected '{condition}' to be true"))),
                Err(script_error) => CommandResult::failure(script_error),
            },
            StepKind::AssertCondition { condition } => match evaluate_condition(&self.engine, self.driver.as_ref(), condition) {
                Ok(true) => CommandResult::ok(format!("Condition held: {}", condition.display())),
                Ok(false) => CommandResult::failure(RunnerError::Assertion(format!("condition not met: {}", condition.display()))),
                Err(script_error) => CommandResult::failure(script_error),
            },
            StepKind::LaunchApp { .. } | StepKind::StopApp { .. } | StepKind::KillApp { .. } | StepKind::ClearState { .. } => {
                let step = self.inject_app_id(step);
                let expanded = expand_step(&self.engine, &step);
                self.driver.execute(&expanded)
            }
            StepKind::CopyTextFrom { .. } => {
                let expanded = expand_step(&self.engine, step);
                let result = self.driver.execute(&expanded);
                if result.success {
                    let copied = result
                        .data
                        .as_ref()
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| result.element.as_ref().and_then(|element| element.text.clone()));
                    match copied {
                        Some(text) => self.engine.set_copied_text(text),
                        None => warn!("copyTextFrom succeeded but returned no text"),
                    }
                }
                result
            }
            StepKind::PasteText => match self.engine.copied_text() {
                // In-memory copied text wins; the driver's clipboard is the
                // fallback when nothing was copied in this flow.
                Some(text) => {
                    let synthesized = Step {
                        base: step.base.clone(),
                        kind: StepKind::InputText { text: text.to_string() },
                    };
                    self.driver.execute(&synthesized)
                }
                None => self.driver.execute(step),
            },
            StepKind::TapOn { .. }
            | StepKind::DoubleTapOn { .. }
            | StepKind::LongPressOn { .. }
            | StepKind::InputText { .. }
            | StepKind::Swipe { .. }
            | StepKind::Scroll { .. }
            | StepKind::Back
            | StepKind::PressKey { .. }
            | StepKind::OpenLink { .. }
            | StepKind::HideKeyboard
            | StepKind::WaitUntil { .. }
            | StepKind::ScrollUntilVisible { .. }
            | StepKind::AssertVisible { .. }
            | StepKind::AssertNotVisible { .. } => {
                let expanded = expand_step(&self.engine, step);
                self.driver.execute(&expanded)
            }
            StepKind::Repeat(_) | StepKind::Retry(_) | StepKind::RunFlow(_) => {
                CommandResult::failure(RunnerError::Configuration("compound step reached leaf dispatch".to_string()))
            }
        }
    }

    fn execute_repeat(&mut self, repeat: &RepeatStep, sub_commands: &mut Vec<CommandRecord>) -> CommandResult {
        let times = self.engine.parse_int(repeat.times.as_deref(), 1);
        // A while-condition with no positive count is a pure loop; the cap
        // guards against predicates that never flip.
        let iterations_cap = if repeat.while_condition.is_some() && times <= 0 {
            self.config.repeat_cap as i64
        } else {
            times.max(0)
        };

        let mut completed = 0i64;
        for _ in 0..iterations_cap {
            if self.cancel.is_cancelled() {
                return CommandResult::failure(RunnerError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }
            if let Some(condition) = &repeat.while_condition {
                match evaluate_condition(&self.engine, self.driver.as_ref(), condition) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(script_error) => return CommandResult::failure(script_error),
                }
            }
            if let Err(step_error) = self.execute_step_list(&repeat.steps, sub_commands, true, true) {
                return CommandResult::failure(step_error);
            }
            completed += 1;
        }

        CommandResult::ok(format!("Repeated {completed} time(s)"))
    }

    fn execute_retry(&mut self, retry: &RetryStep, sub_commands: &mut Vec<CommandRecord>) -> CommandResult {
        let max_retries = self.engine.parse_int(retry.max_retries.as_deref(), 3).max(1);
        let saved_env = (!retry.env.is_empty()).then(|| self.engine.with_env_vars(&retry.env));
        let result = self.run_retry_attempts(retry, max_retries, sub_commands);
        if let Some(saved) = saved_env {
            self.engine.restore_env(saved);
        }
        result
    }

    fn run_retry_attempts(&mut self, retry: &RetryStep, max_retries: i64, sub_commands: &mut Vec<CommandRecord>) -> CommandResult {
        let sub_flow = if retry.steps.is_empty() {
            match &retry.file {
                Some(file) => match self.load_flow(file) {
                    Ok(flow) => Some(flow),
                    Err(load_error) => return CommandResult::failure(load_error),
                },
                None => {
                    return CommandResult::failure(RunnerError::Configuration("retry requires inline steps or a file".to_string()));
                }
            }
        } else {
            None
        };

        let mut last_error = None;
        for attempt in 1..=max_retries {
            if self.cancel.is_cancelled() {
                return CommandResult::failure(RunnerError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }
            let outcome = match &sub_flow {
                Some(flow) => self.run_sub_flow(flow, sub_commands),
                None => self.execute_step_list(&retry.steps, sub_commands, true, true),
            };
            match outcome {
                Ok(()) => {
                    self.writer.set_retry_attempts(attempt as u32);
                    return CommandResult::ok(format!("Retry succeeded on attempt {attempt}"));
                }
                Err(step_error) => {
                    if step_error.is_cancellation() {
                        return CommandResult::failure(step_error);
                    }
                    warn!(attempt, max_retries, error = %step_error, "retry attempt failed");
                    last_error = Some(step_error);
                }
            }
        }

        self.writer.set_retry_attempts(max_retries as u32);
        let error = last_error.unwrap_or_else(|| RunnerError::Configuration("retry executed no attempts".to_string()));
        CommandResult {
            success: false,
            message: format!("Retry failed after {max_retries} attempts"),
            error: Some(error),
            data: None,
            element: None,
        }
    }

    fn execute_run_flow(&mut self, run_flow: &RunFlowStep, sub_commands: &mut Vec<CommandRecord>) -> CommandResult {
        if let Some(when) = &run_flow.when {
            match evaluate_condition(&self.engine, self.driver.as_ref(), when) {
                // The outer step passes but produces no inner work; it
                // contributes nothing to step counters.
                Ok(false) => return CommandResult::ok("Skipped (when condition not met)"),
                Err(script_error) => return CommandResult::failure(script_error),
                Ok(true) => {}
            }
        }

        self.nesting_depth += 1;
        let description = run_flow.file.clone().unwrap_or_else(|| "inline flow".to_string());
        self.config.progress.emit_nested_flow_start(self.nesting_depth, &description);
        let saved_env = (!run_flow.env.is_empty()).then(|| self.engine.with_env_vars(&run_flow.env));

        let outcome = if !run_flow.steps.is_empty() {
            self.execute_step_list(&run_flow.steps, sub_commands, true, true)
        } else if let Some(file) = &run_flow.file {
            match self.load_flow(file) {
                Ok(sub_flow) => self.run_sub_flow(&sub_flow, sub_commands),
                Err(load_error) => Err(load_error),
            }
        } else {
            Err(RunnerError::Configuration("runFlow requires inline steps or a file".to_string()))
        };

        if let Some(saved) = saved_env {
            self.engine.restore_env(saved);
        }
        self.nesting_depth -= 1;

        match outcome {
            Ok(()) => CommandResult::ok("Sub-flow completed"),
            Err(step_error) => CommandResult::failure(step_error),
        }
    }

    /// Runs a file-loaded sub-flow: its flow directory, env scope, and
    /// app-id default apply for the duration and are restored on exit.
    fn run_sub_flow(&mut self, sub_flow: &Flow, sub_commands: &mut Vec<CommandRecord>) -> Result<(), RunnerError> {
        let saved_dir = self.engine.flow_dir();
        if let Some(source) = &sub_flow.config.source_path {
            self.engine.set_flow_dir(source.parent().map(Path::to_path_buf));
        }

        let mut scope = sub_flow.config.env.clone();
        if let Some(app_id) = &sub_flow.config.app_id {
            scope.insert("APP_ID".to_string(), app_id.clone());
        }
        let saved_env = (!scope.is_empty()).then(|| self.engine.with_env_vars(&scope));
        let saved_app_id = self.current_app_id.clone();
        if sub_flow.config.app_id.is_some() {
            self.current_app_id = sub_flow.config.app_id.clone();
        }

        let outcome = self.execute_step_list(&sub_flow.steps, sub_commands, true, true);

        self.current_app_id = saved_app_id;
        if let Some(saved) = saved_env {
            self.engine.restore_env(saved);
        }
        self.engine.set_flow_dir(saved_dir);
        outcome
    }

    /// Executes steps as sub-steps of a compound construct, appending one
    /// record per step to the parent's accumulator. With `count` set,
    /// counters are updated exactly as for top-level non-compound steps;
    /// hook steps run with it unset because they are not part of the flow's
    /// own step list.
    fn execute_step_list(
        &mut self,
        steps: &[Step],
        sub_commands: &mut Vec<CommandRecord>,
        honor_cancel: bool,
        count: bool,
    ) -> Result<(), RunnerError> {
        for step in steps {
            if honor_cancel && self.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled(CANCELLED_MESSAGE.to_string()));
            }

            let started_at = Utc::now();
            let timer = Instant::now();
            let (result, child_subs) = self.execute_step(step);
            let duration_ms = timer.elapsed().as_millis() as u64;
            let status = if result.success { Status::Passed } else { Status::Failed };
            if count && !step.kind.is_compound() {
                self.count_status(status);
            }

            let record_index = sub_commands.len();
            let mut record = command_skeleton(record_index, step);
            record.id = format!("sub-{}", record_index + 1);
            record.status = status;
            record.started_at = Some(started_at);
            record.finished_at = Some(Utc::now());
            record.duration_ms = Some(duration_ms);
            record.element = result.element.clone();
            record.error = result.error.as_ref().map(ErrorInfo::from_error);
            record.sub_commands = child_subs.unwrap_or_default();
            sub_commands.push(record);

            let description = step.describe();
            let error_text = (!result.success).then_some(result.message.as_str());
            self.config
                .progress
                .emit_nested_step(self.nesting_depth.max(1), &description, result.success, duration_ms, error_text);

            if !result.success && !step.base.optional {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| RunnerError::Driver(result.message.clone()));
                return Err(error);
            }
        }
        Ok(())
    }

    /// Hook steps execute through the nested machinery but are not part of
    /// the flow's own step list: their records are discarded and they never
    /// touch the step counters. Hooks ignore cancellation so
    /// `onFlowComplete` still runs on a cancelled flow.
    fn run_hooks(&mut self, steps: &[Step], hook: &str) -> Result<(), RunnerError> {
        debug!(hook, count = steps.len(), "running hook steps");
        let mut discarded = Vec::new();
        self.execute_step_list(steps, &mut discarded, false, false)
    }

    fn inject_app_id(&self, step: &Step) -> Step {
        let default_app_id = || self.current_app_id.clone();
        let needs_default = |app_id: &Option<String>| app_id.as_deref().map(str::is_empty).unwrap_or(true);

        let mut injected = step.clone();
        injected.kind = match &step.kind {
            StepKind::LaunchApp { app_id } if needs_default(app_id) => StepKind::LaunchApp { app_id: default_app_id() },
            StepKind::StopApp { app_id } if needs_default(app_id) => StepKind::StopApp { app_id: default_app_id() },
            StepKind::KillApp { app_id } if needs_default(app_id) => StepKind::KillApp { app_id: default_app_id() },
            StepKind::ClearState { app_id } if needs_default(app_id) => StepKind::ClearState { app_id: default_app_id() },
            other => other.clone(),
        };
        injected
    }

    fn load_flow(&self, file: &str) -> Result<Flow, RunnerError> {
        let path = self.engine.resolve_path(file);
        self.parser
            .parse_file(&path)
            .map_err(|parse_error| RunnerError::Io(format!("failed to load flow {}: {parse_error}", path.display())))
    }

    fn count_status(&mut self, status: Status) {
        match status {
            Status::Passed => self.counters.passed += 1,
            Status::Failed => self.counters.failed += 1,
            Status::Skipped => self.counters.skipped += 1,
            Status::Pending | Status::Running => {}
        }
    }

    fn count_skipped_from(&mut self, from_index: usize) {
        for step in &self.flow.steps[from_index.min(self.flow.steps.len())..] {
            if !step.kind.is_compound() {
                self.counters.skipped += 1;
            }
        }
    }

    fn capture_screenshot(&mut self, index: usize, suffix: &str) -> Option<String> {
        match self.driver.screenshot() {
            Ok(bytes) => match self.writer.save_screenshot(index, suffix, &bytes) {
                Ok(path) => Some(path),
                Err(store_error) => {
                    warn!(index, error = %store_error, "failed to save screenshot");
                    None
                }
            },
            Err(capture_error) => {
                warn!(index, error = %capture_error, "screenshot capture failed");
                None
            }
        }
    }

    fn capture_hierarchy(&mut self, index: usize) -> Option<String> {
        match self.driver.view_hierarchy() {
            Ok(bytes) => match self.writer.save_view_hierarchy(index, &bytes) {
                Ok(path) => Some(path),
                Err(store_error) => {
                    warn!(index, error = %store_error, "failed to save view hierarchy");
                    None
                }
            },
            Err(capture_error) => {
                warn!(index, error = %capture_error, "view hierarchy capture failed");
                None
            }
        }
    }
}
