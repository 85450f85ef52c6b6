//! Flow and step definitions.
//!
//! A [`Flow`] is the parsed form of one flow file: an ordered list of
//! [`Step`]s plus its [`FlowConfig`]. Steps are a closed tagged sum
//! ([`StepKind`]) so that every dispatch site is an exhaustive `match` and a
//! new variant is a compile error rather than a silent fallthrough.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::selector::Selector;

/// Swipe / scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// Header fields shared by every step variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BaseStep {
    /// When true, a failure is recorded but does not fail the enclosing scope.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    /// Per-step timeout hint passed down to the driver, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Human label shown in reports instead of the derived description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// `repeat` compound step: run inner steps N times or while a condition holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepeatStep {
    /// Iteration count; may be a `${...}` expression. Defaults to 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<String>,
    /// Loop guard evaluated before each iteration.
    #[serde(rename = "while", skip_serializing_if = "Option::is_none")]
    pub while_condition: Option<Condition>,
    pub steps: Vec<Step>,
}

/// `retry` compound step: re-run inner steps until a pass or attempts run out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryStep {
    /// Maximum attempts; may be a `${...}` expression. Defaults to 3.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    /// Flow file to run instead of inline steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Variables scoped to the retry body.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

/// `runFlow` compound step: run inline steps or another flow file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunFlowStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    /// Gate: when present and false, the body is not executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    /// Variables scoped to the sub-flow.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
}

/// The closed sum of step variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepKind {
    TapOn { selector: Selector },
    DoubleTapOn { selector: Selector },
    LongPressOn { selector: Selector },
    InputText { text: String },
    Swipe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<String>,
    },
    Scroll {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
    },
    Back,
    PressKey { key: String },
    OpenLink { link: String },
    HideKeyboard,
    CopyTextFrom { selector: Selector },
    PasteText,
    WaitUntil {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        visible: Option<Selector>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        not_visible: Option<Selector>,
        /// Wait budget in milliseconds. Serialized as `timeout` so it cannot
        /// collide with the header's `timeoutMs` in the flattened step map.
        #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    ScrollUntilVisible {
        selector: Selector,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
        #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    AssertVisible { selector: Selector },
    AssertNotVisible { selector: Selector },
    LaunchApp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    StopApp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    KillApp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    ClearState {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    DefineVariables { variables: IndexMap<String, String> },
    RunScript {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    EvalScript { script: String },
    AssertTrue { condition: String },
    AssertCondition { condition: Condition },
    Repeat(RepeatStep),
    Retry(RetryStep),
    RunFlow(RunFlowStep),
}

impl StepKind {
    /// The camelCase tag recorded as the command `type` in reports.
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::TapOn { .. } => "tapOn",
            StepKind::DoubleTapOn { .. } => "doubleTapOn",
            StepKind::LongPressOn { .. } => "longPressOn",
            StepKind::InputText { .. } => "inputText",
            StepKind::Swipe { .. } => "swipe",
            StepKind::Scroll { .. } => "scroll",
            StepKind::Back => "back",
            StepKind::PressKey { .. } => "pressKey",
            StepKind::OpenLink { .. } => "openLink",
            StepKind::HideKeyboard => "hideKeyboard",
            StepKind::CopyTextFrom { .. } => "copyTextFrom",
            StepKind::PasteText => "pasteText",
            StepKind::WaitUntil { .. } => "waitUntil",
            StepKind::ScrollUntilVisible { .. } => "scrollUntilVisible",
            StepKind::AssertVisible { .. } => "assertVisible",
            StepKind::AssertNotVisible { .. } => "assertNotVisible",
            StepKind::LaunchApp { .. } => "launchApp",
            StepKind::StopApp { .. } => "stopApp",
            StepKind::KillApp { .. } => "killApp",
            StepKind::ClearState { .. } => "clearState",
            StepKind::DefineVariables { .. } => "defineVariables",
            StepKind::RunScript { .. } => "runScript",
            StepKind::EvalScript { .. } => "evalScript",
            StepKind::AssertTrue { .. } => "assertTrue",
            StepKind::AssertCondition { .. } => "assertCondition",
            StepKind::Repeat(_) => "repeat",
            StepKind::Retry(_) => "retry",
            StepKind::RunFlow(_) => "runFlow",
        }
    }

    /// Compound steps execute a nested step list and do not count themselves
    /// in step totals.
    pub fn is_compound(&self) -> bool {
        matches!(self, StepKind::Repeat(_) | StepKind::Retry(_) | StepKind::RunFlow(_))
    }

    /// Scripting steps are handled by the script interpreter and are exempt
    /// from pre-dispatch variable expansion.
    pub fn is_script(&self) -> bool {
        matches!(
            self,
            StepKind::DefineVariables { .. }
                | StepKind::RunScript { .. }
                | StepKind::EvalScript { .. }
                | StepKind::AssertTrue { .. }
                | StepKind::AssertCondition { .. }
        )
    }
}

/// A single instruction in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub base: BaseStep,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self {
            base: BaseStep::default(),
            kind,
        }
    }

    pub fn optional(mut self) -> Self {
        self.base.optional = true;
        self
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.base.label = Some(label.into());
        self
    }

    /// The label when set, otherwise a description derived from the variant.
    pub fn describe(&self) -> String {
        if let Some(label) = &self.base.label {
            return label.clone();
        }
        match &self.kind {
            StepKind::TapOn { selector }
            | StepKind::DoubleTapOn { selector }
            | StepKind::LongPressOn { selector }
            | StepKind::CopyTextFrom { selector }
            | StepKind::AssertVisible { selector }
            | StepKind::AssertNotVisible { selector } => {
                format!("{} {}", self.kind.tag(), selector.display())
            }
            StepKind::InputText { text } => format!("inputText {text:?}"),
            StepKind::Swipe { direction, .. } | StepKind::Scroll { direction } => match direction {
                Some(direction) => format!("{} {}", self.kind.tag(), direction.as_str()),
                None => self.kind.tag().to_string(),
            },
            StepKind::PressKey { key } => format!("pressKey {key}"),
            StepKind::OpenLink { link } => format!("openLink {link}"),
            StepKind::ScrollUntilVisible { selector, .. } => {
                format!("scrollUntilVisible {}", selector.display())
            }
            StepKind::LaunchApp { app_id } | StepKind::StopApp { app_id } | StepKind::KillApp { app_id } | StepKind::ClearState { app_id } => {
                match app_id {
                    Some(app_id) => format!("{} {app_id}", self.kind.tag()),
                    None => self.kind.tag().to_string(),
                }
            }
            StepKind::AssertTrue { condition } => format!("assertTrue {condition}"),
            StepKind::AssertCondition { condition } => format!("assertCondition {}", condition.display()),
            StepKind::Repeat(repeat) => match (&repeat.times, &repeat.while_condition) {
                (Some(times), _) => format!("repeat x{times}"),
                (None, Some(condition)) => format!("repeat while {}", condition.display()),
                (None, None) => "repeat".to_string(),
            },
            StepKind::Retry(retry) => match &retry.file {
                Some(file) => format!("retry {file}"),
                None => "retry".to_string(),
            },
            StepKind::RunFlow(run_flow) => match &run_flow.file {
                Some(file) => format!("runFlow {file}"),
                None => "runFlow".to_string(),
            },
            _ => self.kind.tag().to_string(),
        }
    }
}

/// Immutable configuration block of a parsed flow file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowConfig {
    /// Display name; falls back to the source file stem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Application identifier injected into app-lifecycle steps that omit one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Variables seeded into the script interpreter at flow start.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Flow-wide element-find timeout installed into the driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
    /// Hook steps run before the main step list.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_flow_start: Vec<Step>,
    /// Hook steps run after the flow ends, on every exit path.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_flow_complete: Vec<Step>,
    /// Where the flow was loaded from; used to resolve referenced files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

/// One parsed flow file: ordered steps plus configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub config: FlowConfig,
    pub steps: Vec<Step>,
}

impl Flow {
    /// Display name: config name, else source file stem, else a placeholder.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.config.name {
            return name.clone();
        }
        self.config
            .source_path
            .as_deref()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed flow".to_string())
    }
}
