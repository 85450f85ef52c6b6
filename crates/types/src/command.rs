//! Per-step execution results exchanged between drivers, the script
//! interpreter, and the flow interpreter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunnerError;

/// Screen-space bounds of a matched element, in device pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementBounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Information about the element a UI step acted on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementInfo {
    /// Resource / accessibility identifier, when the driver reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Visible text of the element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<ElementBounds>,
}

/// Outcome of executing one step.
///
/// Produced by the driver for UI steps and by the script interpreter for
/// scripting steps. `error` is set exactly when `success` is false.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub error: Option<RunnerError>,
    pub message: String,
    /// Step-specific payload, e.g. the text read by `copyTextFrom`.
    pub data: Option<Value>,
    pub element: Option<ElementInfo>,
}

impl CommandResult {
    /// Successful result with a human-readable message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Failed result; the message mirrors the error's display form.
    pub fn failure(error: RunnerError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_element(mut self, element: ElementInfo) -> Self {
        self.element = Some(element);
        self
    }
}
