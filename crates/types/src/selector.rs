//! UI element addressing.

use serde::{Deserialize, Serialize};

/// Composite description identifying a UI element on screen.
///
/// Exactly one of `text` / `id` / `css` usually anchors the match; the
/// remaining fields refine it. Spatial relations (`child_of`, `below`, ...)
/// nest recursively. String fields may carry `${...}` / `$NAME` variable
/// expressions until the engine expands them immediately before dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Selector {
    /// Visible text or accessibility text to match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Resource / accessibility identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// CSS selector for web view content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    /// Zero-based index among multiple matches. May be an expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Platform accessibility traits the element must expose.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,
    /// Screen point, "x,y" in percent or pixels depending on the driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<String>,
    /// Gesture start point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Gesture end point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Accessibility label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_of: Option<Box<Selector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub below: Option<Box<Selector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub above: Option<Box<Selector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_of: Option<Box<Selector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_of: Option<Box<Selector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains_child: Option<Box<Selector>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contains_descendants: Vec<Selector>,
}

impl Selector {
    /// Selector anchored on visible text.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            ..Default::default()
        }
    }

    /// Selector anchored on a resource identifier.
    pub fn id(value: impl Into<String>) -> Self {
        Self {
            id: Some(value.into()),
            ..Default::default()
        }
    }

    /// The anchor kind and value, if any anchor is set.
    ///
    /// Precedence mirrors match priority: `text`, then `id`, then `css`.
    pub fn anchor(&self) -> Option<(&'static str, &str)> {
        if let Some(text) = self.text.as_deref() {
            return Some(("text", text));
        }
        if let Some(id) = self.id.as_deref() {
            return Some(("id", id));
        }
        self.css.as_deref().map(|css| ("css", css))
    }

    /// Compact human-readable form used in step descriptions and logs.
    pub fn display(&self) -> String {
        match self.anchor() {
            Some((kind, value)) => format!("{kind}={value:?}"),
            None => "<unanchored>".to_string(),
        }
    }
}
