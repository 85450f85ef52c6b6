//! Conditional predicates used by `runFlow.when`, `repeat.while`, and
//! `assertCondition`.

use serde::{Deserialize, Serialize};

use crate::selector::Selector;

/// A conjunction of optional predicates.
///
/// Every predicate that is present must hold for the condition to pass.
/// An empty condition is vacuously true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Condition {
    /// Element that must currently be visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<Selector>,
    /// Element that must currently not be visible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_visible: Option<Selector>,
    /// Boolean script expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Platform the flow must be running on (`"android"` / `"ios"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl Condition {
    pub fn is_empty(&self) -> bool {
        self.visible.is_none() && self.not_visible.is_none() && self.script.is_none() && self.platform.is_none()
    }

    /// Compact form for logs and step descriptions.
    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        if let Some(selector) = &self.visible {
            parts.push(format!("visible {}", selector.display()));
        }
        if let Some(selector) = &self.not_visible {
            parts.push(format!("notVisible {}", selector.display()));
        }
        if let Some(script) = &self.script {
            parts.push(format!("script {script}"));
        }
        if let Some(platform) = &self.platform {
            parts.push(format!("platform {platform}"));
        }
        if parts.is_empty() {
            "<empty>".to_string()
        } else {
            parts.join(" && ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_condition_is_detected() {
        assert!(Condition::default().is_empty());
        let condition = Condition {
            platform: Some("android".into()),
            ..Default::default()
        };
        assert!(!condition.is_empty());
    }

    #[test]
    fn condition_parses_from_yaml() {
        let yaml = r#"
visible:
  text: "Welcome"
script: "${STATUS == 'ready'}"
"#;
        let condition: Condition = serde_yaml::from_str(yaml).unwrap();
        assert!(condition.visible.is_some());
        assert_eq!(condition.script.as_deref(), Some("${STATUS == 'ready'}"));
        assert!(condition.not_visible.is_none());
    }
}
