//! Pre-dispatch variable expansion over step fields.
//!
//! Non-script steps are expanded immediately before dispatch by walking the
//! variant and expanding every string field, recursively through selector
//! spatial relations. Compound steps are not expanded here: their inner
//! steps expand per iteration, when loop variables have their current
//! values.

use tapflow_types::{Selector, Step, StepKind};

use crate::script::ScriptEngine;

/// Returns a copy of `step` with every expression-bearing string expanded.
pub fn expand_step(engine: &ScriptEngine, step: &Step) -> Step {
    let mut expanded = step.clone();
    if let Some(label) = &step.base.label {
        expanded.base.label = Some(engine.expand(label));
    }

    expanded.kind = match &step.kind {
        StepKind::TapOn { selector } => StepKind::TapOn {
            selector: expand_selector(engine, selector),
        },
        StepKind::DoubleTapOn { selector } => StepKind::DoubleTapOn {
            selector: expand_selector(engine, selector),
        },
        StepKind::LongPressOn { selector } => StepKind::LongPressOn {
            selector: expand_selector(engine, selector),
        },
        StepKind::InputText { text } => StepKind::InputText {
            text: engine.expand(text),
        },
        StepKind::Swipe { direction, start, end } => StepKind::Swipe {
            direction: *direction,
            start: start.as_deref().map(|value| engine.expand(value)),
            end: end.as_deref().map(|value| engine.expand(value)),
        },
        StepKind::PressKey { key } => StepKind::PressKey { key: engine.expand(key) },
        StepKind::OpenLink { link } => StepKind::OpenLink { link: engine.expand(link) },
        StepKind::CopyTextFrom { selector } => StepKind::CopyTextFrom {
            selector: expand_selector(engine, selector),
        },
        StepKind::WaitUntil {
            visible,
            not_visible,
            timeout_ms,
        } => StepKind::WaitUntil {
            visible: visible.as_ref().map(|selector| expand_selector(engine, selector)),
            not_visible: not_visible.as_ref().map(|selector| expand_selector(engine, selector)),
            timeout_ms: *timeout_ms,
        },
        StepKind::ScrollUntilVisible {
            selector,
            direction,
            timeout_ms,
        } => StepKind::ScrollUntilVisible {
            selector: expand_selector(engine, selector),
            direction: *direction,
            timeout_ms: *timeout_ms,
        },
        StepKind::AssertVisible { selector } => StepKind::AssertVisible {
            selector: expand_selector(engine, selector),
        },
        StepKind::AssertNotVisible { selector } => StepKind::AssertNotVisible {
            selector: expand_selector(engine, selector),
        },
        StepKind::LaunchApp { app_id } => StepKind::LaunchApp {
            app_id: app_id.as_deref().map(|value| engine.expand(value)),
        },
        StepKind::StopApp { app_id } => StepKind::StopApp {
            app_id: app_id.as_deref().map(|value| engine.expand(value)),
        },
        StepKind::KillApp { app_id } => StepKind::KillApp {
            app_id: app_id.as_deref().map(|value| engine.expand(value)),
        },
        StepKind::ClearState { app_id } => StepKind::ClearState {
            app_id: app_id.as_deref().map(|value| engine.expand(value)),
        },
        // Scripting steps evaluate their own text; compound steps expand
        // their inner steps per iteration; the rest carry no strings.
        other => other.clone(),
    };

    expanded
}

/// Expands every string field of a selector, recursively through its
/// spatial relations.
pub fn expand_selector(engine: &ScriptEngine, selector: &Selector) -> Selector {
    let expand_opt = |value: &Option<String>| value.as_deref().map(|value| engine.expand(value));
    let expand_box = |value: &Option<Box<Selector>>| {
        value
            .as_deref()
            .map(|inner| Box::new(expand_selector(engine, inner)))
    };

    Selector {
        text: expand_opt(&selector.text),
        id: expand_opt(&selector.id),
        css: expand_opt(&selector.css),
        index: expand_opt(&selector.index),
        traits: selector.traits.clone(),
        point: expand_opt(&selector.point),
        start: expand_opt(&selector.start),
        end: expand_opt(&selector.end),
        label: expand_opt(&selector.label),
        child_of: expand_box(&selector.child_of),
        below: expand_box(&selector.below),
        above: expand_box(&selector.above),
        left_of: expand_box(&selector.left_of),
        right_of: expand_box(&selector.right_of),
        contains_child: expand_box(&selector.contains_child),
        contains_descendants: selector
            .contains_descendants
            .iter()
            .map(|inner| expand_selector(engine, inner))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScriptEngine {
        let mut engine = ScriptEngine::default();
        engine.set_var("BUTTON", "Submit");
        engine.set_var("USERNAME", "alice");
        engine
    }

    #[test]
    fn expands_selector_fields_recursively() {
        let selector = Selector {
            text: Some("${BUTTON}".into()),
            child_of: Some(Box::new(Selector::id("$USERNAME-row"))),
            ..Default::default()
        };
        let step = Step::new(StepKind::TapOn { selector });

        let expanded = expand_step(&engine(), &step);
        let StepKind::TapOn { selector } = &expanded.kind else {
            panic!("variant changed");
        };
        assert_eq!(selector.text.as_deref(), Some("Submit"));
        assert_eq!(selector.child_of.as_ref().unwrap().id.as_deref(), Some("alice-row"));
    }

    #[test]
    fn expands_input_text_and_app_ids() {
        let expanded = expand_step(&engine(), &Step::new(StepKind::InputText { text: "$USERNAME".into() }));
        assert!(matches!(&expanded.kind, StepKind::InputText { text } if text == "alice"));

        let mut launch_engine = engine();
        launch_engine.set_var("APP_ID", "com.example.app");
        let expanded = expand_step(
            &launch_engine,
            &Step::new(StepKind::LaunchApp {
                app_id: Some("${APP_ID}".into()),
            }),
        );
        assert!(matches!(&expanded.kind, StepKind::LaunchApp { app_id } if app_id.as_deref() == Some("com.example.app")));
    }

    #[test]
    fn compound_steps_pass_through_unexpanded() {
        let step = Step::new(StepKind::Repeat(tapflow_types::RepeatStep {
            times: Some("${COUNT}".into()),
            ..Default::default()
        }));
        let expanded = expand_step(&engine(), &step);
        assert_eq!(expanded, step);
    }
}
