//! Condition evaluation.
//!
//! Script and platform predicates are answered by the script engine;
//! visibility predicates consult the driver through synthesized assert
//! steps, so the driver's own wait/match semantics apply.

use tapflow_types::{Condition, RunnerError, Step, StepKind};

use crate::driver::Driver;
use crate::expand::expand_selector;
use crate::script::ScriptEngine;

/// Evaluates a condition's conjunction of predicates. Empty conditions are
/// vacuously true.
pub fn evaluate_condition(engine: &ScriptEngine, driver: &dyn Driver, condition: &Condition) -> Result<bool, RunnerError> {
    if let Some(platform) = &condition.platform {
        let expected = engine.expand(platform).to_lowercase();
        let actual = engine.platform().map(|platform| platform.as_str().to_string());
        if actual.as_deref() != Some(expected.as_str()) {
            return Ok(false);
        }
    }

    if let Some(script) = &condition.script
        && !engine.evaluate_assertion(script)?
    {
        return Ok(false);
    }

    if let Some(selector) = &condition.visible {
        let probe = Step::new(StepKind::AssertVisible {
            selector: expand_selector(engine, selector),
        });
        if !driver.execute(&probe).success {
            return Ok(false);
        }
    }

    if let Some(selector) = &condition.not_visible {
        let probe = Step::new(StepKind::AssertNotVisible {
            selector: expand_selector(engine, selector),
        });
        if !driver.execute(&probe).success {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NoopDriver;
    use tapflow_types::{FlowConfig, Platform, Selector};

    fn engine() -> ScriptEngine {
        ScriptEngine::for_flow(&FlowConfig::default(), Some(Platform::Android))
    }

    #[test]
    fn empty_condition_is_true() {
        let result = evaluate_condition(&engine(), &NoopDriver::default(), &Condition::default()).unwrap();
        assert!(result);
    }

    #[test]
    fn platform_predicate_compares_lowercase() {
        let condition = Condition {
            platform: Some("Android".into()),
            ..Default::default()
        };
        assert!(evaluate_condition(&engine(), &NoopDriver::default(), &condition).unwrap());

        let condition = Condition {
            platform: Some("ios".into()),
            ..Default::default()
        };
        assert!(!evaluate_condition(&engine(), &NoopDriver::default(), &condition).unwrap());
    }

    #[test]
    fn script_predicate_uses_assertion_coercion() {
        let mut engine = engine();
        engine.set_var("READY", "true");
        let condition = Condition {
            script: Some("${READY}".into()),
            ..Default::default()
        };
        assert!(evaluate_condition(&engine, &NoopDriver::default(), &condition).unwrap());

        let condition = Condition {
            script: Some("${READY == 'no'}".into()),
            ..Default::default()
        };
        assert!(!evaluate_condition(&engine, &NoopDriver::default(), &condition).unwrap());
    }

    #[test]
    fn visibility_predicates_consult_the_driver() {
        let condition = Condition {
            visible: Some(Selector::text("Welcome")),
            ..Default::default()
        };
        // NoopDriver reports every probe as successful.
        assert!(evaluate_condition(&engine(), &NoopDriver::default(), &condition).unwrap());
    }
}
