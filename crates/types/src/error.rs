//! Semantic error kinds surfaced by step execution.

use thiserror::Error;

/// Error raised while executing a step or persisting its outcome.
///
/// Variants carry the human-readable message directly so results can be
/// cloned into report records without type erasure. The semantic kind string
/// (`kind()`) is what report consumers key on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    /// A UI action failed on the device (element not found, gesture rejected,
    /// app crashed).
    #[error("driver error: {0}")]
    Driver(String),
    /// An `assertTrue` / `assertCondition` evaluated to false.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// The script interpreter raised during parse or evaluation.
    #[error("script error: {0}")]
    Script(String),
    /// A report write, asset save, or referenced-file load failed.
    #[error("io error: {0}")]
    Io(String),
    /// The run context was cancelled.
    #[error("{0}")]
    Cancelled(String),
    /// A step lacks required data (e.g. `runFlow` with neither file nor steps).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RunnerError {
    /// Stable kind string recorded in report error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerError::Driver(_) => "driver",
            RunnerError::Assertion(_) => "assertion",
            RunnerError::Script(_) => "script",
            RunnerError::Io(_) => "io",
            RunnerError::Cancelled(_) => "cancellation",
            RunnerError::Configuration(_) => "configuration",
        }
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            RunnerError::Driver(message)
            | RunnerError::Assertion(message)
            | RunnerError::Script(message)
            | RunnerError::Io(message)
            | RunnerError::Cancelled(message)
            | RunnerError::Configuration(message) => message,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunnerError::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(RunnerError::Driver("x".into()).kind(), "driver");
        assert_eq!(RunnerError::Assertion("x".into()).kind(), "assertion");
        assert_eq!(RunnerError::Script("x".into()).kind(), "script");
        assert_eq!(RunnerError::Io("x".into()).kind(), "io");
        assert_eq!(RunnerError::Cancelled("x".into()).kind(), "cancellation");
        assert_eq!(RunnerError::Configuration("x".into()).kind(), "configuration");
    }

    #[test]
    fn display_includes_message() {
        let error = RunnerError::Driver("element not found: Login".into());
        assert_eq!(error.to_string(), "driver error: element not found: Login");
        assert_eq!(error.message(), "element not found: Login");
    }
}
