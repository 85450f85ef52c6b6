//! Shared type definitions for the tapflow mobile-UI flow runner.
//!
//! These models are consumed by the execution engine, the report store, and
//! any front-end that renders run output. They intentionally preserve
//! authoring order (via `IndexMap`) so environment maps and variable
//! definitions apply in the sequence the flow author wrote them.

pub mod command;
pub mod condition;
pub mod error;
pub mod flow;
pub mod selector;
pub mod status;

pub use command::{CommandResult, ElementBounds, ElementInfo};
pub use condition::Condition;
pub use error::RunnerError;
pub use flow::{BaseStep, Direction, Flow, FlowConfig, RepeatStep, RetryStep, RunFlowStep, Step, StepKind};
pub use selector::Selector;
pub use status::{Platform, Status};
