//! # Tapflow Engine
//!
//! Executes declarative mobile-UI test flows against a running application
//! through an abstract device [`Driver`], coordinating concurrent execution
//! across one or more devices and emitting a crash-tolerant, incrementally
//! updated JSON report (see `tapflow-report`) that a live UI can tail.
//!
//! ## Key Features
//!
//! - **Two-level orchestration**: a run scheduler over flows (sequential,
//!   bounded-parallel, or a multi-device work queue) and a flow interpreter
//!   over steps
//! - **Compound steps**: `repeat`, `retry`, and `runFlow` recurse through
//!   nested step lists and aggregate results under the parent command
//! - **Embedded scripting**: `${...}` / `$NAME` interpolation, assertions,
//!   and `output`-record scripts evaluated by a sandboxed tree-walking
//!   interpreter
//! - **Cooperative cancellation**: a [`CancelToken`] observed at every step
//!   and compound iteration, never mid-driver-call
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use tapflow_engine::{run_flows, CancelToken, NoopDriver, RunnerConfig, YamlFlowParser};
//! use tapflow_types::{Flow, FlowConfig, Selector, Step, StepKind};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let flow = Flow {
//!     config: FlowConfig { name: Some("smoke".into()), ..Default::default() },
//!     steps: vec![Step::new(StepKind::TapOn { selector: Selector::text("Login") })],
//! };
//!
//! let report_dir = tempfile::tempdir()?;
//! let result = run_flows(
//!     vec![flow],
//!     Arc::new(NoopDriver::default()),
//!     Arc::new(YamlFlowParser),
//!     RunnerConfig::new(report_dir.path()),
//!     CancelToken::new(),
//! )
//! .await?;
//! assert_eq!(result.passed, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`script`**: variable table, expression evaluator, interpolation
//! - **`interpreter`**: per-flow step execution and compound handling
//! - **`scheduler`**: run-level orchestration over device workers
//! - **`driver`** / **`parser`**: the external boundaries the engine consumes

pub mod cancel;
pub mod condition;
pub mod config;
pub mod driver;
pub mod expand;
pub mod interpreter;
pub mod parser;
pub mod progress;
pub mod scheduler;
pub mod script;

pub use cancel::CancelToken;
pub use condition::evaluate_condition;
pub use config::{ArtifactPolicy, RunnerConfig, DEFAULT_REPEAT_CAP};
pub use driver::{AppState, Driver, NoopDriver, PlatformInfo};
pub use expand::{expand_selector, expand_step};
pub use interpreter::{FlowInterpreter, FlowResult, StepCounters};
pub use parser::{FlowParser, YamlFlowParser};
pub use progress::ProgressCallbacks;
pub use scheduler::{run_flows, run_flows_on_devices, DeviceWorker, RunResult};
pub use script::{SavedEnv, ScriptEngine, ScriptValue};
