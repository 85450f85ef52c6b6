//! Optional progress callbacks streamed from the flow interpreter.
//!
//! All callbacks receive concrete strings, ints, and bools so consumers need
//! no engine types to render live progress.

use std::fmt;

type FlowStartFn = dyn Fn(&str, usize, usize) + Send + Sync;
type StepCompleteFn = dyn Fn(usize, &str, bool, u64, Option<&str>) + Send + Sync;
type NestedFlowStartFn = dyn Fn(usize, &str) + Send + Sync;
type NestedStepFn = dyn Fn(usize, &str, bool, u64, Option<&str>) + Send + Sync;
type FlowEndFn = dyn Fn(&str, bool, u64) + Send + Sync;

/// Callback bundle; every slot is optional.
#[derive(Default)]
pub struct ProgressCallbacks {
    /// `(flow_name, position, total)`
    pub on_flow_start: Option<Box<FlowStartFn>>,
    /// `(step_index, description, passed, duration_ms, error)`
    pub on_step_complete: Option<Box<StepCompleteFn>>,
    /// `(depth, description)`
    pub on_nested_flow_start: Option<Box<NestedFlowStartFn>>,
    /// `(depth, description, passed, duration_ms, error)`
    pub on_nested_step: Option<Box<NestedStepFn>>,
    /// `(flow_name, passed, duration_ms)`
    pub on_flow_end: Option<Box<FlowEndFn>>,
}

impl ProgressCallbacks {
    pub(crate) fn emit_flow_start(&self, flow_name: &str, position: usize, total: usize) {
        if let Some(callback) = &self.on_flow_start {
            callback(flow_name, position, total);
        }
    }

    pub(crate) fn emit_step_complete(&self, index: usize, description: &str, passed: bool, duration_ms: u64, error: Option<&str>) {
        if let Some(callback) = &self.on_step_complete {
            callback(index, description, passed, duration_ms, error);
        }
    }

    pub(crate) fn emit_nested_flow_start(&self, depth: usize, description: &str) {
        if let Some(callback) = &self.on_nested_flow_start {
            callback(depth, description);
        }
    }

    pub(crate) fn emit_nested_step(&self, depth: usize, description: &str, passed: bool, duration_ms: u64, error: Option<&str>) {
        if let Some(callback) = &self.on_nested_step {
            callback(depth, description, passed, duration_ms, error);
        }
    }

    pub(crate) fn emit_flow_end(&self, flow_name: &str, passed: bool, duration_ms: u64) {
        if let Some(callback) = &self.on_flow_end {
            callback(flow_name, passed, duration_ms);
        }
    }
}

impl fmt::Debug for ProgressCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallbacks")
            .field("on_flow_start", &self.on_flow_start.is_some())
            .field("on_step_complete", &self.on_step_complete.is_some())
            .field("on_nested_flow_start", &self.on_nested_flow_start.is_some())
            .field("on_nested_step", &self.on_nested_step.is_some())
            .field("on_flow_end", &self.on_flow_end.is_some())
            .finish()
    }
}
