//! Run scheduler: orchestrates many flows over one or many device workers.
//!
//! Three modes share one lifecycle (build the skeleton, write it, start the
//! index writer, run the mode, end) and differ only in how flow tasks are
//! gated:
//!
//! - **sequential** (`parallelism == 0`): flows run in input order;
//! - **bounded parallel** (`parallelism >= 1`): one task per flow behind a
//!   counted semaphore; `stop_on_fail` marks not-yet-started flows skipped
//!   after the first failure;
//! - **work queue** (multi-device): a bounded channel pre-loaded with one
//!   item per flow and closed; each worker owns its driver and drains the
//!   queue, one flow at a time.
//!
//! Flow execution itself is synchronous and runs under `spawn_blocking`; a
//! driver call is never interrupted by cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tapflow_report::skeleton::flow_id;
use tapflow_report::{build_skeleton, AppInfo, DeviceInfo, FlowDetail, FlowEntryPatch, FlowWriter, IndexWriter, ReportPaths, RunMetadata, RunnerInfo};
use tapflow_types::{Flow, Status};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::RunnerConfig;
use crate::driver::Driver;
use crate::interpreter::{FlowInterpreter, FlowResult};
use crate::parser::FlowParser;

/// Aggregate outcome of a run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: Status,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub flows: Vec<FlowResult>,
}

impl RunResult {
    fn new(flows: Vec<FlowResult>, duration_ms: u64, total: usize) -> Self {
        let passed = flows.iter().filter(|flow| flow.status == Status::Passed).count();
        let failed = flows.iter().filter(|flow| flow.status == Status::Failed).count();
        let skipped = flows.iter().filter(|flow| flow.status == Status::Skipped).count();
        let status = if failed > 0 { Status::Failed } else { Status::Passed };
        Self {
            status,
            total,
            passed,
            failed,
            skipped,
            duration_ms,
            flows,
        }
    }
}

/// One device worker for work-queue mode: a driver plus a cleanup closure
/// invoked exactly once when the worker exits, even on panic.
pub struct DeviceWorker {
    pub driver: Arc<dyn Driver>,
    pub cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceWorker {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver, cleanup: None }
    }

    pub fn with_cleanup(driver: Arc<dyn Driver>, cleanup: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            driver,
            cleanup: Some(cleanup),
        }
    }
}

struct CleanupGuard {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

struct WorkItem {
    position: usize,
    flow: Flow,
    detail: FlowDetail,
}

/// Runs `flows` against a single driver, sequentially or bounded-parallel
/// per `config.parallelism`.
///
/// A shared driver used with `parallelism >= 1` must be reentrant; that is
/// the caller's guarantee. Skeleton build or write failures are fatal and
/// produce no partial report.
pub async fn run_flows(
    flows: Vec<Flow>,
    driver: Arc<dyn Driver>,
    parser: Arc<dyn FlowParser>,
    config: RunnerConfig,
    cancel: CancelToken,
) -> Result<RunResult> {
    let paths = ReportPaths::new(&config.output_dir);
    let metadata = run_metadata(driver.as_ref(), &flows, &config);
    let skeleton = build_skeleton(&flows, metadata);
    skeleton.write(&paths).context("failed to write report skeleton")?;
    let index_writer = IndexWriter::new(&paths, skeleton.index);
    index_writer.start().context("failed to record run start")?;

    let total = flows.len();
    info!(total, parallelism = config.parallelism, "run started");
    let started = Instant::now();
    let results = if config.parallelism == 0 {
        run_sequential(flows, skeleton.details, &paths, &driver, &parser, &config, &index_writer, &cancel).await
    } else {
        run_bounded_parallel(flows, skeleton.details, &paths, &driver, &parser, &config, &index_writer, &cancel).await
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    index_writer.end().context("failed to record run end")?;
    let run_result = RunResult::new(results, duration_ms, total);
    info!(status = %run_result.status, passed = run_result.passed, failed = run_result.failed, skipped = run_result.skipped, "run finished");
    Ok(run_result)
}

#[allow(clippy::too_many_arguments)]
async fn run_sequential(
    flows: Vec<Flow>,
    details: Vec<FlowDetail>,
    paths: &ReportPaths,
    driver: &Arc<dyn Driver>,
    parser: &Arc<dyn FlowParser>,
    config: &RunnerConfig,
    index_writer: &IndexWriter,
    cancel: &CancelToken,
) -> Vec<FlowResult> {
    let total = flows.len();
    let mut results = Vec::with_capacity(total);
    for (position, (flow, detail)) in flows.into_iter().zip(details).enumerate() {
        if cancel.is_cancelled() {
            results.push(mark_flow_skipped(index_writer, &detail, flow.display_name(), "run cancelled"));
            continue;
        }
        let result = execute_flow_blocking(
            paths.clone(),
            detail,
            flow,
            Arc::clone(driver),
            Arc::clone(parser),
            config.clone(),
            index_writer.clone(),
            cancel.clone(),
            position,
            total,
        )
        .await;
        results.push(result);
    }
    results
}

#[allow(clippy::too_many_arguments)]
async fn run_bounded_parallel(
    flows: Vec<Flow>,
    details: Vec<FlowDetail>,
    paths: &ReportPaths,
    driver: &Arc<dyn Driver>,
    parser: &Arc<dyn FlowParser>,
    config: &RunnerConfig,
    index_writer: &IndexWriter,
    cancel: &CancelToken,
) -> Vec<FlowResult> {
    let total = flows.len();
    let semaphore = Arc::new(Semaphore::new(config.parallelism));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_on_fail = config.stop_on_fail;

    let mut handles = Vec::with_capacity(total);
    for (position, (flow, detail)) in flows.into_iter().zip(details).enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let stop_flag = Arc::clone(&stop_flag);
        let paths = paths.clone();
        let driver = Arc::clone(driver);
        let parser = Arc::clone(parser);
        let config = config.clone();
        let index_writer = index_writer.clone();
        let cancel = cancel.clone();
        let fallback = (detail.id.clone(), flow.display_name());

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            if cancel.is_cancelled() {
                return mark_flow_skipped(&index_writer, &detail, flow.display_name(), "run cancelled");
            }
            if stop_on_fail && stop_flag.load(Ordering::SeqCst) {
                return mark_flow_skipped(&index_writer, &detail, flow.display_name(), "run stopped");
            }
            let result = execute_flow_blocking(paths, detail, flow, driver, parser, config, index_writer, cancel, position, total).await;
            if stop_on_fail && result.status == Status::Failed {
                stop_flag.store(true, Ordering::SeqCst);
            }
            result
        });
        handles.push((fallback, handle));
    }

    let mut results = Vec::with_capacity(total);
    for ((fallback_id, fallback_name), handle) in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(join_error) => {
                warn!(flow_id = %fallback_id, error = %join_error, "flow task panicked");
                results.push(failed_placeholder(fallback_id, fallback_name));
            }
        }
    }
    results
}

/// Runs `flows` over a pool of device workers pulling from one work queue.
///
/// The queue is pre-loaded with one item per flow and closed before any
/// worker starts; workers pull until it drains, running one flow at a time
/// on their own driver. Wall-clock duration is measured from queue start to
/// worker join, not summed from per-flow durations.
pub async fn run_flows_on_devices(
    flows: Vec<Flow>,
    workers: Vec<DeviceWorker>,
    parser: Arc<dyn FlowParser>,
    config: RunnerConfig,
    cancel: CancelToken,
) -> Result<RunResult> {
    anyhow::ensure!(!workers.is_empty(), "at least one device worker is required");

    let paths = ReportPaths::new(&config.output_dir);
    let metadata = run_metadata(workers[0].driver.as_ref(), &flows, &config);
    let skeleton = build_skeleton(&flows, metadata);
    skeleton.write(&paths).context("failed to write report skeleton")?;
    let index_writer = IndexWriter::new(&paths, skeleton.index);
    index_writer.start().context("failed to record run start")?;

    let total = flows.len();
    info!(total, workers = workers.len(), "work-queue run started");
    let (sender, receiver) = tokio::sync::mpsc::channel::<WorkItem>(total.max(1));
    for (position, (flow, detail)) in flows.into_iter().zip(skeleton.details).enumerate() {
        sender
            .send(WorkItem { position, flow, detail })
            .await
            .expect("queue is sized for every flow");
    }
    drop(sender);
    let receiver = Arc::new(Mutex::new(receiver));
    let results: Arc<Mutex<Vec<Option<FlowResult>>>> = Arc::new(Mutex::new((0..total).map(|_| None).collect()));

    let started = Instant::now();
    let mut worker_handles = Vec::with_capacity(workers.len());
    for (worker_index, worker) in workers.into_iter().enumerate() {
        let receiver = Arc::clone(&receiver);
        let results = Arc::clone(&results);
        let parser = Arc::clone(&parser);
        let config = config.clone();
        let cancel = cancel.clone();
        let index_writer = index_writer.clone();
        let paths = paths.clone();

        worker_handles.push(tokio::task::spawn_blocking(move || {
            let _cleanup = CleanupGuard { cleanup: worker.cleanup };
            let driver = worker.driver;
            loop {
                let item = receiver.lock().expect("work queue lock poisoned").blocking_recv();
                let Some(WorkItem { position, flow, detail }) = item else {
                    break;
                };
                let result = if cancel.is_cancelled() {
                    mark_flow_skipped(&index_writer, &detail, flow.display_name(), "run cancelled")
                } else {
                    info!(worker = worker_index, flow_id = %detail.id, "worker picked up flow");
                    let writer = FlowWriter::new(&paths, detail, index_writer.clone());
                    FlowInterpreter::new(
                        cancel.clone(),
                        flow,
                        Arc::clone(&driver),
                        Arc::clone(&parser),
                        config.clone(),
                        writer,
                        position,
                        total,
                    )
                    .run()
                };
                results.lock().expect("results lock poisoned")[position] = Some(result);
            }
        }));
    }

    for handle in worker_handles {
        if let Err(join_error) = handle.await {
            warn!(error = %join_error, "device worker panicked");
        }
    }
    let duration_ms = started.elapsed().as_millis() as u64;

    index_writer.end().context("failed to record run end")?;
    let collected: Vec<FlowResult> = results
        .lock()
        .expect("results lock poisoned")
        .drain(..)
        .enumerate()
        .map(|(position, slot)| slot.unwrap_or_else(|| failed_placeholder(flow_id(position), format!("flow {position}"))))
        .collect();
    let run_result = RunResult::new(collected, duration_ms, total);
    info!(status = %run_result.status, duration_ms, "work-queue run finished");
    Ok(run_result)
}

#[allow(clippy::too_many_arguments)]
async fn execute_flow_blocking(
    paths: ReportPaths,
    detail: FlowDetail,
    flow: Flow,
    driver: Arc<dyn Driver>,
    parser: Arc<dyn FlowParser>,
    config: RunnerConfig,
    index_writer: IndexWriter,
    cancel: CancelToken,
    position: usize,
    total: usize,
) -> FlowResult {
    let fallback_id = detail.id.clone();
    let fallback_name = flow.display_name();
    let writer_handle = index_writer.clone();

    let task = tokio::task::spawn_blocking(move || {
        let writer = FlowWriter::new(&paths, detail, index_writer);
        FlowInterpreter::new(cancel, flow, driver, parser, config, writer, position, total).run()
    });

    match task.await {
        Ok(result) => result,
        Err(join_error) => {
            warn!(flow_id = %fallback_id, error = %join_error, "flow task panicked");
            let patch = FlowEntryPatch {
                status: Some(Status::Failed),
                error: Some("flow task panicked".to_string()),
                ..Default::default()
            };
            if let Err(store_error) = writer_handle.apply_terminal(&fallback_id, patch) {
                warn!(flow_id = %fallback_id, error = %store_error, "failed to record panicked flow");
            }
            failed_placeholder(fallback_id, fallback_name)
        }
    }
}

fn mark_flow_skipped(index_writer: &IndexWriter, detail: &FlowDetail, name: String, reason: &str) -> FlowResult {
    let patch = FlowEntryPatch {
        status: Some(Status::Skipped),
        error: Some(reason.to_string()),
        ..Default::default()
    };
    if let Err(store_error) = index_writer.apply_terminal(&detail.id, patch) {
        warn!(flow_id = %detail.id, error = %store_error, "failed to record skipped flow");
    }
    FlowResult {
        id: detail.id.clone(),
        name,
        status: Status::Skipped,
        duration_ms: 0,
        error: Some(reason.to_string()),
        steps_passed: 0,
        steps_failed: 0,
        steps_skipped: 0,
    }
}

fn failed_placeholder(id: String, name: String) -> FlowResult {
    FlowResult {
        id,
        name,
        status: Status::Failed,
        duration_ms: 0,
        error: Some("flow task panicked".to_string()),
        steps_passed: 0,
        steps_failed: 0,
        steps_skipped: 0,
    }
}

fn run_metadata(driver: &dyn Driver, flows: &[Flow], config: &RunnerConfig) -> RunMetadata {
    let info = driver.platform_info();
    let device = DeviceInfo {
        platform: Some(info.platform.as_str().to_string()),
        device_id: Some(info.device_id),
        name: None,
    };
    let app = flows
        .iter()
        .find_map(|flow| flow.config.app_id.clone())
        .map(|app_id| AppInfo { app_id: Some(app_id) });

    RunMetadata {
        device: Some(device),
        app,
        ci: config.ci.clone(),
        runner: RunnerInfo::default(),
    }
}
