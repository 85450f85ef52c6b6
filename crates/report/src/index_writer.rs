//! Serialised, debounced index persistence.
//!
//! All index mutations funnel through one [`IndexWriter`], which owns the
//! index behind a mutex and performs the atomic write inside the same
//! critical section that advances `updateSeq`, so the
//! `updateSeq`/`lastUpdated`/content tuple is consistent at publication.
//!
//! Progress-only updates are coalesced: the first one opens a 100 ms window
//! and later ones merge into a pending map keyed by flow id; a background
//! thread flushes the batch when the window closes. Terminal updates merge
//! the pending map and flush synchronously, which also cancels the window.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tapflow_types::Status;
use tracing::{debug, warn};

use crate::fs::write_json_atomic;
use crate::layout::ReportPaths;
use crate::model::{CommandSummary, FlowEntry, RunIndex, Summary};
use crate::StoreError;

/// Window during which progress-only updates coalesce.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Partial mutation of one flow entry. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct FlowEntryPatch {
    pub status: Option<Status>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub commands: Option<CommandSummary>,
    pub retry_attempts: Option<u32>,
    pub error: Option<String>,
}

impl FlowEntryPatch {
    pub fn with_status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Later updates win field-wise when both sides carry a value.
    fn merge(&mut self, newer: FlowEntryPatch) {
        if newer.status.is_some() {
            self.status = newer.status;
        }
        if newer.started_at.is_some() {
            self.started_at = newer.started_at;
        }
        if newer.finished_at.is_some() {
            self.finished_at = newer.finished_at;
        }
        if newer.duration_ms.is_some() {
            self.duration_ms = newer.duration_ms;
        }
        if newer.commands.is_some() {
            self.commands = newer.commands;
        }
        if newer.retry_attempts.is_some() {
            self.retry_attempts = newer.retry_attempts;
        }
        if newer.error.is_some() {
            self.error = newer.error;
        }
    }

    fn apply(self, entry: &mut FlowEntry) {
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(started_at) = self.started_at {
            entry.started_at = Some(started_at);
        }
        if let Some(finished_at) = self.finished_at {
            entry.finished_at = Some(finished_at);
        }
        if let Some(duration_ms) = self.duration_ms {
            entry.duration_ms = Some(duration_ms);
        }
        if let Some(commands) = self.commands {
            entry.commands = commands;
        }
        if let Some(retry_attempts) = self.retry_attempts {
            entry.retry_attempts = retry_attempts;
        }
        if let Some(error) = self.error {
            entry.error = Some(error);
        }
    }
}

struct WriterState {
    index: RunIndex,
    pending: IndexMap<String, FlowEntryPatch>,
    pending_since: Option<Instant>,
    shutdown: bool,
}

struct Shared {
    index_path: PathBuf,
    state: Mutex<WriterState>,
    wake: Condvar,
}

impl Shared {
    /// Applies pending patches, recomputes aggregates, advances sequence
    /// numbers, and writes the index, all under the state lock.
    fn persist_locked(&self, state: &mut WriterState) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut state.pending);
        state.pending_since = None;

        for (flow_id, patch) in pending {
            match state.index.entry_mut(&flow_id) {
                Some(entry) => {
                    patch.apply(entry);
                    entry.update_seq += 1;
                }
                None => warn!(flow_id = %flow_id, "dropping patch for unknown flow entry"),
            }
        }

        state.index.summary = Summary::aggregate(&state.index.flows);
        state.index.status = state.index.compute_status();
        state.index.update_seq += 1;
        state.index.last_updated = Utc::now();
        write_json_atomic(&self.index_path, &state.index)?;
        debug!(update_seq = state.index.update_seq, "index flushed");
        Ok(())
    }
}

struct WorkerHandle {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().expect("index writer lock poisoned");
            state.shutdown = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.lock().expect("index writer lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

/// Thread-safe handle over the run index.
///
/// Cheap to clone; the debounce thread stops and remaining updates flush
/// when the last handle is dropped.
#[derive(Clone)]
pub struct IndexWriter {
    shared: Arc<Shared>,
    _worker: Arc<WorkerHandle>,
}

impl IndexWriter {
    /// Wraps an index (normally the freshly-written skeleton) and starts the
    /// debounce thread.
    pub fn new(paths: &ReportPaths, index: RunIndex) -> Self {
        let shared = Arc::new(Shared {
            index_path: paths.index(),
            state: Mutex::new(WriterState {
                index,
                pending: IndexMap::new(),
                pending_since: None,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("tapflow-index-writer".to_string())
            .spawn(move || debounce_loop(worker_shared))
            .expect("failed to spawn index writer thread");

        Self {
            shared: Arc::clone(&shared),
            _worker: Arc::new(WorkerHandle {
                shared,
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Marks the run started and flushes synchronously.
    pub fn start(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.index.started_at = Some(Utc::now());
        self.shared.persist_locked(&mut state)
    }

    /// Queues a progress-only update for `flow_id`; the write happens when
    /// the debounce window closes.
    pub fn apply_progress(&self, flow_id: &str, patch: FlowEntryPatch) {
        let mut state = self.lock();
        if state.index.entry(flow_id).is_none() {
            warn!(flow_id = %flow_id, "progress update for unknown flow entry");
            return;
        }
        state.pending.entry(flow_id.to_string()).or_default().merge(patch);
        if state.pending_since.is_none() {
            state.pending_since = Some(Instant::now());
        }
        drop(state);
        self.shared.wake.notify_all();
    }

    /// Applies a terminal update for `flow_id` and flushes synchronously,
    /// folding in any pending progress updates.
    pub fn apply_terminal(&self, flow_id: &str, patch: FlowEntryPatch) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.index.entry(flow_id).is_none() {
            return Err(StoreError::UnknownFlow(flow_id.to_string()));
        }
        state.pending.entry(flow_id.to_string()).or_default().merge(patch);
        self.shared.persist_locked(&mut state)
    }

    /// Marks the run finished and flushes synchronously.
    pub fn end(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.index.finished_at = Some(Utc::now());
        self.shared.persist_locked(&mut state)
    }

    /// Flushes any pending updates now.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return Ok(());
        }
        self.shared.persist_locked(&mut state)
    }

    /// In-memory view of the index, including not-yet-flushed entry state.
    pub fn snapshot(&self) -> RunIndex {
        self.lock().index.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.shared.state.lock().expect("index writer lock poisoned")
    }
}

fn debounce_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock().expect("index writer lock poisoned");
    loop {
        if state.shutdown {
            if !state.pending.is_empty()
                && let Err(error) = shared.persist_locked(&mut state)
            {
                warn!(error = %error, "final index flush failed");
            }
            return;
        }

        match state.pending_since {
            None => {
                state = shared.wake.wait(state).expect("index writer lock poisoned");
            }
            Some(since) => {
                let elapsed = since.elapsed();
                if elapsed >= DEBOUNCE_WINDOW {
                    if let Err(error) = shared.persist_locked(&mut state) {
                        warn!(error = %error, "debounced index flush failed");
                    }
                } else {
                    let (guard, _) = shared
                        .wake
                        .wait_timeout(state, DEBOUNCE_WINDOW - elapsed)
                        .expect("index writer lock poisoned");
                    state = guard;
                }
            }
        }
    }
}
