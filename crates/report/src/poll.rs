//! Polling consumer API.
//!
//! A consumer that tails the report (a live UI, a transcoder) tracks the
//! last observed global `updateSeq` and each flow's `updateSeq`. Every poll
//! that observes a newer index returns it together with the set of flow ids
//! whose per-flow sequence advanced (never fewer, possibly more), so the
//! consumer knows exactly which detail files to re-read.

use std::collections::HashMap;
use std::path::Path;

use crate::fs::read_json;
use crate::layout::ReportPaths;
use crate::model::{FlowDetail, RunIndex};
use crate::StoreError;

/// One observed index advance.
#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub index: RunIndex,
    /// Ids whose per-flow `updateSeq` advanced since the previous poll.
    pub changed_flows: Vec<String>,
}

/// Stateful poller over one report directory.
#[derive(Debug)]
pub struct ReportPoller {
    paths: ReportPaths,
    last_seq: Option<u64>,
    flow_seqs: HashMap<String, u64>,
}

impl ReportPoller {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            paths: ReportPaths::new(dir.as_ref()),
            last_seq: None,
            flow_seqs: HashMap::new(),
        }
    }

    /// Reads the index; returns `None` when nothing advanced since the last
    /// observed sequence.
    pub fn poll(&mut self) -> Result<Option<PollUpdate>, StoreError> {
        let index: RunIndex = read_json(&self.paths.index())?;
        if self.last_seq == Some(index.update_seq) {
            return Ok(None);
        }

        let mut changed_flows = Vec::new();
        for entry in &index.flows {
            let seen = self.flow_seqs.get(&entry.id).copied();
            if seen != Some(entry.update_seq) {
                changed_flows.push(entry.id.clone());
                self.flow_seqs.insert(entry.id.clone(), entry.update_seq);
            }
        }
        self.last_seq = Some(index.update_seq);

        Ok(Some(PollUpdate { index, changed_flows }))
    }

    /// Reads the detail file a flow entry points at.
    pub fn read_detail(&self, flow_id: &str) -> Result<FlowDetail, StoreError> {
        read_json(&self.paths.flow_detail(flow_id))
    }

    /// Forgets all observed sequences; the next poll reports everything.
    pub fn reset(&mut self) {
        self.last_seq = None;
        self.flow_seqs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_writer::{FlowEntryPatch, IndexWriter};
    use crate::skeleton::{build_skeleton, RunMetadata};
    use tapflow_types::{Flow, FlowConfig, Status};

    fn store_with_flows(count: usize) -> (tempfile::TempDir, ReportPaths, IndexWriter) {
        let flows: Vec<Flow> = (0..count)
            .map(|position| Flow {
                config: FlowConfig {
                    name: Some(format!("flow {position}")),
                    ..Default::default()
                },
                steps: Vec::new(),
            })
            .collect();
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportPaths::new(dir.path());
        let skeleton = build_skeleton(&flows, RunMetadata::default());
        skeleton.write(&paths).unwrap();
        let writer = IndexWriter::new(&paths, skeleton.index);
        (dir, paths, writer)
    }

    #[test]
    fn first_poll_reports_every_flow() {
        let (dir, _paths, _writer) = store_with_flows(2);
        let mut poller = ReportPoller::new(dir.path());

        let update = poller.poll().unwrap().expect("initial state is observable");
        assert_eq!(update.changed_flows, vec!["flow-000".to_string(), "flow-001".to_string()]);

        assert!(poller.poll().unwrap().is_none(), "no change, no update");
    }

    #[test]
    fn poll_reports_only_flows_whose_seq_advanced() {
        let (dir, _paths, writer) = store_with_flows(3);
        let mut poller = ReportPoller::new(dir.path());
        poller.poll().unwrap();

        writer
            .apply_terminal("flow-001", FlowEntryPatch::with_status(Status::Passed))
            .unwrap();

        let update = poller.poll().unwrap().expect("terminal update advanced the index");
        assert_eq!(update.changed_flows, vec!["flow-001".to_string()]);
        assert_eq!(update.index.flows[1].status, Status::Passed);
    }

    #[test]
    fn reset_forgets_observed_sequences() {
        let (dir, _paths, _writer) = store_with_flows(1);
        let mut poller = ReportPoller::new(dir.path());
        poller.poll().unwrap();
        assert!(poller.poll().unwrap().is_none());

        poller.reset();
        let update = poller.poll().unwrap().expect("reset replays current state");
        assert_eq!(update.changed_flows, vec!["flow-000".to_string()]);
    }
}
