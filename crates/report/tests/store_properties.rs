//! Cross-cutting report store properties: skeleton round-trips, sequence
//! monotonicity, summary consistency, and recovery after a simulated crash.

use tapflow_report::fs::read_json;
use tapflow_report::{
    build_skeleton, recover, CommandArtifacts, FlowEntryPatch, FlowWriter, IndexWriter, ReportPaths, ReportPoller, RunIndex, RunMetadata,
    Summary,
};
use tapflow_types::{Flow, FlowConfig, Selector, Status, Step, StepKind};

fn flow(name: &str, steps: usize) -> Flow {
    Flow {
        config: FlowConfig {
            name: Some(name.to_string()),
            ..Default::default()
        },
        steps: (0..steps)
            .map(|index| {
                Step::new(StepKind::TapOn {
                    selector: Selector::text(format!("button {index}")),
                })
            })
            .collect(),
    }
}

#[test]
fn skeleton_round_trips_all_pending() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ReportPaths::new(dir.path());
    let skeleton = build_skeleton(&[flow("a", 2), flow("b", 3)], RunMetadata::default());
    skeleton.write(&paths).unwrap();

    let index: RunIndex = read_json(&paths.index()).unwrap();
    assert_eq!(index.summary.total, 2);
    assert!(index.flows.iter().all(|entry| entry.status == Status::Pending));
    for entry in &index.flows {
        let detail: tapflow_report::FlowDetail = read_json(&dir.path().join(&entry.data_file)).unwrap();
        assert!(detail.commands.iter().all(|command| command.status == Status::Pending));
    }
}

#[test]
fn summary_matches_entry_statuses_after_every_persisted_write() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ReportPaths::new(dir.path());
    let skeleton = build_skeleton(&[flow("a", 1), flow("b", 1), flow("c", 1)], RunMetadata::default());
    skeleton.write(&paths).unwrap();
    let writer = IndexWriter::new(&paths, skeleton.index);
    writer.start().unwrap();

    let statuses = [Status::Passed, Status::Failed, Status::Skipped];
    for (position, status) in statuses.iter().enumerate() {
        writer
            .apply_terminal(&format!("flow-{position:03}"), FlowEntryPatch::with_status(*status))
            .unwrap();

        let index: RunIndex = read_json(&paths.index()).unwrap();
        let expected = Summary::aggregate(&index.flows);
        assert_eq!(index.summary, expected);
        assert_eq!(index.summary.total, 3);
    }

    let index: RunIndex = read_json(&paths.index()).unwrap();
    assert_eq!(index.status, Status::Failed);
}

#[test]
fn detail_exists_before_index_references_it() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ReportPaths::new(dir.path());
    let skeleton = build_skeleton(&[flow("a", 1)], RunMetadata::default());
    skeleton.write(&paths).unwrap();

    let index: RunIndex = read_json(&paths.index()).unwrap();
    for entry in &index.flows {
        assert!(dir.path().join(&entry.data_file).exists(), "dangling data file {}", entry.data_file);
    }
}

#[test]
fn poller_sees_full_run_through_writer_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ReportPaths::new(dir.path());
    let skeleton = build_skeleton(&[flow("a", 2)], RunMetadata::default());
    skeleton.write(&paths).unwrap();
    let index_writer = IndexWriter::new(&paths, skeleton.index.clone());
    index_writer.start().unwrap();

    let mut poller = ReportPoller::new(dir.path());
    let initial = poller.poll().unwrap().unwrap();
    assert_eq!(initial.changed_flows, vec!["flow-000".to_string()]);

    let mut flow_writer = FlowWriter::new(&paths, skeleton.details.into_iter().next().unwrap(), index_writer.clone());
    flow_writer.start().unwrap();
    for command in 0..2 {
        flow_writer.command_start(command).unwrap();
        flow_writer
            .command_end(command, Status::Passed, None, None, CommandArtifacts::default())
            .unwrap();
    }
    flow_writer.end(Status::Passed, None).unwrap();
    index_writer.end().unwrap();

    let update = poller.poll().unwrap().expect("terminal flush is observable");
    assert_eq!(update.changed_flows, vec!["flow-000".to_string()]);
    assert_eq!(update.index.status, Status::Passed);

    let detail = poller.read_detail("flow-000").unwrap();
    assert!(detail.commands.iter().all(|command| command.status == Status::Passed));
    assert!(detail.duration_ms.is_some());
}

#[test]
fn recovery_after_simulated_crash_promotes_finished_work() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ReportPaths::new(dir.path());
    let skeleton = build_skeleton(&[flow("a", 1)], RunMetadata::default());
    skeleton.write(&paths).unwrap();
    let index_writer = IndexWriter::new(&paths, skeleton.index.clone());
    index_writer.start().unwrap();

    // The flow finished its commands but the process died before `end`.
    let mut flow_writer = FlowWriter::new(&paths, skeleton.details.into_iter().next().unwrap(), index_writer.clone());
    flow_writer.start().unwrap();
    flow_writer.command_start(0).unwrap();
    flow_writer
        .command_end(0, Status::Passed, None, None, CommandArtifacts::default())
        .unwrap();
    index_writer.flush().unwrap();
    let before: RunIndex = read_json(&paths.index()).unwrap();
    assert_eq!(before.flows[0].status, Status::Running);
    drop(flow_writer);
    drop(index_writer);

    let report = recover(dir.path()).unwrap();
    assert_eq!(report.repaired_flows, vec!["flow-000".to_string()]);

    let index: RunIndex = read_json(&paths.index()).unwrap();
    assert_eq!(index.flows[0].status, Status::Passed);
    assert_eq!(index.summary.passed, 1);
    assert_eq!(index.status, Status::Passed);
    assert!(index.update_seq > before.update_seq);
}
