//! # Tapflow Report Store
//!
//! Atomic, monotonically-versioned on-disk state for a test run: a single
//! index file (`report.json`) plus one detail file per flow, updated
//! incrementally while the run executes so a live UI can tail it.
//!
//! ## Layout
//!
//! ```text
//! <outputDir>/
//!   report.json            # RunIndex
//!   flows/
//!     flow-000.json        # FlowDetail
//!   assets/
//!     flow-000/
//!       cmd-000-before.png
//! ```
//!
//! ## Guarantees
//!
//! - Every file is written via temp-file + fsync + rename, so a concurrent
//!   reader always observes a complete prior or complete new version.
//! - `updateSeq` advances inside the same critical section as the write, on
//!   the index globally and on each touched flow entry.
//! - A detail file the index points to is visible on disk before the index
//!   write that references it.
//! - Progress-only index updates are coalesced by a 100 ms debounce window;
//!   terminal updates bypass the debounce and flush synchronously.

pub mod flow_writer;
pub mod fs;
pub mod index_writer;
pub mod layout;
pub mod model;
pub mod poll;
pub mod recovery;
pub mod skeleton;

use thiserror::Error;

pub use flow_writer::FlowWriter;
pub use index_writer::{FlowEntryPatch, IndexWriter};
pub use layout::ReportPaths;
pub use model::{
    AppInfo, CiInfo, CommandArtifacts, CommandParams, CommandRecord, CommandSummary, DeviceInfo, ErrorInfo, FlowArtifacts, FlowDetail,
    FlowEntry, RunIndex, RunnerInfo, Summary, VideoTimestamp, SCHEMA_VERSION,
};
pub use poll::{PollUpdate, ReportPoller};
pub use recovery::{recover, RecoveryReport};
pub use skeleton::{RunMetadata, Skeleton, build_skeleton};

/// Errors surfaced by report store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failure while reading or writing a report file.
    #[error("report I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The store was asked about a flow id the index does not contain.
    #[error("unknown flow id: {0}")]
    UnknownFlow(String),
    /// A command index outside the flow's command list.
    #[error("command index {1} out of range for {0}")]
    UnknownCommand(String, usize),
}
