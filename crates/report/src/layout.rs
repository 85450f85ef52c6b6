//! Report directory layout.

use std::path::{Path, PathBuf};

/// Resolves every file and directory inside one report directory.
///
/// Relative forms (`*_rel`) are the forward-slash strings recorded inside
/// report JSON; absolute forms are for actual I/O.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    root: PathBuf,
}

impl ReportPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn flows_dir(&self) -> PathBuf {
        self.root.join("flows")
    }

    pub fn flow_detail(&self, flow_id: &str) -> PathBuf {
        self.flows_dir().join(format!("{flow_id}.json"))
    }

    pub fn flow_detail_rel(flow_id: &str) -> String {
        format!("flows/{flow_id}.json")
    }

    pub fn assets_dir(&self, flow_id: &str) -> PathBuf {
        self.root.join("assets").join(flow_id)
    }

    pub fn assets_dir_rel(flow_id: &str) -> String {
        format!("assets/{flow_id}")
    }

    /// Absolute path of an asset file inside a flow's assets directory.
    pub fn asset(&self, flow_id: &str, file_name: &str) -> PathBuf {
        self.assets_dir(flow_id).join(file_name)
    }

    /// Relative forward-slash path of the same asset, as stored in JSON.
    pub fn asset_rel(flow_id: &str, file_name: &str) -> String {
        format!("assets/{flow_id}/{file_name}")
    }
}
