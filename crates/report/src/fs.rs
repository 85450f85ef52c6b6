//! Atomic file helpers.
//!
//! Every JSON file in the report directory is replaced wholesale via the
//! temp-file + fsync + rename pattern on the same filesystem, so readers that
//! open a file always see a complete prior or complete new version.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::StoreError;

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Atomically replaces `path` with `bytes`.
///
/// The temp file lives next to the destination so the final rename never
/// crosses a filesystem boundary.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_name = format!(
        "{}.tmp",
        path.file_name().and_then(|name| name.to_str()).unwrap_or("report.json")
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Whole-file JSON read.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Converts a relative path to its forward-slash string form for report JSON.
pub fn to_forward_slashes(path: &Path) -> String {
    let display = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        display.into_owned()
    } else {
        display.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");

        write_json_atomic(&path, &Sample { value: 7 }).unwrap();
        let loaded: Sample = read_json(&path).unwrap();
        assert_eq!(loaded, Sample { value: 7 });
    }

    #[test]
    fn rewrite_replaces_previous_content_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        write_json_atomic(&path, &Sample { value: 1 }).unwrap();
        write_json_atomic(&path, &Sample { value: 2 }).unwrap();

        let loaded: Sample = read_json(&path).unwrap();
        assert_eq!(loaded.value, 2);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn forward_slash_form_is_stable_for_relative_paths() {
        let path = Path::new("assets").join("flow-000").join("cmd-000-before.png");
        assert_eq!(to_forward_slashes(&path), "assets/flow-000/cmd-000-before.png");
    }
}
