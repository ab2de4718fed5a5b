//! On-disk layout and whole-document read/write helpers.
//!
//! ```text
//! <root>/userdata/<worker>.json          telemetry ledgers
//! <root>/testers/<user>.json             test-event logs
//! <root>/deleted_userdata/<worker>.json  retired ledgers
//! <root>/deleted_testers/<user>.json     retired test-event logs
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use hbmon_core::WorkerId;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

pub const TELEMETRY_DIR: &str = "userdata";
pub const TESTERS_DIR: &str = "testers";
pub const RETIRED_TELEMETRY_DIR: &str = "deleted_userdata";
pub const RETIRED_TESTERS_DIR: &str = "deleted_testers";

const EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.root.join(TELEMETRY_DIR)
    }

    pub fn testers_dir(&self) -> PathBuf {
        self.root.join(TESTERS_DIR)
    }

    pub fn retired_telemetry_dir(&self) -> PathBuf {
        self.root.join(RETIRED_TELEMETRY_DIR)
    }

    pub fn retired_testers_dir(&self) -> PathBuf {
        self.root.join(RETIRED_TESTERS_DIR)
    }

    pub fn telemetry_path(&self, worker_id: &WorkerId) -> PathBuf {
        document_path(&self.telemetry_dir(), worker_id)
    }

    pub fn testers_path(&self, user_id: &WorkerId) -> PathBuf {
        document_path(&self.testers_dir(), user_id)
    }

    /// Create all four store directories.
    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [
            self.telemetry_dir(),
            self.testers_dir(),
            self.retired_telemetry_dir(),
            self.retired_testers_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }
}

pub(crate) fn document_path(dir: &Path, id: &WorkerId) -> PathBuf {
    dir.join(format!("{id}.{EXTENSION}"))
}

/// JSON style of a persisted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Encoding {
    Compact,
    /// Four-space indentation.
    Indented,
}

/// Read and decode a document. A missing file is `Ok(None)`.
pub(crate) fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Overwrite a whole document: write a sibling temp file, then rename it
/// over the target so readers never observe a half-written document.
pub(crate) fn write_document<T: Serialize>(
    path: &Path,
    value: &T,
    encoding: Encoding,
) -> Result<(), StoreError> {
    let bytes = match encoding {
        Encoding::Compact => serde_json::to_vec(value)?,
        Encoding::Indented => {
            let mut buf = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            value.serialize(&mut ser)?;
            buf
        }
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, &bytes).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// `(id, path)` of every `*.json` document in `dir`, sorted by id.
/// A missing directory lists as empty.
pub(crate) fn list_documents(dir: &Path) -> Result<Vec<(WorkerId, PathBuf)>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut documents = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            && !stem.starts_with('.')
        {
            documents.push((WorkerId::new(stem), path));
        }
    }
    documents.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_layout() {
        let layout = StoreLayout::new("/data");
        assert_eq!(
            layout.telemetry_path(&WorkerId::new("12-1")),
            PathBuf::from("/data/userdata/12-1.json")
        );
        assert_eq!(
            layout.testers_path(&WorkerId::new("12")),
            PathBuf::from("/data/testers/12.json")
        );
        assert_eq!(
            layout.retired_testers_dir(),
            PathBuf::from("/data/deleted_testers")
        );
    }

    #[test]
    fn missing_document_reads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let value: Option<Vec<u64>> =
            read_document(&dir.path().join("absent.json")).expect("read");
        assert!(value.is_none());
    }

    #[test]
    fn write_then_read_and_indentation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("doc.json");
        write_document(&path, &vec![vec![1, 2]], Encoding::Indented).expect("write");
        let text = fs::read_to_string(&path).expect("read text");
        assert!(text.contains("\n        1,"));
        let back: Option<Vec<Vec<u64>>> = read_document(&path).expect("read");
        assert_eq!(back, Some(vec![vec![1, 2]]));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2").expect("write");
        let err = read_document::<Vec<u64>>(&path).expect_err("corrupt");
        assert!(err.is_corrupt());
    }

    #[test]
    fn listing_skips_foreign_and_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["2.json", "1.json", "notes.txt", ".3.json.tmp", ".4.json"] {
            fs::write(dir.path().join(name), "[]").expect("write");
        }
        let ids: Vec<String> = list_documents(dir.path())
            .expect("list")
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(list_documents(&dir.path().join("missing")).expect("list").is_empty());
    }
}
