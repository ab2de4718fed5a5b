//! Retirement: move a worker's telemetry and test-event documents into the
//! archive stores, replacing any archived copies.
//!
//! The two moves are independent renames. If the second fails after the
//! first succeeded, the worker is left with archived telemetry and live
//! test events; the per-document outcome says so.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use hbmon_core::WorkerId;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::layout::{StoreLayout, document_path};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MoveOutcome {
    Moved,
    /// Nothing to move: the live store had no document.
    Missing,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireReport {
    pub worker_id: WorkerId,
    pub telemetry: MoveOutcome,
    pub test_events: MoveOutcome,
}

impl RetireReport {
    pub fn render(&self) -> String {
        let id = &self.worker_id;
        let telemetry = match &self.telemetry {
            MoveOutcome::Moved => {
                format!("User data for <@{id}> has been retired and moved to the deleted_userdata folder.")
            }
            MoveOutcome::Missing => {
                format!("No data found for User ID: {id} in the userdata folder.")
            }
            MoveOutcome::Failed { error } => {
                format!("An error occurred while moving the userdata file: {error}")
            }
        };
        let testers = match &self.test_events {
            MoveOutcome::Moved => {
                format!("Tester data for <@{id}> has been retired and moved to the deleted_testers folder.")
            }
            MoveOutcome::Missing => {
                format!("No tester data found for User ID: {id} in the testers folder.")
            }
            MoveOutcome::Failed { error } => {
                format!("An error occurred while moving the testers file: {error}")
            }
        };
        format!("{telemetry}\n{testers}")
    }
}

/// Move both of `worker_id`'s documents to the archive stores.
pub fn retire(layout: &StoreLayout, worker_id: &WorkerId) -> RetireReport {
    let telemetry = archive(
        &layout.telemetry_path(worker_id),
        &document_path(&layout.retired_telemetry_dir(), worker_id),
    );
    let test_events = archive(
        &layout.testers_path(worker_id),
        &document_path(&layout.retired_testers_dir(), worker_id),
    );
    tracing::info!(worker = %worker_id, ?telemetry, ?test_events, "worker retired");
    RetireReport {
        worker_id: worker_id.clone(),
        telemetry,
        test_events,
    }
}

fn archive(from: &Path, to: &Path) -> MoveOutcome {
    match move_replacing(from, to) {
        Ok(true) => MoveOutcome::Moved,
        Ok(false) => MoveOutcome::Missing,
        Err(e) => MoveOutcome::Failed {
            error: e.to_string(),
        },
    }
}

/// Returns `Ok(false)` when `from` does not exist.
fn move_replacing(from: &Path, to: &Path) -> Result<bool, StoreError> {
    if !from.exists() {
        return Ok(false);
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    match fs::remove_file(to) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(to, e)),
    }
    fs::rename(from, to).map_err(|e| StoreError::io(from, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(dir.path());
        layout.ensure_dirs().expect("dirs");
        (dir, layout)
    }

    #[test]
    fn moves_both_documents_and_overwrites_archive() {
        let (_dir, layout) = layout();
        let id = WorkerId::new("42");
        fs::write(layout.telemetry_path(&id), "[[1,2,0,0,3]]").expect("seed");
        fs::write(layout.testers_path(&id), "[]").expect("seed");
        let archived = document_path(&layout.retired_telemetry_dir(), &id);
        fs::write(&archived, "old").expect("seed");

        let report = retire(&layout, &id);
        assert_eq!(report.telemetry, MoveOutcome::Moved);
        assert_eq!(report.test_events, MoveOutcome::Moved);
        assert!(!layout.telemetry_path(&id).exists());
        assert_eq!(fs::read_to_string(&archived).expect("archived"), "[[1,2,0,0,3]]");
        assert!(document_path(&layout.retired_testers_dir(), &id).exists());
    }

    #[test]
    fn missing_documents_are_reported() {
        let (_dir, layout) = layout();
        let id = WorkerId::new("42");
        fs::write(layout.telemetry_path(&id), "[]").expect("seed");

        let report = retire(&layout, &id);
        assert_eq!(report.telemetry, MoveOutcome::Moved);
        assert_eq!(report.test_events, MoveOutcome::Missing);
        assert!(report.render().contains("No tester data found for User ID: 42"));
    }
}
