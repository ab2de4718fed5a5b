//! Test-Event Ledger service: one indented JSON document per confirmed user.
//! Every operation reads the document fresh and writes it back whole.

use hbmon_core::{RetractOutcome, TestEvent, TestEventLog, WorkerId};

use crate::error::{LoadWarning, StoreError};
use crate::layout::{Encoding, StoreLayout, list_documents, read_document, write_document};

pub struct TestEventLedger {
    layout: StoreLayout,
}

impl TestEventLedger {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    /// The user's log, or `None` when no document exists.
    pub fn log(&self, user_id: &WorkerId) -> Result<Option<TestEventLog>, StoreError> {
        read_document(&self.layout.testers_path(user_id))
    }

    /// Confirmed test count, or `None` when no document exists.
    pub fn count(&self, user_id: &WorkerId) -> Result<Option<u64>, StoreError> {
        Ok(self.log(user_id)?.map(|log| log.count()))
    }

    pub fn append(
        &self,
        user_id: &WorkerId,
        confirmer_id: &str,
        now_secs: u64,
    ) -> Result<TestEvent, StoreError> {
        let mut log = self.log(user_id)?.unwrap_or_default();
        let event = log.append(confirmer_id, now_secs).clone();
        self.persist(user_id, &log)?;
        tracing::debug!(user = %user_id, confirmer = confirmer_id, count = event.sequence_number, "test confirmed");
        Ok(event)
    }

    /// Remove the most recent event by `confirmer_id`. The document is only
    /// rewritten when something was removed.
    pub fn retract(&self, user_id: &WorkerId, confirmer_id: &str) -> Result<RetractOutcome, StoreError> {
        let Some(mut log) = self.log(user_id)? else {
            return Ok(RetractOutcome::NothingToRetract);
        };
        let outcome = log.retract(confirmer_id);
        if matches!(outcome, RetractOutcome::Removed { .. }) {
            self.persist(user_id, &log)?;
            tracing::debug!(user = %user_id, confirmer = confirmer_id, "test retracted");
        }
        Ok(outcome)
    }

    /// Every readable log, plus a warning per corrupt document.
    pub fn load_all(&self) -> Result<(Vec<(WorkerId, TestEventLog)>, Vec<LoadWarning>), StoreError> {
        let mut logs = Vec::new();
        let mut warnings = Vec::new();
        for (user_id, path) in list_documents(&self.layout.testers_dir())? {
            match read_document::<TestEventLog>(&path) {
                Ok(Some(log)) => logs.push((user_id, log)),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(path = %path.display(), "skipping test-event log: {error}");
                    warnings.push(LoadWarning { path, error });
                }
            }
        }
        Ok((logs, warnings))
    }

    fn persist(&self, user_id: &WorkerId, log: &TestEventLog) -> Result<(), StoreError> {
        write_document(&self.layout.testers_path(user_id), log, Encoding::Indented)
    }
}
