//! Append-only log of moderator-confirmed test events for one user.

use serde::{Deserialize, Serialize};

use crate::types::TestEvent;

/// Outcome of a retraction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetractOutcome {
    Removed { event: TestEvent },
    NothingToRetract,
}

/// Ordered confirmations for one user, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestEventLog {
    events: Vec<TestEvent>,
}

impl TestEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TestEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append a confirmation numbered `len + 1`.
    pub fn append(&mut self, confirmer_id: &str, now_secs: u64) -> &TestEvent {
        self.events.push(TestEvent {
            sequence_number: self.events.len() as u64 + 1,
            recorded_at: now_secs,
            confirmer_id: confirmer_id.to_string(),
        });
        &self.events[self.events.len() - 1]
    }

    /// Remove the most recent event confirmed by `confirmer_id`.
    pub fn retract(&mut self, confirmer_id: &str) -> RetractOutcome {
        match self
            .events
            .iter()
            .rposition(|event| event.confirmer_id == confirmer_id)
        {
            Some(index) => RetractOutcome::Removed {
                event: self.events.remove(index),
            },
            None => RetractOutcome::NothingToRetract,
        }
    }

    /// Test count as recorded by the latest event's sequence number.
    pub fn count(&self) -> u64 {
        self.events.last().map_or(0, |event| event.sequence_number)
    }

    pub fn last_recorded_at(&self) -> Option<u64> {
        self.events.last().map(|event| event.recorded_at)
    }
}
