use chrono::{DateTime, Utc};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

// ─── Worker Identity ──────────────────────────────────────────────

/// Opaque worker identifier, normally numeric.
///
/// A `-<n>` suffix marks an alternate instance of the same logical worker
/// (`"123-1"` is an alternate of `"123"`). Alternates keep their own ledger
/// but are display-grouped with the base id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Normalize free-form user input (`"<@123-1>"`, `" 123 "`) by keeping
    /// only digits and hyphens. Returns `None` when nothing is left.
    pub fn normalize(input: &str) -> Option<Self> {
        let kept: String = input
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '-')
            .collect();
        let kept = kept.trim_matches('-');
        if kept.is_empty() || !kept.chars().any(|c| c.is_ascii_digit()) {
            None
        } else {
            Some(Self(kept.to_string()))
        }
    }

    /// Like [`WorkerId::normalize`] but keeps digits only, collapsing any
    /// alternate suffix into the number. Used by retirement.
    pub fn normalize_digits(input: &str) -> Option<Self> {
        let kept: String = input.chars().filter(char::is_ascii_digit).collect();
        if kept.is_empty() { None } else { Some(Self(kept)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base id without any alternate suffix.
    pub fn base(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    pub fn is_alternate(&self) -> bool {
        self.0.contains('-')
    }

    /// True for the base id itself and for every `<base>-<n>` alternate.
    pub fn belongs_to(&self, base: &str) -> bool {
        self.0 == base
            || self
                .0
                .strip_prefix(base)
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ─── Heartbeat Report ─────────────────────────────────────────────

/// One attributed heartbeat, as extracted by the telemetry parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub worker_id: WorkerId,
    pub received_at: DateTime<Utc>,
    pub running_instance_count: u32,
    pub secondary_instance_count: u32,
    /// Position-significant numeric payload, commonly `[elapsed, acquired]`.
    pub counters: Vec<u64>,
}

impl HeartbeatReport {
    /// Acquired units per hour, derived from the per-minute counters.
    /// Zero when fewer than two counters are present or elapsed is zero.
    pub fn rate(&self) -> f64 {
        derived_rate(&self.counters)
    }

    pub fn elapsed(&self) -> u64 {
        self.counters.first().copied().unwrap_or(0)
    }

    pub fn total_instances(&self) -> u32 {
        self.running_instance_count
            .saturating_add(self.secondary_instance_count)
    }
}

pub(crate) fn derived_rate(counters: &[u64]) -> f64 {
    match counters {
        [elapsed, acquired, ..] if *elapsed != 0 => *acquired as f64 / *elapsed as f64 * 60.0,
        _ => 0.0,
    }
}

// ─── Ledger Row ───────────────────────────────────────────────────

/// Errors decoding a persisted ledger row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowDecodeError {
    #[error("ledger row has {len} values, expected at least 3")]
    TooShort { len: usize },

    #[error("ledger row value {value} at position {index} is not a valid integer")]
    InvalidValue { index: usize, value: f64 },
}

/// One ledger entry per received heartbeat.
///
/// Persisted as a flat JSON array: the reported counters in order, followed
/// by `session_elapsed`, `session_acquired` and `recorded_at` (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<f64>")]
pub struct LedgerRow {
    pub counters: Vec<u64>,
    /// Cumulative elapsed units carried across sessions.
    pub session_elapsed: i64,
    /// Cumulative acquired units carried across sessions.
    pub session_acquired: i64,
    pub recorded_at: u64,
}

impl LedgerRow {
    /// Elapsed units in the current session (counter column 0).
    pub fn elapsed(&self) -> u64 {
        self.counters.first().copied().unwrap_or(0)
    }

    /// Acquired units in the current session (counter column 1).
    pub fn acquired(&self) -> u64 {
        self.counters.get(1).copied().unwrap_or(0)
    }

    /// An all-zero report marks a session boundary.
    pub fn is_reset(&self) -> bool {
        self.counters.iter().all(|c| *c == 0)
    }

    /// `(elapsed, acquired)` point used by the segment extractor.
    pub fn point(&self) -> (u64, u64) {
        (self.elapsed(), self.acquired())
    }
}

impl Serialize for LedgerRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.counters.len() + 3))?;
        for counter in &self.counters {
            seq.serialize_element(counter)?;
        }
        seq.serialize_element(&self.session_elapsed)?;
        seq.serialize_element(&self.session_acquired)?;
        seq.serialize_element(&self.recorded_at)?;
        seq.end()
    }
}

impl TryFrom<Vec<f64>> for LedgerRow {
    type Error = RowDecodeError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        let len = values.len();
        if len < 3 {
            return Err(RowDecodeError::TooShort { len });
        }

        let check = |index: usize, allow_negative: bool| -> Result<f64, RowDecodeError> {
            let value = values[index];
            if !value.is_finite() || value.fract() != 0.0 || (!allow_negative && value < 0.0) {
                return Err(RowDecodeError::InvalidValue { index, value });
            }
            Ok(value)
        };

        let mut counters = Vec::with_capacity(len - 3);
        for index in 0..len - 3 {
            counters.push(check(index, false)? as u64);
        }

        Ok(Self {
            counters,
            session_elapsed: check(len - 3, true)? as i64,
            session_acquired: check(len - 2, true)? as i64,
            recorded_at: check(len - 1, false)? as u64,
        })
    }
}

// ─── Test Events ──────────────────────────────────────────────────

/// A moderator-confirmed test for one user.
///
/// Persisted as `[sequence_number, recorded_at, "confirmer_id"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u64, String)", into = "(u64, u64, String)")]
pub struct TestEvent {
    /// 1-based position at the time of confirmation.
    pub sequence_number: u64,
    pub recorded_at: u64,
    pub confirmer_id: String,
}

impl From<(u64, u64, String)> for TestEvent {
    fn from((sequence_number, recorded_at, confirmer_id): (u64, u64, String)) -> Self {
        Self {
            sequence_number,
            recorded_at,
            confirmer_id,
        }
    }
}

impl From<TestEvent> for (u64, u64, String) {
    fn from(event: TestEvent) -> Self {
        (event.sequence_number, event.recorded_at, event.confirmer_id)
    }
}
