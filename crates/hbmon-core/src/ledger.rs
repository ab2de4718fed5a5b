//! Per-worker append-only ledger of cumulative counters.
//!
//! Raw heartbeat counters are session-relative and fall back to zero when a
//! worker restarts. Each row therefore also carries lifetime figures
//! (`session_elapsed`, `session_acquired`) built by telescoping the deltas
//! between consecutive reports.
//!
//! Pure bookkeeping only. Persistence lives in `hbmon-store`.

use serde::{Deserialize, Serialize};

use crate::types::LedgerRow;

/// `(elapsed, acquired)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Figures<T> {
    pub elapsed: T,
    pub acquired: T,
}

/// Ordered rows for one worker, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerLedger {
    rows: Vec<LedgerRow>,
}

impl WorkerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<LedgerRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&LedgerRow> {
        self.rows.last()
    }

    /// Drop rows past `len`. Used to undo an append whose write failed.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }

    /// Append a row for a freshly reported counter set and return it.
    ///
    /// - First row: lifetime figures start at zero.
    /// - Non-zero report: lifetime grows by the delta against the previous
    ///   row's raw counters.
    /// - All-zero report: lifetime carries forward the last non-zero value
    ///   found anywhere earlier, per column, falling back to the previous
    ///   row's raw counters when the column never held a non-zero value.
    ///
    /// The carry-forward rule is empirical and has not been validated for
    /// back-to-back resets; keep it as is until real multi-gap data says
    /// otherwise.
    pub fn record(&mut self, counters: Vec<u64>, now_secs: u64) -> &LedgerRow {
        let row = match self.rows.last() {
            None => LedgerRow {
                counters,
                session_elapsed: 0,
                session_acquired: 0,
                recorded_at: now_secs,
            },
            Some(previous) => {
                let is_reset = counters.iter().all(|c| *c == 0);
                let (session_elapsed, session_acquired) = if is_reset {
                    let carried = self.last_nonzero_lifetime();
                    (
                        carried.elapsed.unwrap_or(saturating_i64(previous.elapsed())),
                        carried.acquired.unwrap_or(saturating_i64(previous.acquired())),
                    )
                } else {
                    let elapsed = counters.first().copied().unwrap_or(0);
                    let acquired = counters.get(1).copied().unwrap_or(0);
                    (
                        delta(elapsed, previous.elapsed()).saturating_add(previous.session_elapsed),
                        delta(acquired, previous.acquired())
                            .saturating_add(previous.session_acquired),
                    )
                };
                LedgerRow {
                    counters,
                    session_elapsed,
                    session_acquired,
                    recorded_at: now_secs,
                }
            }
        };

        self.rows.push(row);
        &self.rows[self.rows.len() - 1]
    }

    /// Current session figures from the latest row.
    pub fn current(&self) -> Option<Figures<u64>> {
        self.latest().map(|row| Figures {
            elapsed: row.elapsed(),
            acquired: row.acquired(),
        })
    }

    /// Lifetime figures from the latest row.
    pub fn lifetime(&self) -> Option<Figures<i64>> {
        self.latest().map(|row| Figures {
            elapsed: row.session_elapsed,
            acquired: row.session_acquired,
        })
    }

    /// Personal-best single session, per column.
    pub fn record_session(&self) -> Option<Figures<u64>> {
        Some(Figures {
            elapsed: self.max_session_elapsed()?,
            acquired: self.max_session_acquired()?,
        })
    }

    pub fn max_session_elapsed(&self) -> Option<u64> {
        self.rows.iter().map(LedgerRow::elapsed).max()
    }

    pub fn max_session_acquired(&self) -> Option<u64> {
        self.rows.iter().map(LedgerRow::acquired).max()
    }

    /// Rows recorded at or after `since_secs`.
    pub fn rows_since(&self, since_secs: u64) -> impl Iterator<Item = &LedgerRow> {
        self.rows.iter().filter(move |row| row.recorded_at >= since_secs)
    }

    fn last_nonzero_lifetime(&self) -> Figures<Option<i64>> {
        Figures {
            elapsed: self
                .rows
                .iter()
                .rev()
                .map(|row| row.session_elapsed)
                .find(|v| *v != 0),
            acquired: self
                .rows
                .iter()
                .rev()
                .map(|row| row.session_acquired)
                .find(|v| *v != 0),
        }
    }
}

fn delta(current: u64, previous: u64) -> i64 {
    (current as i128 - previous as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
