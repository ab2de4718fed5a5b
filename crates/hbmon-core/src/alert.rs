//! Per-worker alerting with a cooldown window.
//!
//! A heartbeat that falls below a configured floor makes the worker
//! alert-eligible; the gate then emits at most one alert per worker per
//! cooldown window. Cooldown timestamps are in-memory only and are lost on
//! restart.
//!
//! Pure, testable state machine with no IO or async dependencies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{HeartbeatReport, WorkerId};

// ─── Alert Policy ────────────────────────────────────────────────

/// Thresholds governing alert eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Minimum gap between two alerts for the same worker (seconds).
    pub cooldown_secs: u64,
    /// The rate check only applies once the session has run this long.
    pub min_elapsed_for_rate: u64,
    /// Per-hour rate below which a worker is alerted.
    pub rate_floor: f64,
    /// Running-instance count below which a worker is alerted. `None` disables.
    pub instance_floor: Option<u32>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 2 * 60 * 60,
            min_elapsed_for_rate: 40,
            rate_floor: 100.0,
            instance_floor: None,
        }
    }
}

// ─── Alert ───────────────────────────────────────────────────────

/// Why a worker was alerted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    LowRate { rate: f64, floor: f64 },
    LowInstances { running: u32, floor: u32 },
}

/// One emitted alert, addressed at a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub worker_id: WorkerId,
    pub kind: AlertKind,
    /// Emission time (unix seconds).
    pub emitted_at: u64,
}

impl Alert {
    /// Short text addressed at the worker's base id.
    pub fn message(&self) -> String {
        let mention = format!("<@{}>", self.worker_id.base());
        match &self.kind {
            AlertKind::LowRate { rate, floor } => {
                let whose = if self.worker_id.is_alternate() {
                    " alt's"
                } else {
                    ""
                };
                format!(
                    "{mention} Alert: Your{whose} packs per hour is {} (Less than {}). \
                     Please check your setup.",
                    rate.round(),
                    floor.round()
                )
            }
            AlertKind::LowInstances { running, floor } => {
                let whose = if self.worker_id.is_alternate() {
                    " (alt)"
                } else {
                    ""
                };
                format!(
                    "{mention} Alert: You{whose} have {running} instance(s) running \
                     (Less than {floor}). Please check your setup."
                )
            }
        }
    }
}

// ─── Alert Gate ──────────────────────────────────────────────────

/// Decides alert eligibility and enforces the per-worker cooldown.
#[derive(Debug, Clone)]
pub struct AlertGate {
    policy: AlertPolicy,
    last_emitted: HashMap<WorkerId, u64>,
}

impl AlertGate {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            last_emitted: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Floor check only, ignoring the cooldown.
    pub fn evaluate(&self, report: &HeartbeatReport) -> Option<AlertKind> {
        let rate = report.rate();
        if report.elapsed() >= self.policy.min_elapsed_for_rate && rate < self.policy.rate_floor {
            return Some(AlertKind::LowRate {
                rate,
                floor: self.policy.rate_floor,
            });
        }
        match self.policy.instance_floor {
            Some(floor) if report.running_instance_count < floor => {
                Some(AlertKind::LowInstances {
                    running: report.running_instance_count,
                    floor,
                })
            }
            _ => None,
        }
    }

    /// Evaluate a report and emit an alert if the worker is out of cooldown.
    /// Emission restarts the worker's cooldown.
    pub fn observe(&mut self, report: &HeartbeatReport, now_secs: u64) -> Option<Alert> {
        let kind = self.evaluate(report)?;
        if let Some(last) = self.last_emitted.get(&report.worker_id)
            && now_secs.saturating_sub(*last) < self.policy.cooldown_secs
        {
            return None;
        }

        self.last_emitted.insert(report.worker_id.clone(), now_secs);
        Some(Alert {
            worker_id: report.worker_id.clone(),
            kind,
            emitted_at: now_secs,
        })
    }

    /// Last emission time for a worker (unix seconds).
    pub fn last_emitted(&self, worker_id: &WorkerId) -> Option<u64> {
        self.last_emitted.get(worker_id).copied()
    }

    /// Drop cooldown state for a worker (e.g. after retirement).
    pub fn forget(&mut self, worker_id: &WorkerId) {
        self.last_emitted.remove(worker_id);
    }

    /// Drop cooldown entries that expired before `now_secs`.
    ///
    /// Returns the count of entries removed.
    pub fn prune_expired(&mut self, now_secs: u64) -> usize {
        let cooldown = self.policy.cooldown_secs;
        let before = self.last_emitted.len();
        self.last_emitted
            .retain(|_, last| now_secs.saturating_sub(*last) < cooldown);
        before - self.last_emitted.len()
    }
}

// ─── Tests ───────────────────────────────────────────────────────
