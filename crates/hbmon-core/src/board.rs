//! Live board aggregation: turns the latest heartbeat of every tracked
//! worker into one ranked, annotated text payload.
//!
//! The board is rebuilt from scratch on every tick; entries carry no
//! identity across ticks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HeartbeatReport, WorkerId};

pub const BOARD_TITLE: &str = "## Latest heart beats:";

// ─── Policy ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardPolicy {
    /// Workers silent for longer than this are left off the board (seconds).
    pub offline_threshold_secs: u64,
    /// Entries with fewer running instances are emphasized.
    pub bold_instance_threshold: u32,
    /// Entries with a lower per-hour rate are emphasized.
    pub rate_warning_threshold: f64,
    /// Platform ceiling on the rendered payload, in characters.
    pub max_payload_chars: usize,
}

impl Default for BoardPolicy {
    fn default() -> Self {
        Self {
            offline_threshold_secs: 60 * 33,
            bold_instance_threshold: 4,
            rate_warning_threshold: 100.0,
            max_payload_chars: 2000,
        }
    }
}

// ─── Roster ──────────────────────────────────────────────────────

/// Latest report per worker. A newer report replaces the previous one.
#[derive(Debug, Clone, Default)]
pub struct WorkerRoster {
    latest: HashMap<WorkerId, HeartbeatReport>,
}

impl WorkerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, report: HeartbeatReport) {
        self.latest.insert(report.worker_id.clone(), report);
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<&HeartbeatReport> {
        self.latest.get(worker_id)
    }

    pub fn remove(&mut self, worker_id: &WorkerId) -> Option<HeartbeatReport> {
        self.latest.remove(worker_id)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Owned copy of the current reports, taken at tick start so ingestion
    /// can keep mutating the roster while the board is built.
    pub fn snapshot(&self) -> Vec<HeartbeatReport> {
        self.latest.values().cloned().collect()
    }
}

// ─── Snapshot ────────────────────────────────────────────────────

/// One board line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEntry {
    pub worker_id: WorkerId,
    pub last_seen: DateTime<Utc>,
    pub running_instances: u32,
    pub total_instances: u32,
    pub rate: f64,
    /// Elapsed units in the reported session.
    pub session_elapsed: u64,
    /// Lifetime acquired units from the worker's latest ledger row.
    pub lifetime_acquired: Option<i64>,
    pub is_new: bool,
    pub emphasized: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardTotals {
    pub active_workers: usize,
    pub running_instances: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub totals: BoardTotals,
    /// Most recently seen first.
    pub entries: Vec<LiveEntry>,
}

/// Build the board from a roster snapshot.
///
/// `lifetime_acquired` looks up the worker's latest lifetime figure, if any.
pub fn build_board<'a>(
    reports: impl IntoIterator<Item = &'a HeartbeatReport>,
    lifetime_acquired: impl Fn(&WorkerId) -> Option<i64>,
    now: DateTime<Utc>,
    policy: &BoardPolicy,
) -> BoardSnapshot {
    let threshold = i64::try_from(policy.offline_threshold_secs).unwrap_or(i64::MAX);

    let mut entries: Vec<LiveEntry> = reports
        .into_iter()
        .filter(|report| (now - report.received_at).num_seconds() <= threshold)
        .map(|report| {
            let rate = report.rate();
            LiveEntry {
                worker_id: report.worker_id.clone(),
                last_seen: report.received_at,
                running_instances: report.running_instance_count,
                total_instances: report.total_instances(),
                rate,
                session_elapsed: report.elapsed(),
                lifetime_acquired: lifetime_acquired(&report.worker_id),
                is_new: report.elapsed() == 0,
                emphasized: report.running_instance_count < policy.bold_instance_threshold
                    || rate < policy.rate_warning_threshold,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.worker_id.cmp(&b.worker_id))
    });

    let totals = BoardTotals {
        active_workers: entries.len(),
        running_instances: entries.iter().map(|e| u64::from(e.running_instances)).sum(),
        rate: entries.iter().fold(0.0, |acc, e| acc + e.rate),
    };

    BoardSnapshot {
        generated_at: now,
        totals,
        entries,
    }
}

impl BoardSnapshot {
    pub fn header(&self) -> String {
        format!(
            "{BOARD_TITLE}\n**{} rollers | {} instances | {} pph** ",
            self.totals.active_workers,
            self.totals.running_instances,
            self.totals.rate.round()
        )
    }

    /// Render the payload, dropping trailing entries (oldest first) behind a
    /// truncation notice when it would exceed `max_chars`.
    pub fn render(&self, max_chars: usize) -> String {
        let header = self.header();
        let lines: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry_line(entry, self.generated_at))
            .collect();

        let header_len = header.chars().count();
        if header_len > max_chars {
            return header.chars().take(max_chars).collect();
        }

        let mut used = header_len;
        let mut kept = 0;
        for line in &lines {
            let add = 1 + line.chars().count();
            if used + add > max_chars {
                break;
            }
            used += add;
            kept += 1;
        }

        let mut notice = None;
        if kept < lines.len() {
            loop {
                let text = truncation_notice(lines.len() - kept);
                if used + 1 + text.chars().count() <= max_chars || kept == 0 {
                    notice = Some(text);
                    break;
                }
                kept -= 1;
                used -= 1 + lines[kept].chars().count();
            }
        }

        let mut out = header;
        for line in &lines[..kept] {
            out.push('\n');
            out.push_str(line);
        }
        if let Some(text) = notice
            && used + 1 + text.chars().count() <= max_chars
        {
            out.push('\n');
            out.push_str(&text);
        }
        out
    }
}

fn truncation_notice(hidden: usize) -> String {
    format!("*…and {hidden} more*")
}

/// `<@base> ALT 3m 4/6 in. 250 pph NEW`, bolded when emphasized.
fn entry_line(entry: &LiveEntry, now: DateTime<Utc>) -> String {
    let minutes = (now - entry.last_seen).num_seconds().max(0) / 60;
    let alt = if entry.worker_id.is_alternate() {
        " ALT"
    } else {
        ""
    };
    let new = if entry.is_new { " NEW" } else { "" };
    let line = format!(
        "<@{}>{alt} {minutes}m {}/{} in. {} pph{new}",
        entry.worker_id.base(),
        entry.running_instances,
        entry.total_instances,
        entry.rate.round()
    );
    if entry.emphasized {
        format!("**{line}**")
    } else {
        line
    }
}
