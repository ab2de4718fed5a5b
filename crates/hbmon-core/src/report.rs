//! Read-side query results built from ledgers and test-event logs, with
//! their text renderings.

use serde::{Deserialize, Serialize};

use crate::ledger::{Figures, WorkerLedger};
use crate::types::WorkerId;

// ─── Worker Status ───────────────────────────────────────────────

/// Single-worker lookup: current session, lifetime totals, personal best.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub current: Figures<u64>,
    pub lifetime: Figures<i64>,
    pub record: Figures<u64>,
    /// Confirmed test count, when the user has a test-event document.
    pub tests: Option<u64>,
}

impl WorkerStatus {
    /// `None` for an empty ledger.
    pub fn from_ledger(worker_id: WorkerId, ledger: &WorkerLedger, tests: Option<u64>) -> Option<Self> {
        Some(Self {
            worker_id,
            current: ledger.current()?,
            lifetime: ledger.lifetime()?,
            record: ledger.record_session()?,
            tests,
        })
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "**User ID:** {}\n\
             **Current session:**\nTime: {} Packs: {}\n\
             **Total:**\nTime: {} Packs: {}\n\
             **Record session:**\nTime: {} Packs: {}\n",
            self.worker_id,
            self.current.elapsed,
            self.current.acquired,
            self.lifetime.elapsed,
            self.lifetime.acquired,
            self.record.elapsed,
            self.record.acquired,
        );
        if let Some(tests) = self.tests {
            out.push_str(&format!("**Tester data:**\nPack tests: {tests}"));
        }
        out
    }
}

// ─── Server Totals ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTotals {
    pub workers: usize,
    pub elapsed: i64,
    pub acquired: i64,
}

/// Sum of lifetime figures over the latest row of every non-empty ledger.
pub fn server_totals<'a>(ledgers: impl IntoIterator<Item = &'a WorkerLedger>) -> ServerTotals {
    ledgers
        .into_iter()
        .filter_map(WorkerLedger::lifetime)
        .fold(ServerTotals::default(), |acc, lifetime| ServerTotals {
            workers: acc.workers + 1,
            elapsed: acc.elapsed.saturating_add(lifetime.elapsed),
            acquired: acc.acquired.saturating_add(lifetime.acquired),
        })
}

impl ServerTotals {
    pub fn render(&self) -> String {
        if self.workers == 0 {
            return "No data available for the server.".to_string();
        }
        format!(
            "**Server total:**\n**Total time:** {}\n**Total packs:** {}",
            self.elapsed, self.acquired
        )
    }
}

// ─── Leaderboard ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedWorker {
    pub rank: usize,
    pub worker_id: WorkerId,
    pub lifetime_acquired: i64,
}

/// Top `n` workers by lifetime acquired units; ties ordered by id.
pub fn top_by_lifetime(
    entries: impl IntoIterator<Item = (WorkerId, i64)>,
    n: usize,
) -> Vec<RankedWorker> {
    let mut entries: Vec<(WorkerId, i64)> = entries.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (worker_id, lifetime_acquired))| RankedWorker {
            rank: i + 1,
            worker_id,
            lifetime_acquired,
        })
        .collect()
}

pub fn render_top(ranked: &[RankedWorker]) -> String {
    if ranked.is_empty() {
        return "No data available for top users.".to_string();
    }
    let mut out = format!("**Top {} users by total packs:**\n", ranked.len());
    for entry in ranked {
        out.push_str(&format!(
            "**{}.** <@{}> - {} packs\n",
            entry.rank, entry.worker_id, entry.lifetime_acquired
        ));
    }
    out
}

// ─── Inactivity ──────────────────────────────────────────────────

/// Base workers with telemetry whose last confirmed test is older than
/// `cutoff_secs`, or who have no confirmed tests at all.
///
/// `last_test_at` returns `None` when the user has no test-event document
/// or an empty one. Alternates are skipped. Output is sorted by id.
pub fn inactive_workers<'a>(
    telemetry_ids: impl IntoIterator<Item = &'a WorkerId>,
    last_test_at: impl Fn(&WorkerId) -> Option<u64>,
    cutoff_secs: u64,
) -> Vec<WorkerId> {
    let mut inactive: Vec<WorkerId> = telemetry_ids
        .into_iter()
        .filter(|id| !id.is_alternate())
        .filter(|id| last_test_at(id).is_none_or(|at| at < cutoff_secs))
        .cloned()
        .collect();
    inactive.sort();
    inactive.dedup();
    inactive
}

pub fn render_inactive(inactive: &[WorkerId], days: u64) -> String {
    if inactive.is_empty() {
        return "No inactive users found.".to_string();
    }
    let mentions: Vec<String> = inactive.iter().map(|id| format!("<@{id}>")).collect();
    format!(
        "**Users not testing for {days}+ days or missing tester data:**\n{}",
        mentions.join("\n")
    )
}

// ─── Tester Groups ───────────────────────────────────────────────

/// Inclusive test-count buckets; the last one is open-ended.
pub const TESTER_BUCKETS: [(&str, u64, u64); 5] = [
    ("0-10 tests", 0, 10),
    ("11-50 tests", 11, 50),
    ("51-100 tests", 51, 100),
    ("101-200 tests", 101, 200),
    ("201+ tests", 201, u64::MAX),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesterGroup {
    pub label: String,
    /// `(user, test count)`, highest count first.
    pub members: Vec<(WorkerId, u64)>,
}

/// Group users by confirmed test count. Every bucket is returned, in order.
pub fn group_testers(counts: impl IntoIterator<Item = (WorkerId, u64)>) -> Vec<TesterGroup> {
    let mut groups: Vec<TesterGroup> = TESTER_BUCKETS
        .iter()
        .map(|(label, _, _)| TesterGroup {
            label: (*label).to_string(),
            members: Vec::new(),
        })
        .collect();

    for (user, count) in counts {
        if let Some(index) = TESTER_BUCKETS
            .iter()
            .position(|(_, lo, hi)| (*lo..=*hi).contains(&count))
        {
            groups[index].members.push((user, count));
        }
    }

    for group in &mut groups {
        group
            .members
            .sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    }
    groups
}

pub fn render_tester_groups(groups: &[TesterGroup]) -> String {
    if groups.iter().all(|g| g.members.is_empty()) {
        return "No tester data available.".to_string();
    }
    let mut out = "**Tester Data (Grouped by Pack Tests):**\n".to_string();
    for group in groups.iter().filter(|g| !g.members.is_empty()) {
        out.push_str(&format!("\n**{}:**\n", group.label));
        for (user, count) in &group.members {
            out.push_str(&format!("<@{user}> {count} packs\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(reports: &[&[u64]]) -> WorkerLedger {
        let mut ledger = WorkerLedger::new();
        for (i, counters) in reports.iter().enumerate() {
            ledger.record(counters.to_vec(), i as u64);
        }
        ledger
    }

    #[test]
    fn status_from_ledger() {
        let status = WorkerStatus::from_ledger(
            WorkerId::new("7"),
            &ledger(&[&[10, 50], &[30, 90]]),
            Some(4),
        )
        .expect("status");
        assert_eq!(status.current.elapsed, 30);
        assert_eq!(status.lifetime.acquired, 40);
        assert_eq!(status.record.acquired, 90);
        let text = status.render();
        assert!(text.starts_with("**User ID:** 7\n"));
        assert!(text.contains("Time: 20 Packs: 40"));
        assert!(text.ends_with("Pack tests: 4"));
    }

    #[test]
    fn status_absent_for_empty_ledger() {
        assert!(WorkerStatus::from_ledger(WorkerId::new("7"), &WorkerLedger::new(), None).is_none());
    }

    #[test]
    fn totals_sum_latest_rows() {
        let a = ledger(&[&[10, 50], &[20, 70]]);
        let b = ledger(&[&[5, 5], &[15, 25]]);
        let empty = WorkerLedger::new();
        let totals = server_totals([&a, &b, &empty]);
        assert_eq!(
            totals,
            ServerTotals {
                workers: 2,
                elapsed: 20,
                acquired: 40
            }
        );
        assert!(totals.render().contains("**Total packs:** 40"));
        assert_eq!(server_totals([&empty]).render(), "No data available for the server.");
    }

    #[test]
    fn top_ranks_descending() {
        let ranked = top_by_lifetime(
            vec![
                (WorkerId::new("a"), 10),
                (WorkerId::new("b"), 30),
                (WorkerId::new("c"), 20),
            ],
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].worker_id.as_str(), "b");
        assert_eq!(ranked[1].rank, 2);
        assert!(render_top(&ranked).contains("**1.** <@b> - 30 packs"));
    }

    #[test]
    fn inactive_flags_stale_and_missing_testers() {
        let ids = [
            WorkerId::new("1"),
            WorkerId::new("2"),
            WorkerId::new("3"),
            WorkerId::new("3-1"),
        ];
        let inactive = inactive_workers(
            &ids,
            |id| match id.as_str() {
                "1" => Some(1_000),
                "2" => Some(100),
                _ => None,
            },
            500,
        );
        assert_eq!(inactive, vec![WorkerId::new("2"), WorkerId::new("3")]);
        assert!(render_inactive(&inactive, 7).contains("7+ days"));
    }

    #[test]
    fn testers_are_bucketed() {
        let groups = group_testers(vec![
            (WorkerId::new("a"), 0),
            (WorkerId::new("b"), 11),
            (WorkerId::new("c"), 250),
            (WorkerId::new("d"), 10),
        ]);
        assert_eq!(groups.len(), 5);
        assert_eq!(
            groups[0].members,
            vec![(WorkerId::new("d"), 10), (WorkerId::new("a"), 0)]
        );
        assert_eq!(groups[1].members.len(), 1);
        assert_eq!(groups[4].members[0].0.as_str(), "c");

        let text = render_tester_groups(&groups);
        assert!(text.contains("**201+ tests:**\n<@c> 250 packs"));
        assert!(!text.contains("51-100"));
    }
}
