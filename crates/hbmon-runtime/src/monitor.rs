//! Monitor state shared by the ingestion path, the board loop and the RPC
//! server. Always accessed through one `tokio::sync::Mutex`; the bulk
//! queries in [`StoreQueries`] read the store without it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hbmon_core::report::{
    RankedWorker, ServerTotals, TesterGroup, WorkerStatus, group_testers, inactive_workers,
    server_totals, top_by_lifetime,
};
use hbmon_core::{
    Alert, AlertGate, BoardPolicy, BoardSnapshot, ChartData, ChartError, ChartKind, HeartbeatReport,
    LedgerRow, RetractOutcome, TestEvent, WorkerId, WorkerRoster, build_board, build_chart,
    parse_heartbeat,
};
use hbmon_store::{
    RetireReport, SessionLedger, StoreError, StoreLayout, TestEventLedger, retire,
};

use crate::config::{Config, IngestConfig};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// One raw message from the ingestion source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: String,
    pub channel_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Fewer lines than a heartbeat carries.
    NotAHeartbeat,
    /// No worker token on the header line.
    Unattributed,
    /// The ledger write failed; nothing was recorded.
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Recorded {
        worker_id: WorkerId,
        row: LedgerRow,
        alert: Option<Alert>,
    },
    /// Wrong sender or channel.
    Ignored,
    Dropped { reason: DropReason },
}

pub struct MonitorState {
    ingest: IngestConfig,
    board_policy: BoardPolicy,
    layout: StoreLayout,
    pub ledgers: SessionLedger,
    pub testers: TestEventLedger,
    pub roster: WorkerRoster,
    pub alerts: AlertGate,
}

impl MonitorState {
    pub fn new(config: &Config) -> Self {
        let layout = StoreLayout::new(&config.store.root);
        Self {
            ingest: config.ingest.clone(),
            board_policy: config.board.policy(),
            ledgers: SessionLedger::new(layout.clone()),
            testers: TestEventLedger::new(layout.clone()),
            layout,
            roster: WorkerRoster::new(),
            alerts: AlertGate::new(config.alert.policy()),
        }
    }

    /// Create the store directories and load every persisted ledger.
    /// Returns the number of ledgers loaded.
    pub fn open(config: &Config) -> Result<(Self, usize), StoreError> {
        let mut state = Self::new(config);
        state.layout.ensure_dirs()?;
        let warnings = state.ledgers.load_all()?;
        let loaded = state.ledgers.cached_len();
        tracing::info!(loaded, skipped = warnings.len(), "ledgers loaded");
        Ok((state, loaded))
    }

    // ─── Ingestion ───────────────────────────────────────────────

    pub fn ingest(&mut self, envelope: &Envelope) -> IngestOutcome {
        if !self.ingest.accepts(&envelope.sender_id, &envelope.channel_id) {
            return IngestOutcome::Ignored;
        }

        let Some(parsed) = parse_heartbeat(&envelope.content, envelope.received_at) else {
            tracing::debug!(sender = %envelope.sender_id, "dropped payload: not a heartbeat");
            return dropped(DropReason::NotAHeartbeat);
        };
        let Some(report) = parsed.attribute() else {
            tracing::debug!(sender = %envelope.sender_id, "dropped payload: no worker token");
            return dropped(DropReason::Unattributed);
        };

        let now_secs = unix_secs(envelope.received_at);
        let row = match self
            .ledgers
            .record(&report.worker_id, report.counters.clone(), now_secs)
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(worker = %report.worker_id, "ledger write failed: {e}");
                return dropped(DropReason::Persistence(e.to_string()));
            }
        };

        let alert = self.alerts.observe(&report, now_secs);
        if let Some(alert) = &alert {
            tracing::info!(worker = %alert.worker_id, kind = ?alert.kind, "alert emitted");
        }

        let worker_id = report.worker_id.clone();
        self.roster.observe(report);
        IngestOutcome::Recorded {
            worker_id,
            row,
            alert,
        }
    }

    // ─── Board ───────────────────────────────────────────────────

    /// Owned roster copy plus each worker's lifetime acquired figure, so the
    /// board can be built after the lock is released.
    pub fn board_inputs(&self) -> BoardInputs {
        let reports = self.roster.snapshot();
        let lifetime = reports
            .iter()
            .filter_map(|report| {
                let acquired = self.ledgers.cached(&report.worker_id)?.lifetime()?.acquired;
                Some((report.worker_id.clone(), acquired))
            })
            .collect();
        BoardInputs {
            reports,
            lifetime,
            policy: self.board_policy.clone(),
        }
    }

    // ─── Queries ─────────────────────────────────────────────────

    pub fn check(&mut self, worker_id: &WorkerId) -> Result<Option<WorkerStatus>, StoreError> {
        let tests = self.testers.count(worker_id)?;
        Ok(self
            .ledgers
            .ledger(worker_id)?
            .and_then(|ledger| WorkerStatus::from_ledger(worker_id.clone(), ledger, tests)))
    }

    /// Lock-free handle for the bulk queries over the persisted documents.
    pub fn queries(&self) -> StoreQueries {
        StoreQueries::new(self.layout.clone())
    }

    // ─── Administration ──────────────────────────────────────────

    pub fn confirm(
        &self,
        user_id: &WorkerId,
        confirmer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TestEvent, StoreError> {
        self.testers.append(user_id, confirmer_id, unix_secs(now))
    }

    pub fn retract(&self, user_id: &WorkerId, confirmer_id: &str) -> Result<RetractOutcome, StoreError> {
        self.testers.retract(user_id, confirmer_id)
    }

    /// Archive the worker's documents and forget its in-memory state.
    pub fn retire(&mut self, worker_id: &WorkerId) -> RetireReport {
        let report = retire(&self.layout, worker_id);
        self.ledgers.evict(worker_id);
        self.roster.remove(worker_id);
        self.alerts.forget(worker_id);
        report
    }
}

/// Bulk queries that scan every persisted document. They read the store
/// directly and never touch the monitor lock; documents are replaced by
/// rename, so a scan sees each one either before or after a write.
#[derive(Debug, Clone)]
pub struct StoreQueries {
    layout: StoreLayout,
}

impl StoreQueries {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn session_ledger(&self) -> SessionLedger {
        SessionLedger::new(self.layout.clone())
    }

    fn test_events(&self) -> TestEventLedger {
        TestEventLedger::new(self.layout.clone())
    }

    /// Base workers with telemetry but no confirmed test in the last `days`.
    pub fn inactive(&self, days: u64, now: DateTime<Utc>) -> Result<Vec<WorkerId>, StoreError> {
        let cutoff = unix_secs(now).saturating_sub(days.saturating_mul(SECS_PER_DAY));
        let (ledgers, _) = self.session_ledger().read_persisted()?;
        let (logs, _) = self.test_events().load_all()?;
        let last_test: HashMap<WorkerId, u64> = logs
            .into_iter()
            .filter_map(|(id, log)| Some((id, log.last_recorded_at()?)))
            .collect();
        Ok(inactive_workers(
            ledgers.iter().map(|(id, _)| id),
            |id| last_test.get(id).copied(),
            cutoff,
        ))
    }

    pub fn testers(&self) -> Result<Vec<TesterGroup>, StoreError> {
        let (logs, _) = self.test_events().load_all()?;
        Ok(group_testers(
            logs.into_iter().map(|(id, log)| (id, log.count())),
        ))
    }

    pub fn totals(&self) -> Result<ServerTotals, StoreError> {
        let (ledgers, _) = self.session_ledger().read_persisted()?;
        Ok(server_totals(ledgers.iter().map(|(_, ledger)| ledger)))
    }

    /// Top workers by lifetime acquired, read from the persisted documents.
    pub fn top(&self, n: usize) -> Result<Vec<RankedWorker>, StoreError> {
        let (ledgers, _) = self.session_ledger().read_persisted()?;
        Ok(top_by_lifetime(
            ledgers
                .iter()
                .filter_map(|(id, ledger)| Some((id.clone(), ledger.lifetime()?.acquired))),
            n,
        ))
    }

    pub fn chart(
        &self,
        kind: ChartKind,
        subject: Option<&str>,
        window_days: u64,
        now: DateTime<Utc>,
    ) -> Result<Result<ChartData, ChartError>, StoreError> {
        let since = unix_secs(now).saturating_sub(window_days.saturating_mul(SECS_PER_DAY));
        let (ledgers, _) = self.session_ledger().read_persisted()?;
        Ok(build_chart(
            kind,
            subject,
            ledgers.iter().map(|(id, ledger)| (id, ledger)),
            since,
        ))
    }
}

/// Inputs for one board build, detached from the monitor lock.
#[derive(Debug, Clone)]
pub struct BoardInputs {
    pub reports: Vec<HeartbeatReport>,
    pub lifetime: HashMap<WorkerId, i64>,
    pub policy: BoardPolicy,
}

impl BoardInputs {
    pub fn build(&self, now: DateTime<Utc>) -> BoardSnapshot {
        build_board(
            &self.reports,
            |id| self.lifetime.get(id).copied(),
            now,
            &self.policy,
        )
    }
}

fn dropped(reason: DropReason) -> IngestOutcome {
    IngestOutcome::Dropped { reason }
}

pub fn unix_secs(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}
