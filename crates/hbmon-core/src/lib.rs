//! hbmon-core: heartbeat parsing, session accounting, live-board
//! aggregation, alert gating, segment extraction and read-side queries.
//!
//! Pure library with no IO or async dependencies. Persistence lives in
//! `hbmon-store`; scheduling and publishing live in `hbmon-runtime`.

pub mod alert;
pub mod board;
pub mod chart;
pub mod ledger;
pub mod parse;
pub mod report;
pub mod segments;
pub mod testers;
pub mod types;

pub use alert::{Alert, AlertGate, AlertKind, AlertPolicy};
pub use board::{BoardPolicy, BoardSnapshot, LiveEntry, WorkerRoster, build_board};
pub use chart::{ChartData, ChartError, ChartKind, build_chart};
pub use ledger::{Figures, WorkerLedger};
pub use parse::{ParsedHeartbeat, parse_heartbeat};
pub use segments::{Point, Segments, extract_segments, ledger_segments};
pub use testers::{RetractOutcome, TestEventLog};
pub use types::{HeartbeatReport, LedgerRow, RowDecodeError, TestEvent, WorkerId};
