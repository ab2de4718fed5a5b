//! Telemetry parser: turns one raw heartbeat payload into a report.
//!
//! Payload layout (one item per line, extra lines ignored):
//!
//! 1. header containing a `<digits>` or `<digits-digits>` worker token
//! 2. one numeric token per running instance
//! 3. one numeric token per secondary instance
//! 4. counters, e.g. `elapsed acquired`
//!
//! Parsing never fails loudly: the channel carries plenty of unrelated
//! traffic, so anything that does not fit is simply not a heartbeat.

use chrono::{DateTime, Utc};

use crate::types::{HeartbeatReport, WorkerId, derived_rate};

/// Minimum number of lines in a heartbeat payload.
pub const MIN_LINES: usize = 4;

/// Heartbeat fields before attribution. `worker_id` is `None` when the
/// header carries no worker token.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHeartbeat {
    pub worker_id: Option<WorkerId>,
    pub received_at: DateTime<Utc>,
    pub running_instance_count: u32,
    pub secondary_instance_count: u32,
    pub counters: Vec<u64>,
}

impl ParsedHeartbeat {
    pub fn rate(&self) -> f64 {
        derived_rate(&self.counters)
    }

    /// Attach the worker id. Unattributable heartbeats yield `None` and
    /// must be dropped by the caller.
    pub fn attribute(self) -> Option<HeartbeatReport> {
        let worker_id = self.worker_id?;
        Some(HeartbeatReport {
            worker_id,
            received_at: self.received_at,
            running_instance_count: self.running_instance_count,
            secondary_instance_count: self.secondary_instance_count,
            counters: self.counters,
        })
    }
}

/// Parse a raw payload. Returns `None` when it has fewer than
/// [`MIN_LINES`] lines.
pub fn parse_heartbeat(payload: &str, received_at: DateTime<Utc>) -> Option<ParsedHeartbeat> {
    let lines: Vec<&str> = payload.split('\n').collect();
    if lines.len() < MIN_LINES {
        return None;
    }

    let count = |line: &str| u32::try_from(digit_runs(line).count()).unwrap_or(u32::MAX);

    Some(ParsedHeartbeat {
        worker_id: find_worker_token(lines[0]),
        received_at,
        running_instance_count: count(lines[1]),
        secondary_instance_count: count(lines[2]),
        counters: digit_runs(lines[3])
            .map(|run| run.parse::<u64>().unwrap_or(u64::MAX))
            .collect(),
    })
}

/// Maximal runs of ASCII digits, in order of appearance.
fn digit_runs(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
}

/// First `<digits>` / `<digits-digits>` token in the line.
fn find_worker_token(line: &str) -> Option<WorkerId> {
    line.match_indices('<')
        .find_map(|(start, _)| match_token(&line[start + 1..]))
        .map(WorkerId::new)
}

fn match_token(rest: &str) -> Option<&str> {
    let bytes = rest.as_bytes();
    let leading = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if leading == 0 {
        return None;
    }

    let mut end = leading;
    if bytes.get(end) == Some(&b'-') {
        let suffix = bytes[end + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if suffix > 0 {
            end += 1 + suffix;
        }
    }

    (bytes.get(end) == Some(&b'>')).then(|| &rest[..end])
}
