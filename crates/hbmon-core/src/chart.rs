//! Chart data builders. Rendering is left to consumers; this module only
//! produces the series each chart kind plots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::WorkerLedger;
use crate::segments::{Point, extract_segments, hourly_rates};
use crate::types::WorkerId;

/// Workers below this share of the window total are folded into `Other`.
pub const PIE_FOLD_SHARE: f64 = 0.02;
/// Rates above this are treated as glitches by the distribution charts.
pub const RATE_OUTLIER_CEILING: f64 = 500.0;

// ─── Chart Kind ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Histogram,
    Pie,
    Boxplot,
    Density,
}

impl ChartKind {
    pub const ALL: [ChartKind; 5] = [
        ChartKind::Line,
        ChartKind::Histogram,
        ChartKind::Pie,
        ChartKind::Boxplot,
        ChartKind::Density,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Histogram => "histogram",
            ChartKind::Pie => "pie",
            ChartKind::Boxplot => "boxplot",
            ChartKind::Density => "density",
        }
    }

    /// Whether the chart is about one worker rather than the whole fleet.
    pub fn needs_subject(self) -> bool {
        matches!(self, ChartKind::Line | ChartKind::Histogram)
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| ChartError::UnknownKind(s.to_string()))
    }
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    #[error("invalid chart type `{0}`; available types: line, histogram, pie, boxplot, density")]
    UnknownKind(String),

    #[error("{0} chart needs a worker id")]
    MissingSubject(ChartKind),

    #[error("no data in the chart window")]
    NoData,
}

// ─── Chart Data ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    pub worker_id: WorkerId,
    pub segments: Vec<Vec<Point>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieSlice {
    pub label: String,
    pub acquired: u64,
    /// Fraction of the window total, in `[0, 1]`.
    pub share: f64,
}

/// Five-number summary of one worker's rate samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBox {
    pub worker_id: WorkerId,
    pub samples: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartData {
    Line {
        subject: String,
        series: Vec<LineSeries>,
    },
    Histogram {
        subject: String,
        rates: Vec<f64>,
    },
    Pie {
        slices: Vec<PieSlice>,
    },
    Boxplot {
        boxes: Vec<RateBox>,
    },
    Density {
        rates: Vec<f64>,
    },
}

impl ChartData {
    pub fn kind(&self) -> ChartKind {
        match self {
            ChartData::Line { .. } => ChartKind::Line,
            ChartData::Histogram { .. } => ChartKind::Histogram,
            ChartData::Pie { .. } => ChartKind::Pie,
            ChartData::Boxplot { .. } => ChartKind::Boxplot,
            ChartData::Density { .. } => ChartKind::Density,
        }
    }

    /// Plain-text digest for terminals.
    pub fn summary(&self) -> String {
        match self {
            ChartData::Line { subject, series } => {
                let mut out = format!("Rerolling runs from: {subject}\n");
                for line in series {
                    for (i, segment) in line.segments.iter().enumerate() {
                        let last = segment.last().copied().unwrap_or_default();
                        out.push_str(&format!(
                            "{} segment {}: {} points, ends at {} min / {} packs\n",
                            line.worker_id,
                            i + 1,
                            segment.len(),
                            last.0,
                            last.1
                        ));
                    }
                }
                out
            }
            ChartData::Histogram { subject, rates } => {
                let mean = rates.iter().sum::<f64>() / rates.len().max(1) as f64;
                format!(
                    "Rate of packs from: {subject}\n{} samples, mean {:.1} pph",
                    rates.len(),
                    mean
                )
            }
            ChartData::Pie { slices } => {
                let mut out = "Share of packs acquired:\n".to_string();
                for slice in slices {
                    out.push_str(&format!(
                        "{}: {} ({:.1}%)\n",
                        slice.label,
                        slice.acquired,
                        slice.share * 100.0
                    ));
                }
                out
            }
            ChartData::Boxplot { boxes } => {
                let mut out = "Distribution of packs per hour:\n".to_string();
                for b in boxes {
                    out.push_str(&format!(
                        "{}: n={} min {:.1} q1 {:.1} median {:.1} q3 {:.1} max {:.1}\n",
                        b.worker_id, b.samples, b.min, b.q1, b.median, b.q3, b.max
                    ));
                }
                out
            }
            ChartData::Density { rates } => {
                let median = quantile(&sorted(rates.clone()), 0.5);
                format!(
                    "Packs per hour across all workers: {} samples, median {:.1}",
                    rates.len(),
                    median
                )
            }
        }
    }
}

// ─── Builders ────────────────────────────────────────────────────

/// Build chart data of `kind` from every known ledger, keeping only rows
/// recorded at or after `since_secs`.
///
/// `subject` is required by the per-worker kinds; it matches the id and all
/// of its alternates.
pub fn build_chart<'a>(
    kind: ChartKind,
    subject: Option<&str>,
    ledgers: impl IntoIterator<Item = (&'a WorkerId, &'a WorkerLedger)>,
    since_secs: u64,
) -> Result<ChartData, ChartError> {
    if kind.needs_subject() && subject.is_none() {
        return Err(ChartError::MissingSubject(kind));
    }
    let windows = windowed_points(ledgers, since_secs);

    let data = match (kind, subject) {
        (ChartKind::Line, Some(subject)) => line(subject, &windows),
        (ChartKind::Histogram, Some(subject)) => histogram(subject, &windows),
        (ChartKind::Pie, _) => pie(&windows),
        (ChartKind::Boxplot, _) => boxplot(&windows),
        (ChartKind::Density, _) => density(&windows),
        (kind, None) => return Err(ChartError::MissingSubject(kind)),
    };
    data.ok_or(ChartError::NoData)
}

/// One worker's rows inside the chart window.
struct Window {
    worker_id: WorkerId,
    points: Vec<Point>,
    /// Lifetime acquired figures, in row order.
    lifetime_acquired: Vec<i64>,
}

impl Window {
    fn segments(&self) -> Vec<Vec<Point>> {
        extract_segments(self.points.iter().copied()).collect()
    }

    fn rates(&self) -> Vec<f64> {
        hourly_rates(extract_segments(self.points.iter().copied()))
    }
}

fn windowed_points<'a>(
    ledgers: impl IntoIterator<Item = (&'a WorkerId, &'a WorkerLedger)>,
    since_secs: u64,
) -> Vec<Window> {
    let mut windows: Vec<Window> = ledgers
        .into_iter()
        .filter_map(|(worker_id, ledger)| {
            let rows: Vec<_> = ledger.rows_since(since_secs).collect();
            (!rows.is_empty()).then(|| Window {
                worker_id: worker_id.clone(),
                points: rows.iter().map(|row| row.point()).collect(),
                lifetime_acquired: rows.iter().map(|row| row.session_acquired).collect(),
            })
        })
        .collect();
    windows.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
    windows
}

fn related<'w>(subject: &'w str, windows: &'w [Window]) -> impl Iterator<Item = &'w Window> {
    windows.iter().filter(move |w| w.worker_id.belongs_to(subject))
}

fn line(subject: &str, windows: &[Window]) -> Option<ChartData> {
    let series: Vec<LineSeries> = related(subject, windows)
        .map(|w| LineSeries {
            worker_id: w.worker_id.clone(),
            segments: w.segments(),
        })
        .collect();
    (!series.is_empty()).then(|| ChartData::Line {
        subject: subject.to_string(),
        series,
    })
}

fn histogram(subject: &str, windows: &[Window]) -> Option<ChartData> {
    let rates: Vec<f64> = related(subject, windows)
        .flat_map(Window::rates)
        .filter(|rate| *rate > 0.0)
        .collect();
    (!rates.is_empty()).then(|| ChartData::Histogram {
        subject: subject.to_string(),
        rates,
    })
}

fn pie(windows: &[Window]) -> Option<ChartData> {
    let mut acquired: Vec<(String, u64)> = windows
        .iter()
        .filter_map(|w| {
            let max = w.lifetime_acquired.iter().max()?;
            let min = w.lifetime_acquired.iter().min()?;
            let gained = u64::try_from(max - min).unwrap_or(0);
            (gained > 0).then(|| (w.worker_id.to_string(), gained))
        })
        .collect();
    if acquired.is_empty() {
        return None;
    }
    acquired.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let total: u64 = acquired.iter().map(|(_, n)| n).sum();
    let threshold = total as f64 * PIE_FOLD_SHARE;
    let (main, folded): (Vec<_>, Vec<_>) = acquired
        .into_iter()
        .partition(|(_, n)| *n as f64 >= threshold);

    let share = |n: u64| n as f64 / total as f64;
    let mut slices: Vec<PieSlice> = main
        .into_iter()
        .map(|(label, n)| PieSlice {
            label,
            acquired: n,
            share: share(n),
        })
        .collect();
    let other: u64 = folded.iter().map(|(_, n)| n).sum();
    if other > 0 {
        slices.push(PieSlice {
            label: "Other".to_string(),
            acquired: other,
            share: share(other),
        });
    }
    Some(ChartData::Pie { slices })
}

fn plausible(rate: f64) -> bool {
    rate > 0.0 && rate <= RATE_OUTLIER_CEILING
}

fn boxplot(windows: &[Window]) -> Option<ChartData> {
    let mut boxes: Vec<RateBox> = windows
        .iter()
        .filter_map(|w| {
            let rates = sorted(w.rates().into_iter().filter(|r| plausible(*r)).collect());
            let (first, last) = (rates.first().copied()?, rates.last().copied()?);
            Some(RateBox {
                worker_id: w.worker_id.clone(),
                samples: rates.len(),
                min: first,
                q1: quantile(&rates, 0.25),
                median: quantile(&rates, 0.5),
                q3: quantile(&rates, 0.75),
                max: last,
            })
        })
        .collect();
    boxes.sort_by(|a, b| {
        b.median
            .total_cmp(&a.median)
            .then_with(|| a.worker_id.cmp(&b.worker_id))
    });
    (!boxes.is_empty()).then_some(ChartData::Boxplot { boxes })
}

fn density(windows: &[Window]) -> Option<ChartData> {
    let rates: Vec<f64> = windows
        .iter()
        .flat_map(Window::rates)
        .filter(|r| plausible(*r))
        .collect();
    (!rates.is_empty()).then_some(ChartData::Density { rates })
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values
}

/// Linear-interpolated quantile of pre-sorted values; 0 for an empty slice.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ledger(reports: &[(u64, &[u64])]) -> WorkerLedger {
        let mut ledger = WorkerLedger::new();
        for (at, counters) in reports {
            ledger.record(counters.to_vec(), *at);
        }
        ledger
    }

    fn fleet() -> BTreeMap<WorkerId, WorkerLedger> {
        let mut map = BTreeMap::new();
        // Stale row at t=10 is outside a window starting at 100.
        map.insert(
            WorkerId::new("1"),
            ledger(&[(10, &[5, 5]), (100, &[10, 20]), (200, &[20, 40]), (300, &[0, 0]), (400, &[10, 30])]),
        );
        map.insert(
            WorkerId::new("1-1"),
            ledger(&[(100, &[10, 10]), (200, &[20, 20])]),
        );
        map.insert(
            WorkerId::new("2"),
            ledger(&[(100, &[10, 10]), (200, &[20, 11])]),
        );
        map
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Line".parse::<ChartKind>(), Ok(ChartKind::Line));
        assert_eq!(" density ".parse::<ChartKind>(), Ok(ChartKind::Density));
        assert_eq!(
            "radar".parse::<ChartKind>(),
            Err(ChartError::UnknownKind("radar".into()))
        );
    }

    #[test]
    fn per_worker_kinds_need_a_subject() {
        let fleet = fleet();
        assert_eq!(
            build_chart(ChartKind::Line, None, &fleet, 100),
            Err(ChartError::MissingSubject(ChartKind::Line))
        );
    }

    #[test]
    fn line_covers_alternates_and_window() {
        let fleet = fleet();
        let data = build_chart(ChartKind::Line, Some("1"), &fleet, 100).expect("chart");
        let ChartData::Line { series, .. } = data else {
            panic!("expected line chart");
        };
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].worker_id.as_str(), "1");
        assert_eq!(
            series[0].segments,
            vec![vec![(10, 20), (20, 40)], vec![(0, 0), (10, 30)]]
        );
        assert_eq!(series[1].worker_id.as_str(), "1-1");
    }

    #[test]
    fn histogram_keeps_positive_rates() {
        let fleet = fleet();
        let data = build_chart(ChartKind::Histogram, Some("1"), &fleet, 100).expect("chart");
        // 1: (10,20)->(20,40) = 120, (0,0)->(10,30) = 180; 1-1: 60.
        assert_eq!(
            data,
            ChartData::Histogram {
                subject: "1".into(),
                rates: vec![120.0, 180.0, 60.0],
            }
        );
    }

    #[test]
    fn unknown_subject_has_no_data() {
        let fleet = fleet();
        assert_eq!(
            build_chart(ChartKind::Line, Some("9"), &fleet, 100),
            Err(ChartError::NoData)
        );
    }

    #[test]
    fn pie_folds_small_shares() {
        let mut fleet = BTreeMap::new();
        fleet.insert(WorkerId::new("a"), ledger(&[(0, &[1, 0]), (1, &[2, 990])]));
        fleet.insert(WorkerId::new("b"), ledger(&[(0, &[1, 0]), (1, &[2, 5])]));
        fleet.insert(WorkerId::new("c"), ledger(&[(0, &[1, 0]), (1, &[2, 5])]));
        let data = build_chart(ChartKind::Pie, None, &fleet, 0).expect("chart");
        let ChartData::Pie { slices } = data else {
            panic!("expected pie chart");
        };
        let labels: Vec<&str> = slices.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "Other"]);
        assert_eq!(slices[1].acquired, 10);
        assert!((slices[0].share - 0.99).abs() < 1e-9);
    }

    #[test]
    fn boxplot_ranks_by_median_and_drops_outliers() {
        let mut fleet = BTreeMap::new();
        // Rates: 60, 120, then 6000 (outlier).
        fleet.insert(
            WorkerId::new("slow"),
            ledger(&[(0, &[1, 0]), (1, &[2, 1]), (2, &[3, 3]), (3, &[4, 103])]),
        );
        // Rate: 300.
        fleet.insert(WorkerId::new("fast"), ledger(&[(0, &[1, 0]), (1, &[2, 5])]));
        let data = build_chart(ChartKind::Boxplot, None, &fleet, 0).expect("chart");
        let ChartData::Boxplot { boxes } = data else {
            panic!("expected boxplot");
        };
        assert_eq!(boxes[0].worker_id.as_str(), "fast");
        assert_eq!(boxes[1].samples, 2);
        assert_eq!(boxes[1].median, 90.0);
        assert_eq!(boxes[1].max, 120.0);
    }

    #[test]
    fn density_pools_plausible_rates() {
        let fleet = fleet();
        let data = build_chart(ChartKind::Density, None, &fleet, 100).expect("chart");
        let ChartData::Density { rates } = data else {
            panic!("expected density");
        };
        // "2" contributes 6 pph; all within (0, 500].
        assert_eq!(rates.len(), 4);
        assert!(rates.iter().all(|r| *r > 0.0 && *r <= RATE_OUTLIER_CEILING));
    }

    #[test]
    fn quantile_interpolates() {
        assert_eq!(quantile(&[], 0.5), 0.0);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
        assert_eq!(quantile(&[1.0, 2.0, 3.0, 4.0], 0.25), 1.75);
    }
}
