//! Segment extraction: splits a ledger's `(elapsed, acquired)` series into
//! contiguous runs separated by all-zero boundary rows.
//!
//! A boundary row opens a new segment whose first point is `(0, 0)`.
//! Consecutive boundary rows collapse into one, so no segment is ever empty.

use crate::types::LedgerRow;

/// `(elapsed, acquired)`.
pub type Point = (u64, u64);

const BOUNDARY: Point = (0, 0);

/// Lazy, finite iterator over segments. Cloning it restarts from the same
/// position, so one extraction can feed several consumers.
#[derive(Debug, Clone)]
pub struct Segments<I> {
    points: I,
    /// Boundary seen while closing the previous segment; opens the next one.
    pending_boundary: bool,
}

impl<I: Iterator<Item = Point>> Iterator for Segments<I> {
    type Item = Vec<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut segment: Vec<Point> = Vec::new();
        if std::mem::take(&mut self.pending_boundary) {
            segment.push(BOUNDARY);
        }

        for point in self.points.by_ref() {
            if point != BOUNDARY {
                segment.push(point);
                continue;
            }
            match segment.as_slice() {
                // Leading boundary or a repeated one: nothing to close yet.
                [] => segment.push(BOUNDARY),
                [only] if *only == BOUNDARY => {}
                _ => {
                    self.pending_boundary = true;
                    return Some(segment);
                }
            }
        }

        (!segment.is_empty()).then_some(segment)
    }
}

/// Segment an arbitrary point sequence.
pub fn extract_segments<I>(points: I) -> Segments<I::IntoIter>
where
    I: IntoIterator<Item = Point>,
{
    Segments {
        points: points.into_iter(),
        pending_boundary: false,
    }
}

/// Segment ledger rows on their counter columns 0 and 1.
pub fn ledger_segments(rows: &[LedgerRow]) -> Segments<impl Iterator<Item = Point> + Clone + '_> {
    extract_segments(rows.iter().map(LedgerRow::point))
}

/// Slope between adjacent points, skipping pairs with no elapsed delta.
pub fn derivative(segment: &[Point]) -> Vec<f64> {
    segment
        .windows(2)
        .filter(|pair| pair[1].0 != pair[0].0)
        .map(|pair| {
            let dy = pair[1].1 as f64 - pair[0].1 as f64;
            let dx = pair[1].0 as f64 - pair[0].0 as f64;
            dy / dx
        })
        .collect()
}

/// Per-hour acquisition rates across all segments of a series.
pub fn hourly_rates(segments: impl IntoIterator<Item = Vec<Point>>) -> Vec<f64> {
    segments
        .into_iter()
        .flat_map(|segment| derivative(&segment))
        .map(|slope| slope * 60.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(points: &[Point]) -> Vec<Vec<Point>> {
        extract_segments(points.iter().copied()).collect()
    }

    #[test]
    fn no_boundaries_yield_one_segment() {
        let points = [(1, 5), (2, 9), (3, 12)];
        assert_eq!(collect(&points), vec![points.to_vec()]);
    }

    #[test]
    fn consecutive_boundaries_collapse() {
        let segments = collect(&[(0, 0), (1, 5), (2, 9), (0, 0), (0, 0), (1, 2)]);
        assert_eq!(
            segments,
            vec![vec![(0, 0), (1, 5), (2, 9)], vec![(0, 0), (1, 2)]]
        );
    }

    #[test]
    fn boundary_after_plain_run_opens_new_segment() {
        let segments = collect(&[(1, 5), (0, 0), (2, 3)]);
        assert_eq!(segments, vec![vec![(1, 5)], vec![(0, 0), (2, 3)]]);
    }

    #[test]
    fn trailing_boundary_is_a_single_point_segment() {
        let segments = collect(&[(1, 5), (0, 0)]);
        assert_eq!(segments, vec![vec![(1, 5)], vec![(0, 0)]]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(collect(&[]).is_empty());
    }

    #[test]
    fn clone_restarts_iteration() {
        let points = vec![(1, 1), (0, 0), (2, 2)];
        let segments = extract_segments(points.clone());
        let first: Vec<_> = segments.clone().collect();
        let second: Vec<_> = segments.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn ledger_rows_are_segmented_on_first_two_columns() {
        let row = |c: &[u64]| LedgerRow {
            counters: c.to_vec(),
            session_elapsed: 0,
            session_acquired: 0,
            recorded_at: 0,
        };
        let rows = vec![row(&[1, 2, 7]), row(&[0, 0, 0]), row(&[3, 4, 0])];
        let segments: Vec<_> = ledger_segments(&rows).collect();
        assert_eq!(segments, vec![vec![(1, 2)], vec![(0, 0), (3, 4)]]);
    }

    #[test]
    fn derivative_skips_zero_dx() {
        let slopes = derivative(&[(0, 0), (2, 10), (2, 12), (4, 12)]);
        assert_eq!(slopes, vec![5.0, 0.0]);
    }

    #[test]
    fn hourly_rates_scale_by_sixty() {
        let rates = hourly_rates(vec![vec![(0, 0), (10, 5)], vec![(0, 0), (1, 1)]]);
        assert_eq!(rates, vec![30.0, 60.0]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Without boundary rows the whole series is one segment.
        #[test]
        fn zero_free_series_is_single_segment(
            points in proptest::collection::vec((1u64..1000, 0u64..1000), 1..50),
        ) {
            let segments: Vec<_> = extract_segments(points.clone()).collect();
            prop_assert_eq!(segments, vec![points]);
        }

        /// Segments are never empty and never start with two boundaries.
        #[test]
        fn segments_are_well_formed(
            points in proptest::collection::vec(
                prop_oneof![Just((0u64, 0u64)), (0u64..5, 0u64..5)],
                0..60,
            ),
        ) {
            for segment in extract_segments(points) {
                prop_assert!(!segment.is_empty());
                if segment.len() > 1 {
                    prop_assert!(segment[1] != (0, 0));
                }
            }
        }
    }
}
