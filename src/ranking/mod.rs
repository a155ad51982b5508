//! Candidate ranking
//!
//! Orders snapshot candidates for the scout, record, and publish workflows.
//! Points bias a weighted-random draw rather than dictating a strict order,
//! so low-scoring corners of the archive still get visited eventually.

use crate::config::RankingConfig;
use rand::Rng;

/// Computes the weighted-random rank of a point total.
///
/// `draw` is a uniform sample from `[0, 1)`. The result lives in `(-1, 1)`;
/// larger is better. Higher point totals push the exponent toward zero and
/// the rank toward 1, while the offset flattens that advantage so the draw
/// matters more. With a zero offset a zero-point candidate ranks exactly at
/// its draw, which almost always loses to anything with real points.
pub fn rank(points: i64, offset: f64, draw: f64) -> f64 {
    let sign = if points < 0 { -1.0 } else { 1.0 };
    let magnitude = points.unsigned_abs() as f64;
    sign * draw.powf(1.0 / (magnitude + 1.0 + offset))
}

/// One row under consideration for a workflow batch.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: i64,

    /// Current point total, if the row has been scored
    pub points: Option<i64>,

    /// Manual priority band; zero for rows never enqueued by hand
    pub priority: i64,

    /// Link distance from a root snapshot
    pub depth: i64,

    /// True when this row's host is over its diversity threshold and should
    /// yield to less-visited hosts
    pub cooled: bool,
}

/// Orders candidates and returns at most `batch_size` of them.
///
/// The order is decided in layers:
/// 1. rows deeper than `max-depth` are dropped outright;
/// 2. rows at or below `max-required-depth` come before deeper rows;
/// 3. manually prioritized rows next, highest band first, ties oldest first,
///    with no randomness;
/// 4. everything else by weighted-random rank descending; with no offset
///    configured the draw is uniform and points are ignored entirely;
/// 5. cooled hosts sink to the back, keeping their relative order.
pub fn order_batch<R: Rng>(
    mut candidates: Vec<Candidate>,
    config: &RankingConfig,
    batch_size: usize,
    rng: &mut R,
) -> Vec<Candidate> {
    if let Some(max_depth) = config.max_depth {
        candidates.retain(|c| c.depth <= max_depth);
    }

    let mut keyed: Vec<(SortKey, Candidate)> = candidates
        .into_iter()
        .map(|c| (sort_key(&c, config, rng), c))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // Stable partition: cooled hosts go last without reshuffling either side.
    let (hot, cold): (Vec<_>, Vec<_>) = keyed
        .into_iter()
        .map(|(_, c)| c)
        .partition(|c| !c.cooled);
    hot.into_iter()
        .chain(cold)
        .take(batch_size)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct SortKey {
    beyond_required_depth: bool,
    neg_priority: i64,
    neg_rank: f64,
    id: i64,
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        (self.beyond_required_depth, self.neg_priority)
            .partial_cmp(&(other.beyond_required_depth, other.neg_priority))
            .map(|ord| {
                ord.then(
                    self.neg_rank
                        .partial_cmp(&other.neg_rank)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(self.id.cmp(&other.id))
            })
    }
}

fn sort_key<R: Rng>(candidate: &Candidate, config: &RankingConfig, rng: &mut R) -> SortKey {
    let beyond_required_depth = match config.max_required_depth {
        Some(required) => candidate.depth > required,
        None => false,
    };

    let points = candidate.points.unwrap_or(0);
    let neg_rank = if candidate.priority > 0 {
        // Manual enqueues are FIFO within their band; no draw.
        0.0
    } else {
        match config.offset {
            Some(offset) => -rank(points, offset, rng.gen::<f64>()),
            // No offset disables weighting: a pure uniform draw.
            None => -rng.gen::<f64>(),
        }
    };

    SortKey {
        beyond_required_depth,
        neg_priority: -candidate.priority,
        neg_rank,
        id: candidate.id,
    }
}
