//! Round bookkeeping for the per-lane retry protocol.
//!
//! A lane runs at most [`MAX_ATTEMPTS`] rounds. Round `k + 1` contains exactly
//! the units whose round-`k` result failed; a lane stops early once a round
//! has no failures.

use std::time::Duration;

use crate::core::types::{Lane, RunResult, TestUnit};

/// Attempts per unit, including the first run.
pub const MAX_ATTEMPTS: u32 = 3;

/// All results of one round, sorted by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub attempt: u32,
    pub results: Vec<RunResult>,
    pub elapsed: Duration,
}

impl Round {
    /// Build a round, re-sorting results by label so output does not depend on
    /// completion order.
    pub fn new(attempt: u32, mut results: Vec<RunResult>, elapsed: Duration) -> Self {
        results.sort_by(|left, right| left.unit.label.cmp(&right.unit.label));
        Self {
            attempt,
            results,
            elapsed,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &RunResult> {
        self.results.iter().filter(|result| result.is_fail)
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|result| result.is_fail)
    }
}

/// Units to resubmit after `round`, or `None` when the lane is finished.
pub fn retry_candidates(round: &Round) -> Option<Vec<TestUnit>> {
    if round.attempt >= MAX_ATTEMPTS {
        return None;
    }
    let units: Vec<TestUnit> = round.failures().map(|result| result.unit.clone()).collect();
    if units.is_empty() { None } else { Some(units) }
}

/// Every round a lane executed, in attempt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneOutcome {
    pub lane: Lane,
    pub rounds: Vec<Round>,
    /// Wall-clock time of the whole lane.
    pub elapsed: Duration,
}

impl LaneOutcome {
    pub fn empty(lane: Lane) -> Self {
        Self {
            lane,
            rounds: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// All results across all rounds, round 1 first.
    pub fn results(&self) -> impl Iterator<Item = &RunResult> {
        self.rounds.iter().flat_map(|round| round.results.iter())
    }

    /// Results for one unit label, in attempt order.
    pub fn results_for<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a RunResult> + 'a {
        self.results().filter(move |result| result.unit.label == label)
    }

    /// Units still failing after the last round the lane ran.
    pub fn final_failures(&self) -> Vec<&RunResult> {
        self.rounds
            .last()
            .map(|round| round.failures().collect())
            .unwrap_or_default()
    }

    /// Time spent in retry rounds (attempt 2 onward).
    pub fn retry_elapsed(&self) -> Duration {
        self.rounds
            .iter()
            .filter(|round| round.attempt > 1)
            .map(|round| round.elapsed)
            .sum()
    }

    /// Number of distinct units executed in round 1.
    pub fn unit_count(&self) -> usize {
        self.rounds.first().map_or(0, |round| round.results.len())
    }
}
