//! Lane scheduling with bounded retries.
//!
//! Each lane runs up to [`MAX_ATTEMPTS`](crate::core::retry::MAX_ATTEMPTS)
//! rounds. A round is a barrier: every submitted unit finishes before the
//! failures that feed the next round are computed.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::core::retry::{LaneOutcome, Round, retry_candidates};
use crate::core::types::{Lane, RunResult, TestUnit};
use crate::io::artifacts::ArtifactNamer;
use crate::io::executor::UnitExecutor;

/// Run one parallel round on a fresh pool of at most `jobs` workers, each
/// run writing its own uniquely named artifact. Results arrive in completion
/// order.
fn parallel_round<E: UnitExecutor>(
    executor: &E,
    jobs: usize,
    namer: &ArtifactNamer,
    units: &[TestUnit],
    attempt: u32,
) -> Vec<RunResult> {
    let run_one = |unit: &TestUnit| executor.execute(unit, &namer.next(), attempt);
    let threads = jobs.min(units.len()).max(1);
    // Dropping the pool at the end of the round joins its threads.
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|index| format!("covrun-worker-{index}"))
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            warn!("failed to create worker pool ({err}), running round sequentially");
            return units.iter().map(run_one).collect();
        }
    };

    let (tx, rx) = mpsc::channel();
    pool.scope(|scope| {
        for unit in units {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = run_one(unit);
                debug!(label = %result.unit.label, is_fail = result.is_fail, "worker finished");
                tx.send(result).ok();
            });
        }
    });
    drop(tx);
    rx.into_iter().collect()
}

/// Drive the retry protocol for one lane.
///
/// `run_round` runs every unit once with the given attempt number, in any
/// order. `on_round` sees each round (sorted by label) as soon as it
/// completes.
pub fn run_lane<R, F>(lane: Lane, units: Vec<TestUnit>, run_round: R, mut on_round: F) -> LaneOutcome
where
    R: Fn(&[TestUnit], u32) -> Vec<RunResult>,
    F: FnMut(&Round),
{
    let _span = info_span!("lane", %lane).entered();
    if units.is_empty() {
        return LaneOutcome::empty(lane);
    }

    let lane_start = Instant::now();
    let mut rounds = Vec::new();
    let mut pending = units;
    let mut attempt = 1;
    loop {
        let _round_span = info_span!("round", attempt, units = pending.len()).entered();
        let start = Instant::now();
        let results = run_round(&pending, attempt);
        let round = Round::new(attempt, results, start.elapsed());
        info!(
            failures = round.failures().count(),
            elapsed_ms = round.elapsed.as_millis() as u64,
            "round complete"
        );
        on_round(&round);

        let next = retry_candidates(&round);
        rounds.push(round);
        match next {
            Some(failed) => {
                pending = failed;
                attempt += 1;
            }
            None => break,
        }
    }

    LaneOutcome {
        lane,
        rounds,
        elapsed: lane_start.elapsed(),
    }
}

/// Run the parallel lane on a pool of `jobs` workers.
pub fn run_parallel_lane<E: UnitExecutor, F: FnMut(&Round)>(
    units: Vec<TestUnit>,
    executor: &E,
    jobs: usize,
    namer: ArtifactNamer,
    on_round: F,
) -> LaneOutcome {
    let jobs = jobs.max(1);
    run_lane(
        Lane::Parallel,
        units,
        |pending, attempt| parallel_round(executor, jobs, &namer, pending, attempt),
        on_round,
    )
}

/// Run the serial lane one unit at a time in submission order, sharing
/// `artifact` across every run.
pub fn run_serial_lane<E: UnitExecutor, F: FnMut(&Round)>(
    units: Vec<TestUnit>,
    executor: &E,
    artifact: impl Into<PathBuf>,
    on_round: F,
) -> LaneOutcome {
    let artifact = artifact.into();
    run_lane(
        Lane::Serial,
        units,
        |pending, attempt| {
            pending
                .iter()
                .map(|unit| executor.execute(unit, &artifact, attempt))
                .collect()
        },
        on_round,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::MAX_ATTEMPTS;
    use crate::test_support::{ScriptedExecutor, unit};
    use std::collections::HashSet;
    use std::path::Path;

    fn namer(dir: &Path) -> ArtifactNamer {
        ArtifactNamer::new(dir, ".coverage")
    }

    #[test]
    fn flaky_and_broken_units_follow_retry_protocol() {
        let executor = ScriptedExecutor::new()
            .script("a.py", &[true])
            .script("b.py", &[false, true])
            .script("c.py", &[false, false, false]);
        let mut printed = Vec::new();

        let outcome = run_parallel_lane(
            vec![unit("c.py"), unit("a.py"), unit("b.py")],
            &executor,
            4,
            namer(Path::new("/p/tests")),
            |round| printed.push(round.attempt),
        );

        assert_eq!(printed, vec![1, 2, 3]);
        let attempts = |label| {
            outcome
                .results_for(label)
                .map(|result| (result.attempt, result.is_fail))
                .collect::<Vec<_>>()
        };
        assert_eq!(attempts("a.py"), vec![(1, false)]);
        assert_eq!(attempts("b.py"), vec![(1, true), (2, false)]);
        assert_eq!(attempts("c.py"), vec![(1, true), (2, true), (3, true)]);

        let finals: Vec<(&str, u32)> = outcome
            .final_failures()
            .into_iter()
            .map(|result| (result.label(), result.attempt))
            .collect();
        assert_eq!(finals, vec![("c.py", MAX_ATTEMPTS)]);
    }

    #[test]
    fn lane_stops_after_first_clean_round() {
        let executor = ScriptedExecutor::new()
            .script("a.py", &[false, true])
            .script("b.py", &[true]);
        let outcome = run_serial_lane(
            vec![unit("a.py"), unit("b.py")],
            &executor,
            "/p/tests/.coverage.serial",
            |_| {},
        );
        assert_eq!(outcome.rounds.len(), 2);
        assert_eq!(outcome.rounds[1].results.len(), 1);
        assert!(outcome.final_failures().is_empty());
        assert_eq!(executor.calls_for("a.py"), 2);
        assert_eq!(executor.calls_for("b.py"), 1);
    }

    #[test]
    fn parallel_runs_get_distinct_artifacts() {
        let executor = ScriptedExecutor::new()
            .script("a.py", &[false, false, true])
            .script("b.py", &[false, true]);
        let outcome = run_parallel_lane(
            vec![unit("a.py"), unit("b.py")],
            &executor,
            2,
            namer(Path::new("/p/tests")),
            |_| {},
        );
        let artifacts: Vec<&Path> = outcome
            .results()
            .map(|result| result.artifact.as_path())
            .collect();
        let unique: HashSet<&Path> = artifacts.iter().copied().collect();
        assert_eq!(artifacts.len(), 5);
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn serial_runs_share_one_artifact_in_submission_order() {
        let executor = ScriptedExecutor::new();
        let outcome = run_serial_lane(
            vec![unit("z.py"), unit("a.py"), unit("m.py")],
            &executor,
            "/p/tests/.coverage.serial",
            |_| {},
        );
        assert_eq!(executor.call_order(), vec!["z.py", "a.py", "m.py"]);
        assert!(
            outcome
                .results()
                .all(|result| result.artifact == Path::new("/p/tests/.coverage.serial"))
        );
        // Rounds are reported sorted regardless of execution order.
        let labels: Vec<&str> = outcome.rounds[0].results.iter().map(RunResult::label).collect();
        assert_eq!(labels, vec!["a.py", "m.py", "z.py"]);
    }

    #[test]
    fn report_order_is_independent_of_completion_order() {
        // Earlier labels take longer, so they complete last.
        let executor = ScriptedExecutor::new()
            .delay("a.py", 60)
            .delay("b.py", 30)
            .delay("c.py", 0);
        let outcome = run_parallel_lane(
            vec![unit("a.py"), unit("b.py"), unit("c.py")],
            &executor,
            3,
            namer(Path::new("/p/tests")),
            |_| {},
        );
        let labels: Vec<&str> = outcome.rounds[0].results.iter().map(RunResult::label).collect();
        assert_eq!(labels, vec!["a.py", "b.py", "c.py"]);
    }

    #[test]
    fn empty_lane_runs_nothing() {
        let executor = ScriptedExecutor::new();
        let mut called = false;
        let outcome = run_parallel_lane(
            Vec::new(),
            &executor,
            2,
            namer(Path::new("/p")),
            |_| called = true,
        );
        assert!(!called);
        assert!(outcome.rounds.is_empty());
        assert_eq!(executor.call_order().len(), 0);
    }

    #[test]
    fn pool_is_bounded_by_jobs() {
        let executor = ScriptedExecutor::new()
            .delay("a.py", 40)
            .delay("b.py", 40)
            .delay("c.py", 40)
            .delay("d.py", 40);
        run_parallel_lane(
            vec![unit("a.py"), unit("b.py"), unit("c.py"), unit("d.py")],
            &executor,
            2,
            namer(Path::new("/p")),
            |_| {},
        );
        assert!(executor.max_concurrency() <= 2);
    }
}
