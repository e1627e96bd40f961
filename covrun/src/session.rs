//! Orchestration for a whole `covrun run` session.
//!
//! Checks the project layout, discovers units, runs the parallel lane then
//! the serial lane with retries, prints results as rounds complete, and
//! aggregates coverage once every run has exited.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, info_span, warn};

use crate::aggregate::{CoverageSummary, CoverageTargets, aggregate_coverage};
use crate::core::retry::LaneOutcome;
use crate::core::types::{ClassifiedUnit, Lane, RunResult, TestUnit};
use crate::error::{AggregationError, PreconditionError};
use crate::exit_codes;
use crate::io::artifacts::{ArtifactNamer, remove_stale_artifacts};
use crate::io::config::{CovrunConfig, ProjectPaths};
use crate::io::coverage::{CoverageCommand, CoverageTool};
use crate::io::discovery::{Discovered, discover};
use crate::io::executor::UnitExecutor;
use crate::report::{Reporter, Timing};
use crate::schedule::{run_parallel_lane, run_serial_lane};

/// Caller-side settings that are not part of the project config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Project root; relative config paths resolve against it.
    pub root: PathBuf,
    pub color: bool,
}

/// Everything a finished session produced.
#[derive(Debug)]
pub struct SessionOutcome {
    pub discovered: Discovered,
    pub parallel: LaneOutcome,
    pub serial: LaneOutcome,
    pub timing: Timing,
    pub coverage: Result<CoverageSummary, AggregationError>,
    pub exit_code: i32,
}

impl SessionOutcome {
    /// Units that failed every attempt, parallel lane first.
    pub fn unrecovered(&self) -> Vec<&RunResult> {
        let mut failures = self.parallel.final_failures();
        failures.extend(self.serial.final_failures());
        failures
    }
}

/// Fail unless the tests directory and every source directory exist.
pub fn check_preconditions(paths: &ProjectPaths) -> Result<(), PreconditionError> {
    let dirs = std::iter::once(("tests", &paths.tests_dir))
        .chain(paths.source_dirs.iter().map(|dir| ("source", dir)));
    for (role, dir) in dirs {
        if !dir.is_dir() {
            return Err(PreconditionError::MissingDirectory {
                role: role.to_string(),
                path: dir.clone(),
            });
        }
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

fn prepare_outputs(paths: &ProjectPaths) -> Result<()> {
    ensure_dir(&paths.html_dir)?;
    ensure_dir(&paths.artifact_dir)?;
    ensure_parent(&paths.xml_file)?;
    ensure_parent(&paths.data_file)?;
    ensure_parent(&paths.serial_artifact)?;
    Ok(())
}

/// Directories that may hold artifacts from earlier sessions.
fn artifact_dirs(paths: &ProjectPaths) -> BTreeSet<PathBuf> {
    [
        Some(paths.artifact_dir.clone()),
        paths.data_file.parent().map(Path::to_path_buf),
        paths.serial_artifact.parent().map(Path::to_path_buf),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn remove_previous_data<T: CoverageTool>(tool: &T, paths: &ProjectPaths) {
    let prefix = paths.artifact_prefix();
    let removed: usize = artifact_dirs(paths)
        .iter()
        .map(|dir| remove_stale_artifacts(dir, &prefix))
        .sum();
    info!(removed, "stale coverage artifacts removed");

    let erase = CoverageCommand::Erase {
        data_file: &paths.data_file,
    };
    match tool.invoke(&erase, None) {
        Ok(output) if output.success() => {}
        Ok(output) => warn!(
            exit_code = ?output.exit_code,
            diagnostics = %output.diagnostics(),
            "coverage erase failed"
        ),
        Err(err) => warn!(err = %format!("{err:#}"), "coverage erase failed"),
    }
}

/// Resolve paths, check the layout and discover units.
fn discover_project(root: &Path, cfg: &CovrunConfig) -> Result<(ProjectPaths, Discovered)> {
    let paths = ProjectPaths::resolve(root, cfg);
    check_preconditions(&paths)?;
    let markers = cfg.markers();
    let discovered = discover(&paths.tests_dir, &cfg.unit_pattern(), &markers);
    if discovered.is_empty() {
        return Err(PreconditionError::NoTestUnits {
            root: paths.tests_dir.clone(),
        }
        .into());
    }
    Ok((paths, discovered))
}

/// Run every non-skipped unit and aggregate coverage.
///
/// Returns `Err` only for precondition and setup failures; unit failures
/// and coverage failures are part of the outcome.
pub fn run_session<E: UnitExecutor, T: CoverageTool>(
    cfg: &CovrunConfig,
    executor: &E,
    tool: &T,
    options: &SessionOptions,
) -> Result<SessionOutcome> {
    let _span = info_span!("session", root = %options.root.display()).entered();
    let reporter = Reporter::new(options.color);
    let (paths, discovered) = discover_project(&options.root, cfg)?;
    prepare_outputs(&paths)?;
    remove_previous_data(tool, &paths);
    info!(
        parallel = discovered.parallel.len(),
        serial = discovered.serial.len(),
        skip = discovered.skip.len(),
        "session starting"
    );

    if cfg.show_skipped {
        reporter.skipped(&discovered.skip);
    }

    let parallel = run_lane_with_banner(&reporter, Lane::Parallel, &discovered.parallel, |units| {
        let namer = ArtifactNamer::new(&paths.artifact_dir, paths.artifact_prefix());
        run_parallel_lane(units, executor, cfg.pool_size(), namer, |round| {
            reporter.round(round);
        })
    });
    let serial = run_lane_with_banner(&reporter, Lane::Serial, &discovered.serial, |units| {
        run_serial_lane(units, executor, &paths.serial_artifact, |round| {
            reporter.round(round);
        })
    });

    let timing = Timing::from_lanes(&parallel, &serial);
    reporter.summary(&timing, &[&parallel, &serial]);

    let artifacts: Vec<PathBuf> = parallel
        .results()
        .chain(serial.results())
        .map(|result| result.artifact.clone())
        .collect();
    let coverage = aggregate_coverage(tool, &CoverageTargets::from_paths(&paths), &artifacts);
    reporter.coverage(&coverage);

    let exit_code = if parallel.final_failures().is_empty() && serial.final_failures().is_empty() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    };
    Ok(SessionOutcome {
        discovered,
        parallel,
        serial,
        timing,
        coverage,
        exit_code,
    })
}

fn run_lane_with_banner<F>(
    reporter: &Reporter,
    lane: Lane,
    units: &[TestUnit],
    run: F,
) -> LaneOutcome
where
    F: FnOnce(Vec<TestUnit>) -> LaneOutcome,
{
    if units.is_empty() {
        return LaneOutcome::empty(lane);
    }
    reporter.lane_started(lane);
    run(units.to_vec())
}

/// Discover and classify units without running anything.
pub fn list_units(root: &Path, cfg: &CovrunConfig) -> Result<Vec<ClassifiedUnit>> {
    let (_, discovered) = discover_project(root, cfg)?;
    Ok(discovered.classified())
}

/// Delete coverage artifacts, the merged data file and generated reports.
///
/// Returns how many of those paths existed and were removed.
pub fn clean(root: &Path, cfg: &CovrunConfig) -> Result<usize> {
    let paths = ProjectPaths::resolve(root, cfg);
    let prefix = paths.artifact_prefix();
    let mut removed: usize = artifact_dirs(&paths)
        .iter()
        .map(|dir| remove_stale_artifacts(dir, &prefix))
        .sum();
    let outputs: [(&Path, Remove); 3] = [
        (paths.data_file.as_path(), |path| fs::remove_file(path)),
        (paths.html_dir.as_path(), |path| fs::remove_dir_all(path)),
        (paths.xml_file.as_path(), |path| fs::remove_file(path)),
    ];
    for (path, remove) in outputs {
        if remove_if_exists(path, remove)? {
            removed += 1;
        }
    }
    Ok(removed)
}

type Remove = fn(&Path) -> std::io::Result<()>;

fn remove_if_exists(path: &Path, remove: Remove) -> Result<bool> {
    match remove(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
