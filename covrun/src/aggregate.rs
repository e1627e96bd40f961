//! Merge per-run coverage artifacts and render reports.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::error::AggregationError;
use crate::io::artifacts::remove_artifacts;
use crate::io::config::ProjectPaths;
use crate::io::coverage::{CoverageCommand, CoverageTool, include_pattern};
use crate::io::process::CommandOutput;

/// Where merged data and reports go, and which sources they cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageTargets {
    pub data_file: PathBuf,
    pub html_dir: PathBuf,
    pub xml_file: PathBuf,
    /// Comma-separated include pattern, e.g. `/p/agents/*,/p/utils/*`.
    pub include: String,
}

impl CoverageTargets {
    pub fn from_paths(paths: &ProjectPaths) -> Self {
        Self {
            data_file: paths.data_file.clone(),
            html_dir: paths.html_dir.clone(),
            xml_file: paths.xml_file.clone(),
            include: include_pattern(&paths.source_dirs),
        }
    }
}

/// What aggregation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    /// Distinct artifacts handed to the merge.
    pub merged: usize,
    /// Artifacts deleted after the merge.
    pub removed: usize,
    /// Textual summary printed by the tool.
    pub report_text: Option<String>,
    pub html_dir: Option<PathBuf>,
    pub xml_file: Option<PathBuf>,
    /// First failing report step. Later steps still ran.
    pub report_error: Option<AggregationError>,
}

fn checked(
    stage: &str,
    invoked: Result<CommandOutput>,
) -> std::result::Result<CommandOutput, AggregationError> {
    match invoked {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(AggregationError {
            stage: stage.to_string(),
            exit_code: output.exit_code,
            diagnostics: output.diagnostics(),
        }),
        Err(err) => Err(AggregationError {
            stage: stage.to_string(),
            exit_code: None,
            diagnostics: format!("{err:#}"),
        }),
    }
}

/// Merge `artifacts` into the data file, delete them, then produce the
/// textual, HTML and XML reports.
///
/// Artifacts a run never wrote (killed, crashed, never spawned) are left out
/// of the merge.
///
/// A failed merge returns the error before anything is deleted or reported.
/// Report steps are independent of each other.
#[instrument(skip_all, fields(artifacts = artifacts.len(), data_file = %targets.data_file.display()))]
pub fn aggregate_coverage<T: CoverageTool>(
    tool: &T,
    targets: &CoverageTargets,
    artifacts: &[PathBuf],
) -> std::result::Result<CoverageSummary, AggregationError> {
    let unique: Vec<PathBuf> = artifacts
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|path| {
            let written = path.is_file();
            if !written {
                debug!(artifact = %path.display(), "artifact was never written, skipping");
            }
            written
        })
        .collect();
    if unique.is_empty() {
        return Err(AggregationError {
            stage: "combine".to_string(),
            exit_code: None,
            diagnostics: "no coverage artifacts were produced".to_string(),
        });
    }

    checked(
        "combine",
        tool.invoke(
            &CoverageCommand::Combine {
                data_file: &targets.data_file,
                artifacts: &unique,
            },
            None,
        ),
    )?;
    let removed = remove_artifacts(&unique);
    info!(merged = unique.len(), removed, "coverage artifacts merged");

    let mut summary = CoverageSummary {
        merged: unique.len(),
        removed,
        ..CoverageSummary::default()
    };
    let mut record = |err: AggregationError| {
        warn!(stage = %err.stage, exit_code = ?err.exit_code, "coverage report step failed");
        if summary.report_error.is_none() {
            summary.report_error = Some(err);
        }
    };

    let data_file = targets.data_file.as_path();
    let include = targets.include.as_str();

    let report = checked(
        "report",
        tool.invoke(&CoverageCommand::Report { data_file, include }, None),
    );
    let report_text = match report {
        Ok(output) => Some(output.stdout_lossy()),
        Err(err) => {
            record(err);
            None
        }
    };

    let html = checked(
        "html",
        tool.invoke(
            &CoverageCommand::Html {
                data_file,
                include,
                out_dir: &targets.html_dir,
            },
            None,
        ),
    );
    let html_dir = match html {
        Ok(_) => Some(targets.html_dir.clone()),
        Err(err) => {
            record(err);
            None
        }
    };

    let xml = checked(
        "xml",
        tool.invoke(
            &CoverageCommand::Xml {
                data_file,
                include,
                out_file: &targets.xml_file,
            },
            None,
        ),
    );
    let xml_file = match xml {
        Ok(_) => Some(targets.xml_file.clone()),
        Err(err) => {
            record(err);
            None
        }
    };

    summary.report_text = report_text;
    summary.html_dir = html_dir;
    summary.xml_file = xml_file;
    debug!(failed = summary.report_error.is_some(), "coverage reports finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTool;
    use std::fs;
    use std::path::Path;

    fn targets(dir: &Path) -> CoverageTargets {
        CoverageTargets {
            data_file: dir.join(".coverage"),
            html_dir: dir.join("htmlcov"),
            xml_file: dir.join("coverage.xml"),
            include: "/p/agents/*,/p/utils/*".to_string(),
        }
    }

    fn write_artifacts(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, "data").expect("write artifact");
                path
            })
            .collect()
    }

    #[test]
    fn merges_deduplicated_artifacts_then_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut artifacts =
            write_artifacts(temp.path(), &[".coverage.worker-a", ".coverage.serial"]);
        artifacts.push(temp.path().join(".coverage.serial"));
        let tool = ScriptedTool::new().exit("report", 0, "TOTAL 10 2 80%\n", "");

        let summary = aggregate_coverage(&tool, &targets(temp.path()), &artifacts).expect("ok");

        assert_eq!(tool.names(), vec!["combine", "report", "html", "xml"]);
        let invocations = tool.invocations();
        let combine = &invocations[0];
        assert_eq!(combine.args.len(), 4);
        assert_eq!(combine.data_file, temp.path().join(".coverage"));
        assert_eq!(summary.merged, 2);
        assert_eq!(summary.removed, 2);
        assert_eq!(summary.report_text.as_deref(), Some("TOTAL 10 2 80%\n"));
        assert_eq!(summary.html_dir, Some(temp.path().join("htmlcov")));
        assert_eq!(summary.xml_file, Some(temp.path().join("coverage.xml")));
        assert!(summary.report_error.is_none());
        assert!(!temp.path().join(".coverage.worker-a").exists());
        assert!(!temp.path().join(".coverage.serial").exists());
    }

    #[test]
    fn merge_failure_keeps_artifacts_and_skips_reports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifacts = write_artifacts(temp.path(), &[".coverage.worker-a"]);
        let tool = ScriptedTool::new().exit("combine", 1, "", "Can't combine data\n");

        let err = aggregate_coverage(&tool, &targets(temp.path()), &artifacts).expect_err("fail");

        assert_eq!(err.stage, "combine");
        assert_eq!(err.exit_code, Some(1));
        assert_eq!(err.diagnostics, "Can't combine data");
        assert_eq!(tool.names(), vec!["combine"]);
        assert!(artifacts[0].exists());
    }

    #[test]
    fn failing_report_step_does_not_stop_later_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let artifacts = write_artifacts(temp.path(), &[".coverage.serial"]);
        let tool = ScriptedTool::new()
            .exit("html", 2, "", "html failed\n")
            .spawn_error("xml", "xml unavailable");

        let summary = aggregate_coverage(&tool, &targets(temp.path()), &artifacts).expect("ok");

        assert_eq!(tool.names(), vec!["combine", "report", "html", "xml"]);
        let first = summary.report_error.expect("report error");
        assert_eq!(first.stage, "html");
        assert_eq!(first.exit_code, Some(2));
        assert!(summary.html_dir.is_none());
        assert!(summary.xml_file.is_none());
        assert!(summary.report_text.is_some());
    }

    #[test]
    fn reports_are_repeatable_against_same_data() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = ScriptedTool::new().exit("report", 0, "TOTAL 10 2 80%\n", "");
        let first = aggregate_coverage(
            &tool,
            &targets(temp.path()),
            &write_artifacts(temp.path(), &[".coverage.worker-a"]),
        )
        .expect("first");
        let second = aggregate_coverage(
            &tool,
            &targets(temp.path()),
            &write_artifacts(temp.path(), &[".coverage.worker-a"]),
        )
        .expect("second");
        assert_eq!(first.report_text, second.report_text);

        let reports: Vec<Vec<String>> = tool
            .invocations()
            .into_iter()
            .filter(|invocation| invocation.name != "combine")
            .map(|invocation| invocation.args)
            .collect();
        assert_eq!(reports[..3], reports[3..]);
    }

    #[test]
    fn unwritten_artifact_is_left_out_of_merge() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut artifacts = write_artifacts(temp.path(), &[".coverage.worker-a"]);
        let missing = temp.path().join(".coverage.worker-killed");
        artifacts.push(missing.clone());
        let tool = ScriptedTool::new().exit("report", 0, "TOTAL 10 2 80%\n", "");

        let summary = aggregate_coverage(&tool, &targets(temp.path()), &artifacts).expect("ok");

        let invocations = tool.invocations();
        let combine = &invocations[0];
        assert_eq!(combine.name, "combine");
        let written = artifacts[0].to_string_lossy().into_owned();
        assert!(combine.args.contains(&written));
        let missing = missing.to_string_lossy().into_owned();
        assert!(!combine.args.contains(&missing));
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.report_text.as_deref(), Some("TOTAL 10 2 80%\n"));
        assert!(summary.report_error.is_none());
    }

    #[test]
    fn only_unwritten_artifacts_is_a_combine_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = ScriptedTool::new();
        let artifacts = vec![temp.path().join(".coverage.worker-killed")];

        let err = aggregate_coverage(&tool, &targets(temp.path()), &artifacts).expect_err("fail");

        assert_eq!(err.stage, "combine");
        assert_eq!(err.diagnostics, "no coverage artifacts were produced");
        assert!(tool.names().is_empty());
    }

    #[test]
    fn no_artifacts_is_a_combine_failure() {
        let tool = ScriptedTool::new();
        let err = aggregate_coverage(&tool, &targets(Path::new("/p")), &[]).expect_err("fail");
        assert_eq!(err.stage, "combine");
        assert!(tool.names().is_empty());
    }
}
