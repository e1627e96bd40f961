//! Console rendering of round results, failure details and timing.
//!
//! Formatting functions are pure and return strings; [`Reporter`] only
//! decides where they are printed. Nothing here re-runs or mutates results.

use std::fmt::Write as _;
use std::time::Duration;

use colored::{Color, Colorize};

use crate::aggregate::CoverageSummary;
use crate::core::retry::{LaneOutcome, Round};
use crate::core::types::{Lane, RunResult, TestUnit};
use crate::error::AggregationError;

const BANNER: &str = "================";
const RULE: &str = "----------------";

fn paint(text: &str, color: Color, enabled: bool) -> String {
    if enabled {
        text.color(color).to_string()
    } else {
        text.to_string()
    }
}

/// `✅ [OK]   <label>` or `❌ [FAIL] <label>`, with ` (retry N)` on retries.
pub fn result_label(result: &RunResult) -> String {
    let mut label = if result.is_fail {
        format!("❌ [FAIL] {}", result.unit.label)
    } else {
        format!("✅ [OK]   {}", result.unit.label)
    };
    if result.attempt > 1 {
        let _ = write!(label, " (retry {})", result.attempt);
    }
    label
}

/// Elapsed time with millisecond precision, e.g. `0.042s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// One line per result, in the round's (label) order, with the time column
/// aligned to the longest label.
pub fn format_round(round: &Round, color: bool) -> String {
    let labels: Vec<String> = round.results.iter().map(result_label).collect();
    let width = labels
        .iter()
        .map(|label| label.chars().count())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (result, label) in round.results.iter().zip(&labels) {
        let pad = " ".repeat(width - label.chars().count());
        let line = format!("{label}{pad} {:>8}", format_elapsed(result.elapsed));
        let tint = if result.is_fail {
            Color::Red
        } else {
            Color::Green
        };
        out.push_str(&paint(&line, tint, color));
        out.push('\n');
    }
    out
}

/// Full diagnostics for every failing result of a round.
pub fn format_failure_details(failures: &[&RunResult], color: bool) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n========== Failure details ==========\n");
    for result in failures {
        let attempt = if result.attempt > 1 {
            format!(" (attempt {})", result.attempt)
        } else {
            String::new()
        };
        let heading = format!("{RULE} ⚠️ {}{attempt} {RULE}", result.unit.label);
        let _ = writeln!(out, "\n{}", paint(&heading, Color::Red, color));
        if !result.stdout.is_empty() {
            out.push_str(&result.stdout);
            if !result.stdout.ends_with('\n') {
                out.push('\n');
            }
        }
        if !result.stderr.is_empty() {
            out.push_str("stderr:\n");
            out.push_str(&result.stderr);
            if !result.stderr.ends_with('\n') {
                out.push('\n');
            }
        }
        match result.exit_code {
            Some(code) => {
                let _ = writeln!(out, "exit code: {code}");
            }
            None => out.push_str("exit code: none (terminated by signal)\n"),
        }
    }
    out
}

pub fn format_banner(title: &str) -> String {
    format!("\n{BANNER} {title} {BANNER}\n")
}

pub fn format_retry_banner(attempt: u32) -> String {
    format!("\n{RULE}  Retry round {attempt}  {RULE}\n")
}

/// Listing of units that were never executed.
pub fn format_skipped(units: &[TestUnit]) -> String {
    if units.is_empty() {
        return String::new();
    }
    let mut out = format_banner("Skipped tests");
    for unit in units {
        let _ = writeln!(out, "⏭️  skipped: {}", unit.label);
    }
    out
}

/// Wall-clock totals for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub parallel: Duration,
    pub serial: Duration,
    /// Time spent in retry rounds, across both lanes.
    pub retry: Duration,
}

impl Timing {
    pub fn from_lanes(parallel: &LaneOutcome, serial: &LaneOutcome) -> Self {
        Self {
            parallel: parallel.elapsed,
            serial: serial.elapsed,
            retry: parallel.retry_elapsed() + serial.retry_elapsed(),
        }
    }

    pub fn total(&self) -> Duration {
        self.parallel + self.serial
    }
}

pub fn format_timing(timing: &Timing) -> String {
    let mut out = format_banner("Timing");
    let _ = writeln!(out, "parallel tests: {}", format_elapsed(timing.parallel));
    let _ = writeln!(out, "serial tests:   {}", format_elapsed(timing.serial));
    let _ = writeln!(out, "retries:        {}", format_elapsed(timing.retry));
    let _ = writeln!(out, "total:          {}", format_elapsed(timing.total()));
    out
}

/// Labels of units that failed every attempt, per lane.
pub fn format_final_failures(lanes: &[&LaneOutcome], color: bool) -> String {
    let mut out = String::new();
    for lane in lanes {
        for result in lane.final_failures() {
            let line = format!(
                "❌ {} ({} lane, failed {} attempts)",
                result.unit.label, lane.lane, result.attempt
            );
            let _ = writeln!(out, "{}", paint(&line, Color::Red, color));
        }
    }
    if out.is_empty() {
        return out;
    }
    format!("{}{out}", format_banner("Unrecovered failures"))
}

/// Prints product output. Tracing is separate and goes to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    color: bool,
}

impl Reporter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn lane_started(&self, lane: Lane) {
        print!("{}", format_banner(lane.title()));
    }

    /// Print a round's result lines followed by details of its failures.
    pub fn round(&self, round: &Round) {
        if round.attempt > 1 {
            print!("{}", format_retry_banner(round.attempt));
        }
        print!("{}", format_round(round, self.color));
        let failures: Vec<&RunResult> = round.failures().collect();
        print!("{}", format_failure_details(&failures, self.color));
    }

    pub fn skipped(&self, units: &[TestUnit]) {
        print!("{}", format_skipped(units));
    }

    pub fn summary(&self, timing: &Timing, lanes: &[&LaneOutcome]) {
        print!("{}", format_timing(timing));
        print!("{}", format_final_failures(lanes, self.color));
    }

    /// Coverage text summary, report locations and any aggregation error.
    pub fn coverage(&self, coverage: &Result<CoverageSummary, AggregationError>) {
        let summary = match coverage {
            Ok(summary) => summary,
            Err(err) => {
                self.error(&err.to_string());
                return;
            }
        };
        print!("{}", format_banner("Coverage"));
        if let Some(text) = summary.report_text.as_deref().filter(|text| !text.is_empty()) {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
        if let Some(err) = &summary.report_error {
            self.error(&err.to_string());
        }
        if let Some(dir) = &summary.html_dir {
            self.notice(&format!("HTML report written to {}", dir.display()));
        }
        if let Some(file) = &summary.xml_file {
            self.notice(&format!("XML report written to {}", file.display()));
        }
    }

    pub fn notice(&self, message: &str) {
        println!("{}", paint(message, Color::Green, self.color));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", paint(message, Color::Red, self.color));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn result(label: &str, attempt: u32, is_fail: bool, millis: u64) -> RunResult {
        RunResult {
            unit: TestUnit::new(format!("/p/tests/{label}"), label),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(if is_fail { 1 } else { 0 }),
            timed_out: false,
            is_fail,
            elapsed: Duration::from_millis(millis),
            attempt,
            artifact: PathBuf::from("/p/tests/.coverage.serial"),
        }
    }

    #[test]
    fn labels_mark_outcome_and_retry() {
        assert_eq!(result_label(&result("a.py", 1, false, 0)), "✅ [OK]   a.py");
        assert_eq!(
            result_label(&result("a.py", 2, true, 0)),
            "❌ [FAIL] a.py (retry 2)"
        );
    }

    #[test]
    fn round_lines_are_aligned_and_sorted() {
        let round = Round::new(
            1,
            vec![
                result("utils/test_long_name.py", 1, true, 1500),
                result("a.py", 1, false, 42),
            ],
            Duration::ZERO,
        );
        let text = format_round(&round, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("✅ [OK]   a.py"));
        assert!(lines[0].ends_with("  0.042s"));
        assert!(lines[1].starts_with("❌ [FAIL] utils/test_long_name.py"));
        assert!(lines[1].ends_with("  1.500s"));
        assert_eq!(lines[0].chars().count(), lines[1].chars().count());
    }

    #[test]
    fn failure_details_include_streams_and_exit_code() {
        let mut failed = result("utils/test_utils_demo.py", 3, true, 5);
        failed.stdout = "Ran 2 tests\n".to_string();
        failed.stderr = "ZeroDivisionError: division by zero".to_string();
        let text = format_failure_details(&[&failed], false);
        assert!(text.contains("⚠️ utils/test_utils_demo.py (attempt 3)"));
        assert!(text.contains("Ran 2 tests\n"));
        assert!(text.contains("stderr:\nZeroDivisionError: division by zero\n"));
        assert!(text.contains("exit code: 1"));
    }

    #[test]
    fn first_attempt_details_omit_attempt_number() {
        let failed = result("a.py", 1, true, 5);
        let text = format_failure_details(&[&failed], false);
        assert!(text.contains("⚠️ a.py "));
        assert!(!text.contains("(attempt"));
        assert!(!text.contains("stderr:"));
        assert_eq!(format_failure_details(&[], false), "");
    }

    #[test]
    fn signal_exit_is_reported() {
        let mut failed = result("a.py", 1, true, 5);
        failed.exit_code = None;
        let text = format_failure_details(&[&failed], false);
        assert!(text.contains("exit code: none"));
    }

    #[test]
    fn colored_output_wraps_lines_in_escape_codes() {
        colored::control::set_override(true);
        let round = Round::new(1, vec![result("a.py", 1, true, 1)], Duration::ZERO);
        let text = format_round(&round, true);
        assert!(text.contains("\u{1b}["));
        assert!(!format_round(&round, false).contains("\u{1b}["));
    }

    #[test]
    fn skipped_listing_names_each_unit() {
        let text = format_skipped(&[
            TestUnit::new("/p/tests/a.py", "a.py"),
            TestUnit::new("/p/tests/b.py", "b.py"),
        ]);
        assert!(text.contains("Skipped tests"));
        assert!(text.contains("⏭️  skipped: a.py\n"));
        assert!(text.contains("⏭️  skipped: b.py\n"));
        assert_eq!(format_skipped(&[]), "");
    }

    #[test]
    fn timing_total_is_sum_of_lanes() {
        let timing = Timing {
            parallel: Duration::from_millis(1250),
            serial: Duration::from_millis(750),
            retry: Duration::from_millis(300),
        };
        assert_eq!(timing.total(), Duration::from_secs(2));
        let text = format_timing(&timing);
        assert!(text.contains("parallel tests: 1.250s"));
        assert!(text.contains("serial tests:   0.750s"));
        assert!(text.contains("retries:        0.300s"));
        assert!(text.contains("total:          2.000s"));
    }

    #[test]
    fn final_failures_list_only_unrecovered_units() {
        let lane = LaneOutcome {
            lane: Lane::Parallel,
            rounds: vec![
                Round::new(
                    1,
                    vec![result("b.py", 1, true, 1), result("c.py", 1, true, 1)],
                    Duration::ZERO,
                ),
                Round::new(
                    2,
                    vec![result("b.py", 2, false, 1), result("c.py", 2, true, 1)],
                    Duration::ZERO,
                ),
                Round::new(3, vec![result("c.py", 3, true, 1)], Duration::ZERO),
            ],
            elapsed: Duration::ZERO,
        };
        let text = format_final_failures(&[&lane], false);
        assert!(text.contains("❌ c.py (parallel lane, failed 3 attempts)"));
        assert!(!text.contains("b.py"));
        assert_eq!(
            format_final_failures(&[&LaneOutcome::empty(Lane::Serial)], false),
            ""
        );
    }
}
