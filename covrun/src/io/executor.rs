//! Execution of a single test unit.
//!
//! The [`UnitExecutor`] trait decouples scheduling from the process backend.
//! Tests use scripted executors that return predetermined outcomes without
//! spawning processes.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::core::outcome::is_failure;
use crate::core::types::{RunResult, TestUnit};
use crate::io::coverage::{CoverageCommand, CoverageTool};

/// Runs one attempt of one unit. Implementations never fail: any problem
/// running the unit is recorded as a failing [`RunResult`].
pub trait UnitExecutor: Sync {
    fn execute(&self, unit: &TestUnit, artifact: &Path, attempt: u32) -> RunResult;
}

/// Executor that runs each unit as an isolated child process under the
/// coverage tool, appending to the given artifact.
pub struct CoverageExecutor<'a, T: CoverageTool> {
    tool: &'a T,
    failure_token: String,
    timeout: Option<Duration>,
}

impl<'a, T: CoverageTool> CoverageExecutor<'a, T> {
    pub fn new(tool: &'a T, failure_token: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            tool,
            failure_token: failure_token.into(),
            timeout,
        }
    }
}

impl<T: CoverageTool> UnitExecutor for CoverageExecutor<'_, T> {
    #[instrument(skip_all, fields(label = %unit.label, attempt, artifact = %artifact.display()))]
    fn execute(&self, unit: &TestUnit, artifact: &Path, attempt: u32) -> RunResult {
        let command = CoverageCommand::Run {
            script: &unit.path,
            artifact,
        };
        let start = Instant::now();
        let invoked = self.tool.invoke(&command, self.timeout);
        let elapsed = start.elapsed();

        let result = match invoked {
            Ok(output) => {
                let stderr = output.stderr_lossy();
                let mut stderr_text = stderr.clone();
                if output.timed_out
                    && let Some(timeout) = self.timeout
                {
                    stderr_text.push_str(&format!(
                        "\n[covrun: unit timed out after {:.3}s and was killed]\n",
                        timeout.as_secs_f64()
                    ));
                }
                RunResult {
                    unit: unit.clone(),
                    stdout: output.stdout_lossy(),
                    is_fail: output.timed_out
                        || is_failure(output.exit_code, &stderr, &self.failure_token),
                    stderr: stderr_text,
                    exit_code: output.exit_code,
                    timed_out: output.timed_out,
                    elapsed,
                    attempt,
                    artifact: artifact.to_path_buf(),
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "unit could not be executed");
                RunResult {
                    unit: unit.clone(),
                    stdout: String::new(),
                    stderr: format!("{err:#}\n"),
                    exit_code: None,
                    timed_out: false,
                    is_fail: true,
                    elapsed,
                    attempt,
                    artifact: artifact.to_path_buf(),
                }
            }
        };
        debug!(
            exit_code = ?result.exit_code,
            is_fail = result.is_fail,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "unit finished"
        );
        result
    }
}
