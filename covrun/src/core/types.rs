//! Shared deterministic types for the orchestration core.
//!
//! These types carry no I/O. A [`TestUnit`] is fixed at discovery time and a
//! [`RunResult`] is fixed once the execution that produced it returns.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution discipline assigned to a test unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Never executed; listed by label only.
    Skip,
    /// Executed one at a time in the serial lane.
    Serial,
    /// Executed concurrently in the parallel lane.
    #[default]
    Parallel,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Skip => "skip",
            Policy::Serial => "serial",
            Policy::Parallel => "parallel",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution track with its own retry rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Parallel,
    Serial,
}

impl Lane {
    pub fn title(self) -> &'static str {
        match self {
            Lane::Parallel => "Parallel tests",
            Lane::Serial => "Serial tests",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Parallel => f.write_str("parallel"),
            Lane::Serial => f.write_str("serial"),
        }
    }
}

/// One discovered test file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestUnit {
    /// Path relative to the test root, `/`-separated.
    pub label: String,
    /// Absolute path to the file.
    pub path: PathBuf,
}

impl TestUnit {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// A test unit paired with the policy it was classified under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedUnit {
    pub unit: TestUnit,
    pub policy: Policy,
}

/// Outcome of one execution attempt of one test unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub unit: TestUnit,
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; `None` when the child was terminated by a signal
    /// or never started.
    pub exit_code: Option<i32>,
    /// The child was killed after exceeding the configured unit timeout.
    pub timed_out: bool,
    pub is_fail: bool,
    pub elapsed: Duration,
    /// 1-indexed round that produced this result.
    pub attempt: u32,
    /// Coverage artifact this run appended to.
    pub artifact: PathBuf,
}

impl RunResult {
    pub fn label(&self) -> &str {
        &self.unit.label
    }
}
