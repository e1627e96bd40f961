//! Test-only helpers: scripted executors, a scripted coverage tool, and a
//! temporary project layout.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::types::{RunResult, TestUnit};
use crate::io::coverage::{CoverageCommand, CoverageTool};
use crate::io::executor::UnitExecutor;
use crate::io::process::CommandOutput;

/// Create a unit whose absolute path is `/project/tests/<label>`.
pub fn unit(label: &str) -> TestUnit {
    TestUnit::new(PathBuf::from("/project/tests").join(label), label)
}

/// Executor returning scripted pass/fail outcomes per label.
///
/// Each call for a label consumes the next scripted outcome; once the script
/// is exhausted the last outcome repeats. Unscripted labels pass.
///
/// Every execution appends a line to its artifact when the artifact's
/// directory exists, like a coverage run saving its data.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Vec<bool>>,
    delays: HashMap<String, Duration>,
    unwritten: HashSet<String>,
    calls: Mutex<Vec<(String, u32)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script outcomes for `label`: `true` passes, `false` fails.
    pub fn script(mut self, label: &str, passes: &[bool]) -> Self {
        self.scripts.insert(label.to_string(), passes.to_vec());
        self
    }

    /// Sleep `millis` inside every execution of `label`.
    pub fn delay(mut self, label: &str, millis: u64) -> Self {
        self.delays
            .insert(label.to_string(), Duration::from_millis(millis));
        self
    }

    /// Executions of `label` never write their artifact, like a run that
    /// crashed before coverage saved its data.
    pub fn without_artifact(mut self, label: &str) -> Self {
        self.unwritten.insert(label.to_string());
        self
    }

    /// Labels in the order executions started.
    pub fn call_order(&self) -> Vec<String> {
        self.lock_calls()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }

    pub fn calls_for(&self, label: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|(called, _)| called == label)
            .count()
    }

    /// Highest number of executions observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<(String, u32)>> {
        self.calls.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn next_pass(&self, label: &str, attempt: u32) -> bool {
        let index = {
            let mut calls = self.lock_calls();
            let index = calls.iter().filter(|(called, _)| called == label).count();
            calls.push((label.to_string(), attempt));
            index
        };
        match self.scripts.get(label) {
            Some(script) if !script.is_empty() => script[index.min(script.len() - 1)],
            _ => true,
        }
    }

    fn write_artifact(&self, label: &str, artifact: &Path) {
        if self.unwritten.contains(label) || !artifact.parent().is_some_and(Path::is_dir) {
            return;
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(artifact) {
            let _ = writeln!(file, "{label}");
        }
    }
}

impl UnitExecutor for ScriptedExecutor {
    fn execute(&self, unit: &TestUnit, artifact: &Path, attempt: u32) -> RunResult {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let passed = self.next_pass(&unit.label, attempt);
        let delay = self.delays.get(&unit.label).copied().unwrap_or_default();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.write_artifact(&unit.label, artifact);
        self.running.fetch_sub(1, Ordering::SeqCst);

        RunResult {
            unit: unit.clone(),
            stdout: format!("{} attempt {attempt}\n", unit.label),
            stderr: if passed {
                "OK\n".to_string()
            } else {
                "FAIL: scripted failure\n".to_string()
            },
            exit_code: Some(if passed { 0 } else { 1 }),
            timed_out: false,
            is_fail: !passed,
            elapsed: delay,
            attempt,
            artifact: artifact.to_path_buf(),
        }
    }
}

/// One recorded coverage-tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    pub args: Vec<String>,
    pub data_file: PathBuf,
}

/// Coverage tool that records invocations and returns scripted results per
/// command name (`"combine"`, `"report"`, ...). Unscripted commands succeed
/// with empty output.
///
/// A scripted result is either an exit `(code, stdout, stderr)` or a spawn
/// error message.
#[derive(Default)]
pub struct ScriptedTool {
    results: BTreeMap<String, std::result::Result<(i32, String, String), String>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit(mut self, command: &str, code: i32, stdout: &str, stderr: &str) -> Self {
        self.results.insert(
            command.to_string(),
            Ok((code, stdout.to_string(), stderr.to_string())),
        );
        self
    }

    pub fn spawn_error(mut self, command: &str, message: &str) -> Self {
        self.results
            .insert(command.to_string(), Err(message.to_string()));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Names of invoked commands, in order.
    pub fn names(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|invocation| invocation.name)
            .collect()
    }
}

impl CoverageTool for ScriptedTool {
    fn invoke(
        &self,
        command: &CoverageCommand<'_>,
        _timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.invocations
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(Invocation {
                name: command.name().to_string(),
                args: command
                    .args()
                    .into_iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
                data_file: command.data_file().to_path_buf(),
            });
        let (code, stdout, stderr) = match self.results.get(command.name()) {
            Some(Err(message)) => return Err(anyhow!("{message}")),
            Some(Ok((code, stdout, stderr))) => (*code, stdout.as_str(), stderr.as_str()),
            None => (0, "", ""),
        };
        Ok(CommandOutput {
            exit_code: Some(code),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            timed_out: false,
            elapsed: Duration::ZERO,
        })
    }
}

/// Temporary project with `tests/`, `agents/` and `utils/` directories.
pub struct TestProject {
    temp: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        for dir in ["tests", "agents", "utils"] {
            fs::create_dir_all(temp.path().join(dir))?;
        }
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write `contents` to `tests/<label>`, creating parent directories.
    pub fn add_test(&self, label: &str, contents: &str) -> Result<PathBuf> {
        self.write(&Path::new("tests").join(label), contents)
    }

    pub fn write(&self, rel: &Path, contents: &str) -> Result<PathBuf> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }
}
