//! Command contract for the external coverage-instrumentation tool.
//!
//! The orchestrator depends only on the commands below, not on the tool's
//! internals. Each command names the data file it operates on; the data
//! file is handed to the child through its own environment
//! (`COVERAGE_FILE`), never through the orchestrator's process environment.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, run_command};

/// Environment variable the tool reads its data-file location from.
pub const DATA_FILE_ENV: &str = "COVERAGE_FILE";

/// One invocation of the coverage tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageCommand<'a> {
    /// Run `script` under instrumentation, appending to `artifact`.
    Run { script: &'a Path, artifact: &'a Path },
    /// Remove all data recorded in `data_file`.
    Erase { data_file: &'a Path },
    /// Merge `artifacts` into `data_file`, keeping the inputs on disk.
    Combine {
        data_file: &'a Path,
        artifacts: &'a [PathBuf],
    },
    /// Print a textual summary scoped to `include`.
    Report { data_file: &'a Path, include: &'a str },
    /// Write an HTML report tree scoped to `include` into `out_dir`.
    Html {
        data_file: &'a Path,
        include: &'a str,
        out_dir: &'a Path,
    },
    /// Write an XML report scoped to `include` to `out_file`.
    Xml {
        data_file: &'a Path,
        include: &'a str,
        out_file: &'a Path,
    },
}

impl CoverageCommand<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            CoverageCommand::Run { .. } => "run",
            CoverageCommand::Erase { .. } => "erase",
            CoverageCommand::Combine { .. } => "combine",
            CoverageCommand::Report { .. } => "report",
            CoverageCommand::Html { .. } => "html",
            CoverageCommand::Xml { .. } => "xml",
        }
    }

    /// Data file the command reads or writes.
    pub fn data_file(&self) -> &Path {
        match self {
            CoverageCommand::Run { artifact, .. } => *artifact,
            CoverageCommand::Erase { data_file }
            | CoverageCommand::Combine { data_file, .. }
            | CoverageCommand::Report { data_file, .. }
            | CoverageCommand::Html { data_file, .. }
            | CoverageCommand::Xml { data_file, .. } => *data_file,
        }
    }

    /// Arguments following the tool's program prefix.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![self.name().into()];
        match self {
            CoverageCommand::Run { script, .. } => {
                args.push("--append".into());
                args.push(script.as_os_str().to_owned());
            }
            CoverageCommand::Erase { .. } => {}
            CoverageCommand::Combine { artifacts, .. } => {
                args.push("--keep".into());
                args.extend(artifacts.iter().map(|path| path.as_os_str().to_owned()));
            }
            CoverageCommand::Report { include, .. } => {
                args.push(format!("--include={include}").into());
            }
            CoverageCommand::Html {
                include, out_dir, ..
            } => {
                args.push(format!("--include={include}").into());
                args.push("-d".into());
                args.push(out_dir.as_os_str().to_owned());
            }
            CoverageCommand::Xml {
                include, out_file, ..
            } => {
                args.push(format!("--include={include}").into());
                args.push("-o".into());
                args.push(out_file.as_os_str().to_owned());
            }
        }
        args
    }
}

/// Abstraction over the coverage tool. Tests use scripted tools that record
/// invocations without spawning processes.
pub trait CoverageTool: Sync {
    fn invoke(
        &self,
        command: &CoverageCommand<'_>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput>;
}

/// Coverage tool invoked as a command-line program.
#[derive(Debug, Clone)]
pub struct CoverageCli {
    program: Vec<String>,
    work_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CoverageCli {
    pub fn new(program: Vec<String>) -> Result<Self> {
        if program.first().is_none_or(|first| first.trim().is_empty()) {
            return Err(anyhow!("coverage command must be non-empty"));
        }
        Ok(Self {
            program,
            work_dir: None,
            env: BTreeMap::new(),
        })
    }

    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Build the child command for `command`.
    pub fn command(&self, command: &CoverageCommand<'_>) -> Command {
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]).args(command.args());
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env(DATA_FILE_ENV, command.data_file());
        cmd
    }
}

impl CoverageTool for CoverageCli {
    #[instrument(skip_all, fields(command = command.name(), data_file = %command.data_file().display()))]
    fn invoke(
        &self,
        command: &CoverageCommand<'_>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        debug!(args = ?command.args(), "invoking coverage tool");
        run_command(self.command(command), timeout)
            .with_context(|| format!("run {} {}", self.program.join(" "), command.name()))
    }
}

/// Include pattern restricting reports to the given source trees.
pub fn include_pattern(source_dirs: &[PathBuf]) -> String {
    source_dirs
        .iter()
        .map(|dir| {
            let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.clone());
            format!("{}/*", dir.display())
        })
        .collect::<Vec<_>>()
        .join(",")
}
