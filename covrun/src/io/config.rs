//! Orchestrator configuration stored in `covrun.toml` at the project root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::policy::PolicyMarkers;
use crate::io::discovery::UnitPattern;

/// Default config file name, resolved against the project root.
pub const CONFIG_FILE_NAME: &str = "covrun.toml";

/// Orchestrator configuration (TOML).
///
/// Relative paths are resolved against the project root. Missing fields
/// default to the conventional `tests/`, `agents/`, `utils/` layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CovrunConfig {
    /// Directory scanned for test units.
    pub tests_dir: PathBuf,
    /// Source trees whose coverage is reported.
    pub source_dirs: Vec<PathBuf>,

    pub test_prefix: String,
    pub test_extension: String,

    pub skip_marker: String,
    pub serial_marker: String,

    /// Token that marks a run as failing when found on stderr.
    pub failure_token: String,

    /// Program (and leading args) of the coverage tool, e.g. `["coverage"]`
    /// or `["python", "-m", "coverage"]`.
    pub coverage_command: Vec<String>,

    /// Merged coverage data store.
    pub data_file: PathBuf,
    /// Artifact shared by every serial-lane run.
    pub serial_artifact: PathBuf,
    /// Directory holding per-worker parallel-lane artifacts.
    pub artifact_dir: PathBuf,
    pub html_dir: PathBuf,
    pub xml_file: PathBuf,

    /// Working directory for child processes. Defaults to the orchestrator's
    /// working directory.
    pub work_dir: Option<PathBuf>,

    /// Parallel-lane pool size. Defaults to available parallelism.
    pub jobs: Option<usize>,

    /// Kill a unit after this many seconds. Absent means no timeout.
    pub unit_timeout_secs: Option<u64>,

    /// Print the skipped-unit listing.
    pub show_skipped: bool,

    /// Extra environment passed to every child process.
    pub env: BTreeMap<String, String>,
}

impl Default for CovrunConfig {
    fn default() -> Self {
        Self {
            tests_dir: PathBuf::from("tests"),
            source_dirs: vec![PathBuf::from("agents"), PathBuf::from("utils")],
            test_prefix: "test_".to_string(),
            test_extension: "py".to_string(),
            skip_marker: "@SkipUnitTest".to_string(),
            serial_marker: "@SerialUnitTest".to_string(),
            failure_token: "FAIL".to_string(),
            coverage_command: vec!["coverage".to_string()],
            data_file: PathBuf::from("tests/.coverage"),
            serial_artifact: PathBuf::from("tests/.coverage.serial"),
            artifact_dir: PathBuf::from("tests"),
            html_dir: PathBuf::from("tests/htmlcov"),
            xml_file: PathBuf::from("tests/coverage.xml"),
            work_dir: None,
            jobs: None,
            unit_timeout_secs: None,
            show_skipped: true,
            env: BTreeMap::new(),
        }
    }
}

impl CovrunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source_dirs.is_empty() {
            return Err(anyhow!("source_dirs must be a non-empty array"));
        }
        if self.test_prefix.is_empty() {
            return Err(anyhow!("test_prefix must be non-empty"));
        }
        if self.test_extension.trim_start_matches('.').is_empty() {
            return Err(anyhow!("test_extension must be non-empty"));
        }
        if self.skip_marker.trim().is_empty() || self.serial_marker.trim().is_empty() {
            return Err(anyhow!("skip_marker and serial_marker must be non-empty"));
        }
        if self.skip_marker == self.serial_marker {
            return Err(anyhow!("skip_marker and serial_marker must differ"));
        }
        if self.coverage_command.is_empty() || self.coverage_command[0].trim().is_empty() {
            return Err(anyhow!("coverage_command must be a non-empty array"));
        }
        if self.jobs == Some(0) {
            return Err(anyhow!("jobs must be > 0"));
        }
        if self.unit_timeout_secs == Some(0) {
            return Err(anyhow!("unit_timeout_secs must be > 0"));
        }
        for key in self.env.keys() {
            if key.trim().is_empty() {
                return Err(anyhow!("env key must be non-empty"));
            }
        }
        Ok(())
    }

    pub fn markers(&self) -> PolicyMarkers {
        PolicyMarkers::new(&self.skip_marker, &self.serial_marker)
    }

    pub fn unit_pattern(&self) -> UnitPattern {
        UnitPattern::new(&self.test_prefix, &self.test_extension)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    /// Pool size for the parallel lane.
    pub fn pool_size(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
        })
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CovrunConfig::default()`.
pub fn load_config(path: &Path) -> Result<CovrunConfig> {
    if !path.exists() {
        let cfg = CovrunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CovrunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Absolute locations derived from a config and a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub tests_dir: PathBuf,
    pub source_dirs: Vec<PathBuf>,
    pub data_file: PathBuf,
    pub serial_artifact: PathBuf,
    pub artifact_dir: PathBuf,
    pub html_dir: PathBuf,
    pub xml_file: PathBuf,
}

impl ProjectPaths {
    pub fn resolve(root: &Path, cfg: &CovrunConfig) -> Self {
        let join = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            }
        };
        Self {
            root: root.to_path_buf(),
            tests_dir: join(&cfg.tests_dir),
            source_dirs: cfg.source_dirs.iter().map(|dir| join(dir)).collect(),
            data_file: join(&cfg.data_file),
            serial_artifact: join(&cfg.serial_artifact),
            artifact_dir: join(&cfg.artifact_dir),
            html_dir: join(&cfg.html_dir),
            xml_file: join(&cfg.xml_file),
        }
    }

    /// File-name prefix shared by the data file and every per-run artifact.
    pub fn artifact_prefix(&self) -> String {
        self.data_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".coverage".to_string())
    }
}
