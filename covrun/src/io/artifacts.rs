//! Coverage artifact naming and best-effort cleanup.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, warn};

const WORKER_TAG: &str = "worker";
const SUFFIX_LEN: usize = 12;

/// Generates collision-free artifact paths for parallel-lane runs.
///
/// Concurrent workers never share an artifact file; uniqueness of the name is
/// what makes concurrent writes safe.
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    dir: PathBuf,
    prefix: String,
}

impl ArtifactNamer {
    /// `prefix` is the data file's name, e.g. `.coverage`, so the tool's
    /// combine step and stale-artifact cleanup both recognize the files.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// `<dir>/<prefix>.worker-<random suffix>`
    pub fn next(&self) -> PathBuf {
        self.dir.join(format!(
            "{}.{WORKER_TAG}-{}",
            self.prefix,
            random_suffix()
        ))
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(SUFFIX_LEN)
        .collect::<String>()
        .to_lowercase()
}

/// Delete files in `dir` named `prefix` or `prefix.*`, left behind by an
/// earlier run. Returns how many were removed. Failures are logged only.
pub fn remove_stale_artifacts(dir: &Path, prefix: &str) -> usize {
    let dotted = format!("{prefix}.");
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), err = %err, "cannot list artifact directory");
            return 0;
        }
    };
    let stale: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name == prefix || name.starts_with(&dotted)
        })
        .map(|entry| entry.path())
        .collect();
    remove_artifacts(&stale)
}

/// Delete each artifact, logging failures. A file that is already gone counts
/// as removed. Returns how many were removed.
pub fn remove_artifacts(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => removed += 1,
            Err(err) => {
                warn!(path = %path.display(), err = %err, "failed to delete coverage artifact");
            }
        }
    }
    debug!(removed, total = paths.len(), "artifact cleanup finished");
    removed
}
