//! Test-unit discovery and classification.
//!
//! Walks the test root for files named `<prefix>*.<ext>` and classifies each
//! one by reading its source. Traversal and read errors never abort: an
//! unreadable subtree contributes no units and an unreadable file is treated
//! as carrying no markers.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::path::relative_label;
use crate::core::policy::{PolicyMarkers, classify_source};
use crate::core::types::{ClassifiedUnit, Policy, TestUnit};

/// File-name convention for test units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPattern {
    prefix: String,
    extension: String,
}

impl UnitPattern {
    pub fn new(prefix: &str, extension: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        name.starts_with(&self.prefix)
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == self.extension)
    }
}

/// Find absolute paths of every test unit under `root`, recursively.
///
/// Order is unspecified. Returns an empty list if `root` cannot be traversed;
/// callers check that `root` exists beforehand.
pub fn find_test_units(root: &Path, pattern: &UnitPattern) -> Vec<PathBuf> {
    let root = absolute(root);
    WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(err = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && pattern.matches(entry.path()))
        .map(|entry| entry.into_path())
        .collect()
}

/// Classify a unit by reading its source. Read failures classify as
/// `Parallel`.
pub fn classify_file(path: &Path, markers: &PolicyMarkers) -> Policy {
    match fs::read(path) {
        Ok(bytes) => classify_source(&String::from_utf8_lossy(&bytes), markers),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "cannot read test source, defaulting to parallel");
            Policy::Parallel
        }
    }
}

/// Discovered units partitioned by policy, each partition sorted by label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub skip: Vec<TestUnit>,
    pub serial: Vec<TestUnit>,
    pub parallel: Vec<TestUnit>,
}

impl Discovered {
    pub fn is_empty(&self) -> bool {
        self.skip.is_empty() && self.serial.is_empty() && self.parallel.is_empty()
    }

    pub fn total(&self) -> usize {
        self.skip.len() + self.serial.len() + self.parallel.len()
    }

    /// Every unit with its policy, sorted by label.
    pub fn classified(&self) -> Vec<ClassifiedUnit> {
        let mut all: Vec<ClassifiedUnit> = self
            .skip
            .iter()
            .map(|unit| (unit, Policy::Skip))
            .chain(self.serial.iter().map(|unit| (unit, Policy::Serial)))
            .chain(self.parallel.iter().map(|unit| (unit, Policy::Parallel)))
            .map(|(unit, policy)| ClassifiedUnit {
                unit: unit.clone(),
                policy,
            })
            .collect();
        all.sort_by(|left, right| left.unit.label.cmp(&right.unit.label));
        all
    }
}

/// Find, label and classify every unit under `root`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn discover(root: &Path, pattern: &UnitPattern, markers: &PolicyMarkers) -> Discovered {
    let root = absolute(root);
    let mut discovered = Discovered::default();
    for path in find_test_units(&root, pattern) {
        let unit = TestUnit::new(&path, relative_label(&root, &path));
        match classify_file(&path, markers) {
            Policy::Skip => discovered.skip.push(unit),
            Policy::Serial => discovered.serial.push(unit),
            Policy::Parallel => discovered.parallel.push(unit),
        }
    }
    for units in [
        &mut discovered.skip,
        &mut discovered.serial,
        &mut discovered.parallel,
    ] {
        units.sort();
    }
    debug!(
        skip = discovered.skip.len(),
        serial = discovered.serial.len(),
        parallel = discovered.parallel.len(),
        "classified test units"
    );
    discovered
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> PolicyMarkers {
        PolicyMarkers::new("@SkipUnitTest", "@SerialUnitTest")
    }

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, contents).expect("write");
        path
    }

    #[test]
    fn pattern_requires_prefix_and_extension() {
        let pattern = UnitPattern::new("test_", ".py");
        assert!(pattern.matches(Path::new("/t/test_demo.py")));
        assert!(!pattern.matches(Path::new("/t/demo_test.py")));
        assert!(!pattern.matches(Path::new("/t/test_demo.pyc")));
        assert!(!pattern.matches(Path::new("/t/read_test_file.py")));
    }

    #[test]
    fn finds_units_recursively() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "agents/test_agent_demo.py", "");
        write(temp.path(), "utils/nested/test_utils_demo.py", "");
        write(temp.path(), "read_test_file.py", "");
        write(temp.path(), "utils/helper.py", "");

        let mut found = find_test_units(temp.path(), &UnitPattern::new("test_", "py"));
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|path| path.is_absolute()));
        assert!(found[0].ends_with("agents/test_agent_demo.py"));
    }

    #[test]
    fn missing_root_yields_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let found = find_test_units(&temp.path().join("nope"), &UnitPattern::new("test_", "py"));
        assert!(found.is_empty());
    }

    #[test]
    fn unreadable_file_defaults_to_parallel() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = classify_file(&temp.path().join("test_gone.py"), &markers());
        assert_eq!(policy, Policy::Parallel);
    }

    #[test]
    fn non_utf8_source_still_classifies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("test_bin.py");
        let mut bytes = vec![0xff, 0xfe];
        bytes.extend_from_slice(b"\n@SerialUnitTest\n");
        fs::write(&path, bytes).expect("write");
        assert_eq!(classify_file(&path, &markers()), Policy::Serial);
    }

    #[test]
    fn discover_partitions_and_labels() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "utils/test_b.py", "class T: pass\n");
        write(temp.path(), "agents/test_a.py", "@SerialUnitTest\nclass T: pass\n");
        write(temp.path(), "agents/test_c.py", "@SkipUnitTest\n@SerialUnitTest\n");
        write(temp.path(), "test_d.py", "class T: pass\n");

        let discovered = discover(temp.path(), &UnitPattern::new("test_", "py"), &markers());
        let labels =
            |units: &[TestUnit]| units.iter().map(|u| u.label.clone()).collect::<Vec<_>>();
        assert_eq!(labels(&discovered.skip), vec!["agents/test_c.py"]);
        assert_eq!(labels(&discovered.serial), vec!["agents/test_a.py"]);
        assert_eq!(labels(&discovered.parallel), vec!["test_d.py", "utils/test_b.py"]);
        assert_eq!(discovered.total(), 4);

        let classified = discovered.classified();
        assert_eq!(classified[0].unit.label, "agents/test_a.py");
        assert_eq!(classified[0].policy, Policy::Serial);
    }
}
