//! Typed errors for conditions callers branch on.
//!
//! Everything else flows through `anyhow` with context.

use std::path::PathBuf;

use thiserror::Error;

/// A session could not start.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("{role} directory does not exist: {}", .path.display())]
    MissingDirectory { role: String, path: PathBuf },

    #[error("no test files found under {}", .root.display())]
    NoTestUnits { root: PathBuf },
}

/// The coverage tool failed while merging or reporting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("coverage {stage} failed{}: {diagnostics}", exit_suffix(.exit_code))]
pub struct AggregationError {
    /// Tool command that failed (`combine`, `report`, `html`, `xml`).
    pub stage: String,
    /// `None` when the tool could not be spawned or was killed.
    pub exit_code: Option<i32>,
    pub diagnostics: String,
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| format!(" (exit code {code})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_names_role_and_path() {
        let err = PreconditionError::MissingDirectory {
            role: "source".to_string(),
            path: PathBuf::from("/p/agents"),
        };
        assert_eq!(err.to_string(), "source directory does not exist: /p/agents");
    }

    #[test]
    fn aggregation_error_includes_exit_code_when_known() {
        let err = AggregationError {
            stage: "combine".to_string(),
            exit_code: Some(1),
            diagnostics: "No data to combine".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "coverage combine failed (exit code 1): No data to combine"
        );

        let err = AggregationError {
            stage: "xml".to_string(),
            exit_code: None,
            diagnostics: "spawn failed".to_string(),
        };
        assert_eq!(err.to_string(), "coverage xml failed: spawn failed");
    }
}
