//! Failure predicate for a single unit execution.

/// Decide whether an execution failed.
///
/// A run fails when the exit code is non-zero (or absent, i.e. the process
/// was killed or never started), or when stderr contains `failure_token`.
/// Both signals are honored because test frameworks may report failures on
/// stderr without a matching exit code.
///
/// Sharp edge: a passing unit that legitimately prints the token to stderr
/// is classified as failing.
pub fn is_failure(exit_code: Option<i32>, stderr: &str, failure_token: &str) -> bool {
    let exit_failed = exit_code != Some(0);
    let token_failed =
        !failure_token.is_empty() && !stderr.is_empty() && stderr.contains(failure_token);
    exit_failed || token_failed
}
