//! Coverage-instrumented test orchestration.
//!
//! Discovers test units, classifies them as skip, serial or parallel, runs
//! each in its own child process under a coverage tool with bounded retries,
//! and merges the per-run coverage artifacts into one report.
//!
//! - **[`core`]**: Pure, deterministic logic (labels, classification, failure
//!   predicate, retry protocol). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, processes, the
//!   coverage tool). Behind traits so tests can script them.
//!
//! Orchestration modules ([`schedule`], [`aggregate`], [`session`]) coordinate
//! the two; [`report`] renders results.

pub mod aggregate;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod schedule;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
