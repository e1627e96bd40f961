//! I/O helpers for the orchestrator.

pub mod artifacts;
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod executor;
pub mod process;
