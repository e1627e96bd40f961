//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod outcome;
pub mod path;
pub mod policy;
pub mod retry;
pub mod types;
