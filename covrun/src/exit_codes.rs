//! Stable exit codes for covrun CLI commands.

/// Command succeeded; every executed unit eventually passed.
pub const OK: i32 = 0;
/// Invalid layout or config, no test units, or another setup error.
pub const INVALID: i32 = 1;
/// At least one unit failed every attempt.
pub const FAILED: i32 = 2;
