//! Stable exit codes for the healer CLI.

/// Every script ended in `succeeded`.
pub const OK: i32 = 0;
/// Invalid arguments or config, or no scripts to process.
pub const INVALID: i32 = 1;
/// At least one script ended in `failed`.
pub const FAILED: i32 = 2;
/// A script could not be launched; the run was aborted.
pub const LAUNCH: i32 = 3;
/// Interrupted by SIGINT or SIGTERM before every script was processed.
pub const INTERRUPTED: i32 = 130;
