//! Stable exit codes for phaseloop CLI commands.

/// Command succeeded; for `budget`, the task may continue.
pub const OK: i32 = 0;
/// Command failed due to invalid config, snapshot, history or other errors.
pub const INVALID: i32 = 1;
/// `phaseloop budget` decided the task must stop.
pub const STOP: i32 = 2;
/// `phaseloop detect` found a loop in the history.
pub const LOOP: i32 = 3;
