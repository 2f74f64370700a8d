//! Stable exit codes for autopilot CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid config/arguments, a failed run start or other errors.
pub const INVALID: i32 = 1;
