//! Stable exit codes for patchline CLI commands.

/// Command succeeded (including a run where nothing needed regeneration).
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/preconditions or other errors.
pub const INVALID: i32 = 1;
/// The run was aborted: a job failed and the failure policy chose abort, or
/// a cancel request was honored at a job boundary.
pub const ABORTED: i32 = 2;
