//! Exit codes for the CLI

/// Configuration or scenario failed validation
pub const VALIDATION_ERROR: i32 = 2;

/// Scenario did not settle before the runner timeout
pub const TIMED_OUT: i32 = 3;
