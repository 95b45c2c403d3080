//! Error types for the data model

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("conversation key must not be empty")]
    EmptyKey,

    #[error("quiet interval must be at least {min_ms}ms (got {got_ms}ms)")]
    QuietIntervalTooShort { min_ms: u64, got_ms: u64 },

    #[error("safety margin ({margin_ms}ms) must be smaller than the quiet interval ({quiet_ms}ms)")]
    MarginTooLarge { margin_ms: u64, quiet_ms: u64 },
}
