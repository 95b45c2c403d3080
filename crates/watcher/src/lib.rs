//! Burst debouncing for settle
//!
//! This crate provides:
//! - `Debouncer`: records arrivals and runs one settle watcher per arrival
//! - Freshness check + atomic claim, so each settled burst dispatches once
//! - The `Dispatcher` seam and a gateway-command implementation
//! - Operator alerting when a dispatch fails

pub mod clock;
pub mod debounce;
pub mod dispatch;

// Re-exports
pub use clock::TokioClock;
pub use debounce::{record, Debouncer, WatchOutcome};
pub use dispatch::{AlertingDispatcher, CommandDispatcher, Dispatch, DispatchError, Dispatcher};
