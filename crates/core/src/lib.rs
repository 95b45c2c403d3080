//! Core data model for settle
//!
//! This crate provides:
//! - Conversation keys (the partition for every debounce stream)
//! - Fragments and their per-burst context
//! - Claimed batches and how they combine into one dispatch
//! - Debounce tunables (quiet interval, safety margin)
//! - Wall clock abstraction

pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;

// Re-exports
pub use batch::{ArrivalContext, ClaimedBatch, Fragment};
pub use clock::{Clock, SystemClock};
pub use config::DebounceConfig;
pub use error::CoreError;
pub use key::ConversationKey;
