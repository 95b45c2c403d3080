//! Durable per-key storage for pending batches and last-arrival markers
//!
//! This crate provides:
//! - The `BatchStore` substrate trait (append, markers, atomic claim)
//! - `FsStore`: one file per slot, shareable between independent processes
//! - `SledStore`: embedded database, durable across restarts
//! - `MemoryStore`: concurrent map for a single long-running service

pub mod error;
pub mod fs;
pub mod memory;
pub mod sled_store;

// Re-exports
pub use error::StoreError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use sled_store::SledStore;

use settle_core::{ClaimedBatch, ConversationKey, Fragment};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// A pending batch as seen by status views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub key: ConversationKey,
    pub fragments: usize,
    /// Last-arrival marker, if one is stored
    pub last_arrival_ms: Option<u64>,
}

/// Storage substrate shared by every watcher of a key
///
/// `claim` is the only operation with a cross-caller guarantee: when any
/// number of callers race on the same key, at most one receives the batch.
pub trait BatchStore: Send + Sync + 'static {
    /// Append a fragment to the key's pending batch, creating it if absent
    fn append(&self, key: &ConversationKey, fragment: &Fragment) -> Result<()>;

    /// Overwrite the key's last-arrival marker
    fn write_marker(&self, key: &ConversationKey, at_ms: u64) -> Result<()>;

    fn read_marker(&self, key: &ConversationKey) -> Result<Option<u64>>;

    /// Atomically remove the pending batch and hand it to the caller
    ///
    /// `Ok(None)` means there was nothing to claim, usually because another
    /// watcher won the race.
    fn claim(&self, key: &ConversationKey) -> Result<Option<ClaimedBatch>>;

    /// Remove the marker if it still holds `observed`
    ///
    /// A marker rewritten by a newer arrival is left in place.
    fn clear_marker(&self, key: &ConversationKey, observed: u64) -> Result<()>;

    /// All pending batches, for status views
    fn pending(&self) -> Result<Vec<PendingSummary>>;

    /// Whether separate OS processes opening the same location see the same state
    fn is_shared_across_processes(&self) -> bool;
}
