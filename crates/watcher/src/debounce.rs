//! Per-key burst debouncing
//!
//! Every arrival stamps the key's last-arrival marker, appends to the key's
//! pending batch and starts its own settle watcher. Watchers are never
//! cancelled. Each one sleeps the quiet interval, then:
//!
//! 1. reads the marker and exits if a newer arrival is still inside the
//!    quiet window (that arrival's watcher will handle the burst);
//! 2. otherwise claims the pending batch atomically, exiting if another
//!    watcher got there first;
//! 3. clears the marker and dispatches the combined batch exactly once.
//!
//! Delivery is at-most-once: a batch whose dispatch fails is not re-queued.

use crate::dispatch::{Dispatch, Dispatcher};
use settle_core::{ArrivalContext, Clock, ConversationKey, DebounceConfig, Fragment, SystemClock};
use settle_store::{BatchStore, StoreError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How a settle watcher ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A newer arrival extended the burst; its own watcher takes over
    Superseded,
    /// Another watcher claimed the batch first
    LostRace,
    /// Claimed a batch with no non-blank text; nothing dispatched
    Empty,
    Dispatched(Dispatch),
    /// The dispatcher failed; the batch is gone
    DispatchFailed(Dispatch),
    /// Storage could not be read or claimed; nothing dispatched
    StorageFailed,
}

impl WatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::LostRace => "lost-race",
            Self::Empty => "empty",
            Self::Dispatched(_) => "dispatched",
            Self::DispatchFailed(_) => "dispatch-failed",
            Self::StorageFailed => "storage-failed",
        }
    }

    /// The burst handed to the dispatcher, whether or not it succeeded
    pub fn dispatch(&self) -> Option<&Dispatch> {
        match self {
            Self::Dispatched(d) | Self::DispatchFailed(d) => Some(d),
            _ => None,
        }
    }
}

/// Persist one arrival: stamp the marker, then append the fragment
///
/// This is the half of an arrival that must finish before the caller
/// returns. A stored fragment is always covered by a marker at least as new
/// as itself. On error the fragment is in no burst at all, though the marker
/// may already be bumped; nothing is retried here.
pub fn record<S: BatchStore + ?Sized>(
    store: &S,
    clock: &dyn Clock,
    key: &ConversationKey,
    text: impl Into<String>,
    context: ArrivalContext,
) -> Result<Fragment, StoreError> {
    let fragment = Fragment {
        text: text.into(),
        context,
        received_at_ms: clock.now_ms(),
    };
    store.write_marker(key, fragment.received_at_ms)?;
    store.append(key, &fragment)?;
    debug!(key = %key, at_ms = fragment.received_at_ms, "Recorded arrival");
    Ok(fragment)
}

/// Burst debouncer over a shared store
pub struct Debouncer<S: ?Sized, D: ?Sized> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    clock: Arc<dyn Clock>,
    config: DebounceConfig,
}

impl<S, D> Debouncer<S, D>
where
    S: BatchStore + ?Sized,
    D: Dispatcher + ?Sized,
{
    pub fn new(store: Arc<S>, dispatcher: Arc<D>, config: DebounceConfig) -> Self {
        Self {
            store,
            dispatcher,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist an arrival without starting a watcher
    ///
    /// For callers that run the watcher elsewhere, e.g. in a separate process.
    pub fn enqueue(
        &self,
        key: &ConversationKey,
        text: impl Into<String>,
        context: ArrivalContext,
    ) -> Result<Fragment, StoreError> {
        record(&*self.store, &*self.clock, key, text, context)
    }

    /// Persist an arrival and spawn its settle watcher
    ///
    /// Returns once the arrival is stored; the handle resolves when the
    /// watcher finishes. Dropping the handle does not stop the watcher.
    ///
    /// If storing fails the watcher is still started: the marker may already
    /// have been bumped, deferring every earlier watcher of the burst.
    pub fn record_arrival(
        self: &Arc<Self>,
        key: &ConversationKey,
        text: impl Into<String>,
        context: ArrivalContext,
    ) -> Result<JoinHandle<WatchOutcome>, StoreError> {
        let recorded = self.enqueue(key, text, context);
        let watcher = self.spawn_watcher(key);
        recorded.map(|_| watcher)
    }

    fn spawn_watcher(self: &Arc<Self>, key: &ConversationKey) -> JoinHandle<WatchOutcome> {
        let this = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move { this.watch(&key).await })
    }

    /// One settle watcher: wait out the quiet interval, then settle
    pub async fn watch(&self, key: &ConversationKey) -> WatchOutcome {
        tokio::time::sleep(self.config.quiet_interval).await;
        self.settle(key).await
    }

    /// Freshness check, claim and dispatch, without the initial wait
    pub async fn settle(&self, key: &ConversationKey) -> WatchOutcome {
        let marker = match self.store.read_marker(key) {
            Ok(marker) => marker,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to read last-arrival marker");
                return WatchOutcome::StorageFailed;
            }
        };

        let now = self.clock.now_ms();
        if !self.config.is_settled(marker, now) {
            debug!(key = %key, marker_ms = ?marker, now_ms = now, "Burst still active, deferring");
            return WatchOutcome::Superseded;
        }

        let batch = match self.store.claim(key) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!(key = %key, "Batch already claimed");
                return WatchOutcome::LostRace;
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to claim pending batch");
                return WatchOutcome::StorageFailed;
            }
        };

        if let Some(observed) = marker {
            if let Err(e) = self.store.clear_marker(key, observed) {
                warn!(key = %key, error = %e, "Failed to clear last-arrival marker");
            }
        }

        let combined = batch.combined(&self.config.separator);
        if combined.is_empty() {
            debug!(
                key = %key,
                fragments = batch.len(),
                "Claimed batch is blank, nothing to dispatch"
            );
            return WatchOutcome::Empty;
        }

        let dispatch = Dispatch {
            key: key.clone(),
            combined,
            context: batch.latest_context(),
            fragment_count: batch.len(),
        };

        info!(key = %key, fragments = dispatch.fragment_count, "Dispatching settled burst");
        match self.dispatcher.dispatch(&dispatch).await {
            Ok(()) => WatchOutcome::Dispatched(dispatch),
            Err(e) => {
                error!(
                    key = %key,
                    fragments = dispatch.fragment_count,
                    error = %e,
                    "Dispatch failed; burst will not be retried"
                );
                WatchOutcome::DispatchFailed(dispatch)
            }
        }
    }
}
