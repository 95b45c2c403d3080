//! Long-running debouncer fed by newline-delimited JSON on stdin
//!
//! Each line is one arrival:
//! `{"key": "chat-42", "text": "hello", "group_history": "...", "profile": "..."}`
//! Every arrival gets its own watcher task against the configured store.

use crate::data_access::{self, DynDebouncer};
use crate::system_config::SystemConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use settle_core::{ArrivalContext, ConversationKey};
use settle_watcher::WatchOutcome;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ArrivalLine {
    key: String,
    text: String,
    #[serde(default)]
    group_history: Option<String>,
    #[serde(default)]
    profile: Option<String>,
}

/// Totals reported when the service stops
#[derive(Debug, Default)]
struct Tally {
    arrivals: usize,
    rejected: usize,
    dispatched: usize,
    failed: usize,
}

pub async fn run(config: &SystemConfig) -> Result<()> {
    let store = data_access::open_store(config)?;
    let debouncer = Arc::new(data_access::build_debouncer(config, store)?);

    info!(
        backend = %config.storage.backend,
        quiet_interval_ms = config.debounce.quiet_interval_ms,
        "Serving arrivals from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut watchers: Vec<JoinHandle<WatchOutcome>> = Vec::new();
    let mut tally = Tally::default();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read arrivals from stdin")? {
                    Some(line) => {
                        match accept(&debouncer, &line) {
                            Ok(Some(handle)) => {
                                tally.arrivals += 1;
                                watchers.push(handle);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tally.rejected += 1;
                                warn!(error = %format!("{e:#}"), "Arrival dropped");
                            }
                        }
                        reap(&mut watchers, &mut tally, false).await;
                    }
                    None => {
                        info!("Input closed");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Pending bursts still settle before we exit
    info!(in_flight = watchers.len(), "Waiting for in-flight watchers");
    reap(&mut watchers, &mut tally, true).await;

    info!(
        arrivals = tally.arrivals,
        rejected = tally.rejected,
        dispatched = tally.dispatched,
        failed = tally.failed,
        "Stopped"
    );
    Ok(())
}

/// Parse and record one input line; blank lines are ignored
fn accept(debouncer: &Arc<DynDebouncer>, line: &str) -> Result<Option<JoinHandle<WatchOutcome>>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let arrival: ArrivalLine = serde_json::from_str(line).context("Malformed arrival")?;
    let key = ConversationKey::new(arrival.key).context("Invalid conversation key")?;
    let context = ArrivalContext {
        group_history: arrival.group_history,
        profile: arrival.profile,
    };

    let handle = debouncer
        .record_arrival(&key, arrival.text, context)
        .with_context(|| format!("Failed to record arrival for '{}'", key))?;
    Ok(Some(handle))
}

/// Collect finished watchers (or all of them, waiting, when `all` is set)
async fn reap(watchers: &mut Vec<JoinHandle<WatchOutcome>>, tally: &mut Tally, all: bool) {
    let (done, running): (Vec<_>, Vec<_>) = watchers
        .drain(..)
        .partition(|handle| all || handle.is_finished());
    *watchers = running;

    for handle in done {
        match handle.await {
            Ok(WatchOutcome::Dispatched(_)) => tally.dispatched += 1,
            Ok(WatchOutcome::DispatchFailed(_) | WatchOutcome::StorageFailed) => tally.failed += 1,
            Ok(_) => {}
            Err(e) => {
                tally.failed += 1;
                warn!(error = %e, "Watcher task failed");
            }
        }
    }
}
