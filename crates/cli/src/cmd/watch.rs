//! Run one settle watcher for a key

use crate::system_config::{self, SystemConfig};
use crate::{data_access, util};
use anyhow::{Context, Result};
use settle_core::ConversationKey;
use settle_watcher::WatchOutcome;
use tracing::{error, info};

/// Wait out the quiet interval, then claim and dispatch if the burst settled
///
/// Runs detached with no stderr, so everything, setup failures included,
/// goes to the rolling log under the storage root. Watch outcomes are
/// logged, never returned as errors: the arrival that started this watcher
/// has long since returned.
pub async fn run(key: &str, verbose: bool) -> Result<()> {
    let config = system_config::load()?;
    let _guard = util::init_file_logging(&config.log_dir()?, verbose)?;

    if let Err(e) = watch(key, &config).await {
        error!(key = %key, error = %format!("{e:#}"), "Watcher could not start");
        return Err(e);
    }
    Ok(())
}

async fn watch(key: &str, config: &SystemConfig) -> Result<()> {
    let key = ConversationKey::new(key).context("Invalid conversation key")?;
    let store = data_access::open_store(config)?;
    let debouncer = data_access::build_debouncer(config, store)?;

    let outcome = debouncer.watch(&key).await;
    match &outcome {
        WatchOutcome::Dispatched(dispatch) => info!(
            key = %key,
            fragments = dispatch.fragment_count,
            "Watcher dispatched burst"
        ),
        other => info!(key = %key, outcome = other.label(), "Watcher finished"),
    }
    Ok(())
}
