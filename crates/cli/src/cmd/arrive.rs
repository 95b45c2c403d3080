//! Record one arrival and hand it to a detached watcher

use crate::{data_access, system_config, util};
use anyhow::{Context, Result};
use settle_core::{ArrivalContext, ConversationKey, SystemClock};
use tracing::{debug, warn};

pub async fn run(
    key: &str,
    text: &str,
    context: ArrivalContext,
    verbose: bool,
) -> Result<()> {
    let config = system_config::load()?;
    let key = ConversationKey::new(key).context("Invalid conversation key")?;

    // 1. The watcher runs in another process, so both must see the same store
    let store = data_access::open_store(&config)?;
    if !store.is_shared_across_processes() {
        anyhow::bail!(
            "Storage backend '{}' cannot be shared with a detached watcher; \
             use the fs backend or `settle serve`",
            config.storage.backend
        );
    }

    // 2. Refuse arrivals the watcher could never dispatch
    data_access::build_dispatcher(&config)?;

    // 3. Persist marker and fragment
    let recorded = settle_watcher::record(&*store, &SystemClock, &key, text, context);

    // 4. One watcher per arrival, even a failed one: the marker may already
    //    have been bumped past earlier watchers of this burst
    let pid = util::spawn_detached_watcher(&key, verbose)?;
    debug!(key = %key, pid, "Spawned settle watcher");

    if let Err(e) = recorded {
        warn!(key = %key, error = %e, "Arrival dropped: storage unavailable");
        return Err(e).context("Failed to record arrival");
    }

    Ok(())
}
