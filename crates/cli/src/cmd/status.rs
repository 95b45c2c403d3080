//! Show pending batches in the configured store

use crate::system_config::{self, Backend};
use crate::{data_access, util};
use anyhow::Result;
use owo_colors::OwoColorize;
use settle_core::{Clock, SystemClock};

pub async fn run() -> Result<()> {
    let config = system_config::load()?;

    if config.storage.backend == Backend::Memory {
        anyhow::bail!("The memory backend keeps no state outside `settle serve`; nothing to show");
    }

    let store = data_access::open_store(&config)?;
    let pending = store.pending()?;
    let now = SystemClock.now_ms();
    let quiet_ms = config.debounce.quiet_interval_ms;

    println!("{}", "Settle Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("Backend:        {}", config.storage.backend.to_string().cyan());
    println!("Location:       {}", config.namespace_dir()?.display().to_string().cyan());
    println!("Quiet interval: {}ms", quiet_ms);
    println!();

    if pending.is_empty() {
        println!("{}", "No pending batches".dimmed());
        return Ok(());
    }

    println!("{}", format!("Pending batches ({})", pending.len()).bold());
    for summary in &pending {
        let last = match summary.last_arrival_ms {
            Some(ts) => {
                let age = util::format_relative_time(ts, now);
                if now.saturating_sub(ts) > quiet_ms * 2 {
                    // Settled long ago but never claimed: its watcher died
                    format!("{} {}", age, "(stale)".red())
                } else {
                    age
                }
            }
            None => "no marker".dimmed().to_string(),
        };
        println!(
            "  {}  {} fragment(s)  last arrival {}",
            summary.key.to_string().yellow(),
            summary.fragments,
            last
        );
    }

    Ok(())
}
