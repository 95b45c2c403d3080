//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use settle_core::ConversationKey;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;

/// Log to stderr for interactive commands
pub fn init_stderr_logging(verbose: bool) {
    fmt()
        .with_writer(std::io::stderr)
        .with_max_level(max_level(verbose))
        .with_target(false)
        .init();
}

/// Log to a daily-rolling file for detached watchers
///
/// Keep the guard alive until exit or buffered lines are lost.
pub fn init_file_logging(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(log_dir, "settle.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    fmt()
        .with_writer(writer)
        .with_max_level(max_level(verbose))
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn max_level(verbose: bool) -> tracing::Level {
    if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    }
}

/// Start `settle watch <key>` as a detached process
///
/// The child gets its own process group and no stdio, so it outlives the
/// caller and is not hit by signals aimed at the caller's terminal.
pub fn spawn_detached_watcher(key: &ConversationKey, verbose: bool) -> Result<u32> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Failed to get current executable path")?;

    let mut command = Command::new(exe);
    if verbose {
        command.arg("--verbose");
    }
    command
        .arg("watch")
        .arg(key.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    let child = command.spawn().context("Failed to spawn settle watcher")?;
    Ok(child.id())
}

/// Format timestamp as relative time ("2 minutes ago")
pub fn format_relative_time(ts_ms: u64, now_ms: u64) -> String {
    if ts_ms > now_ms {
        return "in the future".to_string();
    }

    let elapsed_ms = now_ms - ts_ms;
    let seconds = elapsed_ms / 1000;

    if seconds == 0 {
        format!("{}ms ago", elapsed_ms)
    } else if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else {
        format!("{} days ago", seconds / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_relative_time() {
        assert_eq!(format_relative_time(1_000, 1_250), "250ms ago");
        assert_eq!(format_relative_time(0, 42_000), "42 seconds ago");
        assert_eq!(format_relative_time(0, 180_000), "3 minutes ago");
        assert_eq!(format_relative_time(0, 7_200_000), "2 hours ago");
        assert_eq!(format_relative_time(0, 172_800_000), "2 days ago");
        assert_eq!(format_relative_time(5, 1), "in the future");
    }
}
