//! Builds stores, dispatchers and debouncers from configuration

use crate::system_config::{Backend, SystemConfig};
use anyhow::{Context, Result};
use settle_store::{BatchStore, FsStore, MemoryStore, SledStore};
use settle_watcher::{AlertingDispatcher, CommandDispatcher, Debouncer, Dispatcher};
use std::sync::Arc;
use std::time::Duration;

pub type DynDebouncer = Debouncer<dyn BatchStore, dyn Dispatcher>;

/// Open the configured storage backend
pub fn open_store(config: &SystemConfig) -> Result<Arc<dyn BatchStore>> {
    let store: Arc<dyn BatchStore> = match config.storage.backend {
        Backend::Fs => {
            let dir = config.namespace_dir()?;
            Arc::new(
                FsStore::open(&dir)
                    .with_context(|| format!("Failed to open batch store at {}", dir.display()))?,
            )
        }
        Backend::Sled => {
            let dir = config.namespace_dir()?;
            Arc::new(
                SledStore::open(&dir)
                    .with_context(|| format!("Failed to open sled store at {}", dir.display()))?,
            )
        }
        Backend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Gateway dispatcher, wrapped with operator alerts when configured
pub fn build_dispatcher(config: &SystemConfig) -> Result<Arc<dyn Dispatcher>> {
    let program = config.dispatch.program.clone().context(
        "dispatch.program is not configured (set it with `settle config --set dispatch.program <path>`)",
    )?;

    let gateway = CommandDispatcher::new(program)
        .with_args(config.dispatch.args.clone())
        .with_mode(config.dispatch.mode.clone())
        .with_default_profile(config.dispatch.default_profile.clone())
        .with_timeout(Duration::from_secs(config.dispatch.timeout_secs));

    let dispatcher: Arc<dyn Dispatcher> = match config.alert.command.split_first() {
        Some((alert_program, alert_args)) => Arc::new(
            AlertingDispatcher::new(Arc::new(gateway), alert_program, alert_args.to_vec())
                .with_timeout(Duration::from_secs(config.alert.timeout_secs)),
        ),
        None => Arc::new(gateway),
    };
    Ok(dispatcher)
}

pub fn build_debouncer(config: &SystemConfig, store: Arc<dyn BatchStore>) -> Result<DynDebouncer> {
    let dispatcher = build_dispatcher(config)?;
    Ok(Debouncer::new(store, dispatcher, config.debounce_config()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, backend: Backend) -> SystemConfig {
        let mut config = SystemConfig::default();
        config.storage.backend = backend;
        config.storage.root = Some(dir.path().to_path_buf());
        config
    }

    #[test]
    fn test_open_store_per_backend() {
        let temp_dir = TempDir::new().unwrap();

        let fs_store = open_store(&config_in(&temp_dir, Backend::Fs)).unwrap();
        assert!(fs_store.is_shared_across_processes());
        assert!(temp_dir.path().join("tg-batch").join("pending").is_dir());

        let memory = open_store(&config_in(&temp_dir, Backend::Memory)).unwrap();
        assert!(!memory.is_shared_across_processes());
    }

    #[test]
    fn test_dispatcher_requires_program() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_in(&temp_dir, Backend::Memory);
        assert!(build_dispatcher(&config).is_err());

        config.dispatch.program = Some(PathBuf::from("/bin/true"));
        config.alert.command = vec!["/bin/echo".to_string(), "alert".to_string()];
        assert!(build_dispatcher(&config).is_ok());
        assert!(build_debouncer(&config, open_store(&config).unwrap()).is_ok());
    }
}
