//! System configuration (`config.toml`)
//!
//! Looked up at `$SETTLE_CONFIG`, falling back to
//! `<config dir>/settle/config.toml`. A missing file means all defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use settle_core::DebounceConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "SETTLE_CONFIG";
pub const ROOT_ENV: &str = "SETTLE_ROOT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub debounce: DebounceSection,
    pub storage: StorageSection,
    pub dispatch: DispatchSection,
    pub alert: AlertSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceSection {
    /// Silence required before a burst is dispatched
    pub quiet_interval_ms: u64,
    /// Slack for scheduling jitter when checking the marker
    pub safety_margin_ms: u64,
    /// Joins fragments into the dispatched text
    pub separator: String,
}

impl Default for DebounceSection {
    fn default() -> Self {
        Self {
            quiet_interval_ms: 3_000,
            safety_margin_ms: 200,
            separator: " ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Files under the storage root; shared by independent processes
    Fs,
    /// Embedded database; one process at a time
    Sled,
    /// In-process only; `settle serve`
    Memory,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fs => "fs",
            Self::Sled => "sled",
            Self::Memory => "memory",
        })
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fs" => Ok(Self::Fs),
            "sled" => Ok(Self::Sled),
            "memory" => Ok(Self::Memory),
            _ => anyhow::bail!("Unknown storage backend '{}' (expected fs, sled or memory)", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: Backend,
    /// Storage root (default: $SETTLE_ROOT, then the user data dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Subdirectory of the root holding this deployment's batches
    pub namespace: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: Backend::Fs,
            root: None,
            namespace: "tg-batch".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Gateway executable invoked once per settled burst
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    /// Leading arguments placed before the burst arguments
    pub args: Vec<String>,
    pub mode: String,
    /// Profile passed when an arrival carries none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            mode: "text".to_string(),
            default_profile: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSection {
    /// Program and leading args run when a dispatch fails; empty disables alerts
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AlertSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl SystemConfig {
    /// Check every value against its valid range
    pub fn validate(&self) -> Result<()> {
        self.debounce_config()?;

        if self.debounce.quiet_interval_ms > 600_000 {
            anyhow::bail!(
                "debounce.quiet_interval_ms must be at most 600000 (got {})",
                self.debounce.quiet_interval_ms
            );
        }
        let namespace = &self.storage.namespace;
        if namespace.is_empty() || namespace.contains(['/', '\\']) || namespace == ".." {
            anyhow::bail!("storage.namespace must be a single non-empty path component (got '{}')", namespace);
        }
        if !(1..=3600).contains(&self.dispatch.timeout_secs) {
            anyhow::bail!(
                "dispatch.timeout_secs must be between 1 and 3600 (got {})",
                self.dispatch.timeout_secs
            );
        }
        if !(1..=300).contains(&self.alert.timeout_secs) {
            anyhow::bail!(
                "alert.timeout_secs must be between 1 and 300 (got {})",
                self.alert.timeout_secs
            );
        }
        Ok(())
    }

    pub fn debounce_config(&self) -> Result<DebounceConfig> {
        let config = DebounceConfig::new(
            Duration::from_millis(self.debounce.quiet_interval_ms),
            Duration::from_millis(self.debounce.safety_margin_ms),
        )
        .context("Invalid [debounce] settings")?;
        Ok(config.with_separator(self.debounce.separator.clone()))
    }

    /// Resolved storage root
    pub fn storage_root(&self) -> Result<PathBuf> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(root));
        }
        if let Some(root) = &self.storage.root {
            return Ok(root.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("settle"))
            .context("Could not determine a storage root; set storage.root or SETTLE_ROOT")
    }

    /// Directory holding this namespace's batches
    pub fn namespace_dir(&self) -> Result<PathBuf> {
        Ok(self.storage_root()?.join(&self.storage.namespace))
    }

    /// Directory for detached watcher logs
    pub fn log_dir(&self) -> Result<PathBuf> {
        Ok(self.storage_root()?.join("logs"))
    }
}

/// Path of the config file
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("settle").join("config.toml"))
}

/// Load configuration, using defaults when no file exists
pub fn load() -> Result<SystemConfig> {
    match config_file_path() {
        Some(path) if path.exists() => load_from(&path),
        _ => Ok(SystemConfig::default()),
    }
}

pub fn load_from(path: &Path) -> Result<SystemConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SystemConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Write configuration to the config file
pub fn save(config: &SystemConfig) -> Result<()> {
    let path = config_file_path().context("Could not determine config file path")?;
    save_to(config, &path)
}

pub fn save_to(config: &SystemConfig, path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .context("Config file path has no parent directory")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let serialized = toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    let tmp = parent.join(format!(".config.{}.tmp", ulid::Ulid::new()));
    std::fs::write(&tmp, serialized)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move config into place at {}", path.display()))?;
    Ok(())
}

/// Create the config file with defaults if it does not exist
pub fn init_if_missing() -> Result<PathBuf> {
    let path = config_file_path().context("Could not determine config file path")?;
    if !path.exists() {
        save_to(&SystemConfig::default(), &path)?;
    }
    Ok(path)
}

pub fn example_config() -> &'static str {
    r#"# settle configuration

[debounce]
# Silence required before a burst is dispatched (50-600000)
quiet_interval_ms = 3000
# Must be smaller than quiet_interval_ms
safety_margin_ms = 200
separator = " "

[storage]
# fs: shared between processes (needed by `settle arrive`)
# sled: durable, single process
# memory: `settle serve` only
backend = "fs"
# root = "/var/lib/settle"
namespace = "tg-batch"

[dispatch]
# Invoked as: program [args..] KEY COMBINED GROUP_HISTORY MODE PROFILE
program = "/opt/bot/scripts/telegram-claude-gateway.sh"
args = []
mode = "text"
default_profile = "josh"
timeout_secs = 120

[alert]
# Run as: command.. MESSAGE when a dispatch fails
command = ["/opt/bot/scripts/notify-operator.sh"]
timeout_secs = 30
"#
}
