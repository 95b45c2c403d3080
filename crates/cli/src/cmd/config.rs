//! Configuration management command
//!
//! Provides CLI interface to view and edit system configuration.

use crate::system_config::{self, SystemConfig};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;

const KEYS: &[&str] = &[
    "debounce.quiet_interval_ms",
    "debounce.safety_margin_ms",
    "debounce.separator",
    "storage.backend",
    "storage.root",
    "storage.namespace",
    "dispatch.program",
    "dispatch.args",
    "dispatch.mode",
    "dispatch.default_profile",
    "dispatch.timeout_secs",
    "alert.command",
    "alert.timeout_secs",
];

/// List all configuration values
pub async fn run_list() -> Result<()> {
    let config = system_config::load()?;
    let config_path = system_config::config_file_path()
        .context("Could not determine config file path")?;

    println!("{}", "System Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), config_path.display().dimmed());

    let mut section = "";
    for key in KEYS {
        let (prefix, name) = key.split_once('.').unwrap_or(("", key));
        if prefix != section {
            if !section.is_empty() {
                println!();
            }
            println!("{}", format!("[{}]", prefix).yellow());
            section = prefix;
        }
        println!("  {} = {}", name.cyan(), get_value(&config, key)?);
    }

    println!("\n{}", "Valid Ranges:".bold());
    println!("  quiet_interval_ms: 50-600,000");
    println!("  safety_margin_ms: 0 to quiet_interval_ms - 1");
    println!("  dispatch.timeout_secs: 1-3600");
    println!("  alert.timeout_secs: 1-300");
    println!("  storage.backend: fs | sled | memory");

    Ok(())
}

/// Get a single configuration value
pub async fn run_get(key: &str) -> Result<()> {
    let config = system_config::load()?;
    println!("{}", get_value(&config, key)?);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(key: &str, value: &str) -> Result<()> {
    let mut config = system_config::load()?;
    set_value(&mut config, key, value)?;

    // Validate before saving
    config.validate()
        .context("Invalid configuration value")?;

    system_config::save(&config)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    println!(
        "{}",
        "Note: running `settle serve` instances pick this up on restart".yellow()
    );

    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(create: bool) -> Result<()> {
    let config_path = system_config::config_file_path()
        .context("Could not determine config file path")?;

    if create && !config_path.exists() {
        system_config::init_if_missing()?;
        println!("{} Created config file at: {}", "✓".green(), config_path.display());
    } else if config_path.exists() {
        println!("{}", config_path.display());
    } else {
        println!("{}", config_path.display());
        println!("{}", "File does not exist. Use --create to create it.".yellow());
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", system_config::example_config());
    Ok(())
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "Unknown config key: {}. Use 'settle config --list' to see available keys.",
        key
    )
}

fn show_optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "(unset)".to_string())
}

fn get_value(config: &SystemConfig, key: &str) -> Result<String> {
    let value = match key {
        "debounce.quiet_interval_ms" => config.debounce.quiet_interval_ms.to_string(),
        "debounce.safety_margin_ms" => config.debounce.safety_margin_ms.to_string(),
        "debounce.separator" => format!("{:?}", config.debounce.separator),
        "storage.backend" => config.storage.backend.to_string(),
        "storage.root" => show_optional(config.storage.root.as_ref().map(|p| p.display())),
        "storage.namespace" => config.storage.namespace.clone(),
        "dispatch.program" => show_optional(config.dispatch.program.as_ref().map(|p| p.display())),
        "dispatch.args" => format!("{:?}", config.dispatch.args),
        "dispatch.mode" => config.dispatch.mode.clone(),
        "dispatch.default_profile" => show_optional(config.dispatch.default_profile.as_ref()),
        "dispatch.timeout_secs" => config.dispatch.timeout_secs.to_string(),
        "alert.command" => format!("{:?}", config.alert.command),
        "alert.timeout_secs" => config.alert.timeout_secs.to_string(),
        _ => return Err(unknown_key(key)),
    };
    Ok(value)
}

/// List values are whitespace-separated; an empty value clears optional keys
fn set_value(config: &mut SystemConfig, key: &str, value: &str) -> Result<()> {
    let optional = |value: &str| (!value.is_empty()).then(|| value.to_string());
    let list = |value: &str| value.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    match key {
        "debounce.quiet_interval_ms" => {
            config.debounce.quiet_interval_ms = value.parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "debounce.safety_margin_ms" => {
            config.debounce.safety_margin_ms = value.parse()
                .context("Invalid value: must be a non-negative integer")?;
        }
        "debounce.separator" => config.debounce.separator = value.to_string(),
        "storage.backend" => config.storage.backend = value.parse()?,
        "storage.root" => config.storage.root = optional(value).map(PathBuf::from),
        "storage.namespace" => config.storage.namespace = value.to_string(),
        "dispatch.program" => config.dispatch.program = optional(value).map(PathBuf::from),
        "dispatch.args" => config.dispatch.args = list(value),
        "dispatch.mode" => config.dispatch.mode = value.to_string(),
        "dispatch.default_profile" => config.dispatch.default_profile = optional(value),
        "dispatch.timeout_secs" => {
            config.dispatch.timeout_secs = value.parse()
                .context("Invalid value: must be a positive integer")?;
        }
        "alert.command" => config.alert.command = list(value),
        "alert.timeout_secs" => {
            config.alert.timeout_secs = value.parse()
                .context("Invalid value: must be a positive integer")?;
        }
        _ => return Err(unknown_key(key)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_config::Backend;

    #[test]
    fn test_every_listed_key_is_readable_and_writable() {
        let mut config = SystemConfig::default();
        for key in KEYS {
            let current = get_value(&config, key).unwrap();
            assert!(!current.is_empty(), "{key}");
        }

        set_value(&mut config, "storage.backend", "sled").unwrap();
        set_value(&mut config, "dispatch.program", "/opt/gateway.sh").unwrap();
        set_value(&mut config, "alert.command", "notify-send settle").unwrap();
        set_value(&mut config, "debounce.quiet_interval_ms", "1500").unwrap();

        assert_eq!(config.storage.backend, Backend::Sled);
        assert_eq!(get_value(&config, "dispatch.program").unwrap(), "/opt/gateway.sh");
        assert_eq!(config.alert.command, vec!["notify-send", "settle"]);
        assert_eq!(config.debounce.quiet_interval_ms, 1500);

        set_value(&mut config, "dispatch.program", "").unwrap();
        assert_eq!(config.dispatch.program, None);
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_numbers() {
        let mut config = SystemConfig::default();
        assert!(get_value(&config, "gc.retain_count").is_err());
        assert!(set_value(&mut config, "dispatch.timeout_secs", "soon").is_err());
        assert!(set_value(&mut config, "storage.backend", "redis").is_err());
    }
}
