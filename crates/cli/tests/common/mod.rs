//! CLI command execution helpers
//!
//! Wraps the `settle` binary with an isolated config file and storage root,
//! so tests never touch the user's real configuration.

#![allow(dead_code)]

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Temporary config + storage root shared by every command of one test
pub struct Sandbox {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub output_path: PathBuf,
    pub root: PathBuf,
}

impl Sandbox {
    /// Sandbox whose gateway appends `KEY|COMBINED` lines to `output_path`
    pub fn new(backend: &str, quiet_interval_ms: u64) -> Result<Self> {
        let gateway = r#"[dispatch]
program = "/bin/sh"
args = ["-c", "printf '%s|%s\n' \"$1\" \"$2\" >> \"$SETTLE_TEST_OUT\"", "gateway"]
"#;
        Self::with_dispatch(backend, quiet_interval_ms, gateway)
    }

    /// Sandbox with no `[dispatch]` section at all
    pub fn without_gateway(backend: &str, quiet_interval_ms: u64) -> Result<Self> {
        Self::with_dispatch(backend, quiet_interval_ms, "")
    }

    fn with_dispatch(backend: &str, quiet_interval_ms: u64, dispatch: &str) -> Result<Self> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("config.toml");
        let output_path = dir.path().join("gateway.out");
        let root = dir.path().join("state");

        let config = format!(
            r#"[debounce]
quiet_interval_ms = {quiet_interval_ms}
safety_margin_ms = 100

[storage]
backend = "{backend}"
root = "{root}"

{dispatch}"#,
            root = root.display(),
        );
        std::fs::write(&config_path, config)?;

        Ok(Self { dir, config_path, output_path, root })
    }

    /// Everything detached watchers have logged so far
    pub fn watcher_logs(&self) -> String {
        let Ok(entries) = std::fs::read_dir(self.root.join("logs")) else {
            return String::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
            .collect()
    }

    /// Files waiting in the fs backend's pending directory
    pub fn pending_files(&self) -> usize {
        std::fs::read_dir(self.root.join("tg-batch").join("pending"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn command(&self) -> SettleCommand {
        let mut command = SettleCommand::new(self.dir.path());
        command
            .env("SETTLE_CONFIG", &self.config_path.display().to_string())
            .env("SETTLE_TEST_OUT", &self.output_path.display().to_string());
        command
    }

    /// Lines the gateway has written so far
    pub fn dispatched(&self) -> Vec<String> {
        std::fs::read_to_string(&self.output_path)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Poll until the gateway has written `count` lines or `timeout` elapses
    pub fn wait_for_dispatches(&self, count: usize, timeout: Duration) -> Vec<String> {
        let start = Instant::now();
        loop {
            let lines = self.dispatched();
            if lines.len() >= count || start.elapsed() > timeout {
                return lines;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

/// CLI command builder
pub struct SettleCommand {
    binary_path: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    stdin_data: Option<String>,
}

impl SettleCommand {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            binary_path: PathBuf::from(env!("CARGO_BIN_EXE_settle")),
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
            stdin_data: None,
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Set environment variable
    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Provide stdin data
    pub fn stdin(&mut self, data: &str) -> &mut Self {
        self.stdin_data = Some(data.to_string());
        self
    }

    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();

        let mut command = Command::new(&self.binary_path);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .env_remove("SETTLE_ROOT")
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if self.stdin_data.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command.spawn().context("Failed to spawn settle")?;
        if let Some(data) = &self.stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                use std::io::Write;
                stdin.write_all(data.as_bytes())?;
            }
        }
        let output = child.wait_with_output().context("Failed to wait for settle")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;
        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }
        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;
        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }
        Ok(result)
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}
