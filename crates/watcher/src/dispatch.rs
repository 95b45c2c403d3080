//! Downstream handler invoked once per settled burst

use async_trait::async_trait;
use settle_core::{ArrivalContext, ConversationKey};
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything the responder receives for one settled burst
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub key: ConversationKey,
    /// Fragments joined in arrival order
    pub combined: String,
    /// Context of the latest arrival in the burst
    pub context: ArrivalContext,
    pub fragment_count: usize,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("handler failed: {0}")]
    Handler(String),
}

/// The responder a settled burst is handed to
///
/// Called at most once per burst. A failed call is not retried; the burst's
/// fragments are already gone from storage.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<(), DispatchError>;
}

/// Runs a gateway program for each burst
///
/// Invoked as `program [args..] KEY COMBINED GROUP_HISTORY MODE PROFILE`,
/// with empty strings for absent context.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    program: PathBuf,
    args: Vec<String>,
    mode: String,
    default_profile: Option<String>,
    timeout: Duration,
}

impl CommandDispatcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            mode: "text".to_string(),
            default_profile: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Leading arguments placed before the burst arguments
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Profile passed when the burst carries none
    pub fn with_default_profile(mut self, profile: Option<String>) -> Self {
        self.default_profile = profile;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full argument list for a dispatch
    pub fn command_args(&self, dispatch: &Dispatch) -> Vec<String> {
        let profile = dispatch
            .context
            .profile
            .clone()
            .or_else(|| self.default_profile.clone())
            .unwrap_or_default();

        let mut args = self.args.clone();
        args.extend([
            dispatch.key.to_string(),
            dispatch.combined.clone(),
            dispatch.context.group_history.clone().unwrap_or_default(),
            self.mode.clone(),
            profile,
        ]);
        args
    }
}

#[async_trait]
impl Dispatcher for CommandDispatcher {
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<(), DispatchError> {
        let program = self.program.display().to_string();
        debug!(key = %dispatch.key, program = %program, "Running gateway");

        run_with_timeout(&program, self.command_args(dispatch), self.timeout).await
    }
}

/// Raises an operator alert whenever the wrapped dispatcher fails
///
/// The alert program runs as `program [args..] MESSAGE`. Alert failures are
/// logged; the original dispatch error is always returned.
pub struct AlertingDispatcher<D: ?Sized> {
    inner: Arc<D>,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl<D: Dispatcher + ?Sized> AlertingDispatcher<D> {
    pub fn new(inner: Arc<D>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            inner,
            program: program.into(),
            args,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn alert(&self, dispatch: &Dispatch, error: &DispatchError) {
        let message = alert_message(dispatch, error);
        let program = self.program.display().to_string();
        let mut args = self.args.clone();
        args.push(message);

        if let Err(e) = run_with_timeout(&program, args, self.timeout).await {
            warn!(key = %dispatch.key, error = %e, "Failed to deliver operator alert");
        }
    }
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for AlertingDispatcher<D> {
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<(), DispatchError> {
        match self.inner.dispatch(dispatch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.alert(dispatch, &e).await;
                Err(e)
            }
        }
    }
}

/// Operator-facing description of a lost burst
pub fn alert_message(dispatch: &Dispatch, error: &DispatchError) -> String {
    format!(
        "settle: dispatch for '{}' failed, {} message(s) were not answered: {}",
        dispatch.key, dispatch.fragment_count, error
    )
}

async fn run_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| DispatchError::Spawn {
            program: program.to_string(),
            source,
        })?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(DispatchError::Exit {
            program: program.to_string(),
            status,
        }),
        Ok(Err(source)) => Err(DispatchError::Spawn {
            program: program.to_string(),
            source,
        }),
        Err(_) => {
            let _ = child.kill().await;
            Err(DispatchError::Timeout {
                program: program.to_string(),
                timeout,
            })
        }
    }
}
