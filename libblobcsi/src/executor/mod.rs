//! Blobfuse mount execution.
//!
//! The controller only sees [`MountExecutor`]. [`LocalMountExecutor`] runs
//! the helper as a child process; [`ProxyMountExecutor`] forwards the same
//! call to a `mount-proxy` server, which runs a local executor on the host.

mod proxy;

pub use proxy::{MountProxyHandler, ProxyMountExecutor};

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

use crate::credentials::redact_env;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("{reason}, output: {output}")]
    Failed { reason: String, output: String },

    /// The local wait expired. The mount may or may not have happened.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("mount helper unavailable: {0}")]
    Unavailable(String),
}

/// Runs the blobfuse mount helper.
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// `args` is the whitespace-separated argument string (target path
    /// first), `auth_env` a list of `KEY=VALUE` entries. Returns the
    /// helper's combined output.
    async fn mount(&self, args: &str, auth_env: &[String]) -> Result<String, ExecutorError>;
}

pub struct LocalMountExecutor {
    helper: PathBuf,
}

impl LocalMountExecutor {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }
}

#[async_trait]
impl MountExecutor for LocalMountExecutor {
    #[instrument(skip_all, fields(helper = %self.helper.display()))]
    async fn mount(&self, args: &str, auth_env: &[String]) -> Result<String, ExecutorError> {
        info!(args, env = ?redact_env(auth_env), "running mount helper");

        let mut cmd = tokio::process::Command::new(&self.helper);
        cmd.args(args.split_whitespace())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for entry in auth_env {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }

        let output = cmd.output().await.map_err(|e| {
            ExecutorError::Unavailable(format!("spawn {}: {e}", self.helper.display()))
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ExecutorError::Failed {
                reason: output.status.to_string(),
                output: combined,
            });
        }
        Ok(combined)
    }
}
