//! Per-instance error taxonomy.
//!
//! Every variant here is fatal for the instance that raised it and is caught
//! at the orchestrator boundary; none of them abort the batch. Timeouts are
//! a distinct kind so a killed command is never mistaken for a test failure.

use thiserror::Error;

/// Repository clone/checkout failures (after the single retry).
#[derive(Debug, Error)]
pub enum CloneError {
    #[error("failed to clone {repo}: {detail}")]
    CloneFailed { repo: String, detail: String },
    #[error("failed to check out {commit}: {detail}")]
    CheckoutFailed { commit: String, detail: String },
    #[error("git clone timed out after {limit_secs}s for {repo}")]
    Timeout { repo: String, limit_secs: u64 },
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

/// Container runtime failures.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container provisioning failed: {0}")]
    Provision(String),
    #[error("docker command failed: {0}")]
    Docker(String),
    #[error("command timed out after {limit_secs}s")]
    Timeout { limit_secs: u64 },
}

impl ContainerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ContainerError::Timeout { .. })
    }
}

/// All patch application strategies were exhausted.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("all patch strategies exhausted for {label}: {diagnostic}")]
    Exhausted { label: String, diagnostic: String },
    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Best-effort stub generation failed. Never fatal: the orchestrator reverts
/// the workspace and continues without stubs.
#[derive(Debug, Error)]
#[error("stub generation failed: {0}")]
pub struct StubError(pub String);
