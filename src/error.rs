//! Error types for AutoForge.
//!
//! Each subsystem has its own error enum; everything converges on the
//! top-level [`Error`] for callers that don't care which layer failed.

use thiserror::Error;

/// Configuration resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    MissingVar { var: String },

    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: String, reason: String },
}

/// Errors from the secure-shell transport to the remote container engine.
///
/// Categorized so callers can distinguish auth problems from plain
/// connectivity failures. Non-zero remote exits whose stderr contains only
/// warnings are not errors at all; see `sandbox::transport`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("permission denied on remote host: {detail}")]
    PermissionDenied { detail: String },

    #[error("transport timeout after {timeout_secs}s running `{command}`")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("ssh invocation failed: {detail}")]
    SshFailed { detail: String },

    #[error("container engine failed (exit {exit_code}) running `{command}`: {detail}")]
    EngineFailed {
        command: String,
        exit_code: i32,
        detail: String,
    },
}

/// Errors from an LLM provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level failure reaching the provider (connection refused,
    /// reset, DNS, fetch failure). Retryable.
    #[error("{provider}: connection failed: {reason}")]
    Connection { provider: String, reason: String },

    /// The request exceeded its deadline. Retryable.
    #[error("{provider}: request timed out")]
    Timeout { provider: String },

    /// The provider answered with a non-success HTTP status. Not retryable.
    #[error("{provider}: HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// The provider answered 2xx but the payload was unusable. Not retryable.
    #[error("{provider}: invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    /// The polling window elapsed without a reply from the bot.
    #[error("{provider}: no reply within the polling window")]
    PollExhausted { provider: String },

    /// Both the primary and the fallback chat endpoint failed.
    #[error("all chat providers failed (primary: {primary}; fallback: {fallback})")]
    AllProvidersFailed { primary: String, fallback: String },
}

impl ProviderError {
    /// `true` for the transient network classes that the gateway retry
    /// wrapper is allowed to re-attempt. Everything else propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Errors from a bounded FIFO slot queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{name} queue is full ({depth} pending)")]
    Full { name: &'static str, depth: usize },

    #[error("{name} queue was shut down while waiting")]
    Closed { name: &'static str },
}

/// Errors from the Agent Gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway queue rejected the request: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors from the Sandbox Manager.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no running container for session {session_id}")]
    NotFound { session_id: String },

    #[error("a container already exists for session {session_id}")]
    AlreadyExists { session_id: String },

    #[error("creation queue rejected the request: {0}")]
    Queue(#[from] QueueError),

    #[error("path escapes the container workspace: {path}")]
    PathEscape { path: String },
}

/// Errors from the Execution Orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("an execution is already running for session {session_id}")]
    AlreadyRunning { session_id: String },

    #[error("no execution found for session {session_id}")]
    NotFound { session_id: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("{phase} agent failed: {reason}")]
    AgentFailed { phase: String, reason: String },
}

/// Top-level error for callers that span subsystems.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
