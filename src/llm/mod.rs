//! LLM provider adapters.
//!
//! Two backends sit behind the [`LlmProvider`] trait: a synchronous
//! polling-based conversational bot ([`bot::PollingBotProvider`]) and an
//! OpenAI-compatible chat-completions service with streaming and
//! primary/fallback failover ([`chat::ChatCompletionsProvider`]).

pub mod bot;
pub mod chat;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Which concrete backend served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedBy {
    /// Primary chat endpoint.
    Primary,
    /// Fallback chat endpoint.
    Fallback,
    /// Polling bot service.
    Bot,
}

impl ServedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Bot => "bot",
        }
    }
}

impl std::fmt::Display for ServedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A completion request handed to a provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Session the request belongs to (drives bot conversation reuse).
    pub session_id: String,
    /// Agent role name, used by the bot provider's role-prefixed prompt.
    pub role: String,
    /// Model to use. The bot provider ignores this.
    pub model: String,
    /// Optional system prompt prepended to the conversation.
    pub system_prompt: Option<String>,
    /// The user prompt.
    pub prompt: String,
}

/// A completed provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub latency_ms: u64,
    /// Token count when the backend reports usage; estimated otherwise.
    pub token_count: Option<u32>,
    pub served_by: ServedBy,
    /// Bot activity id, when the bot provider served the request.
    pub activity_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-token callback used by streaming completions.
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// A backend capable of serving completion requests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Run a completion to completion and return the full response.
    async fn complete(&self, req: CompletionRequest) -> Result<ProviderResponse, ProviderError>;

    /// Run a streaming completion, invoking `sink` for every content chunk,
    /// and return the accumulated response. Backends without native
    /// streaming emulate it.
    async fn complete_streaming(
        &self,
        req: CompletionRequest,
        sink: TokenSink,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Rough token estimate for backends that report no usage.
pub(crate) fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count().min(u32::MAX as usize) as u32
}
