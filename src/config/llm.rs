//! LLM provider configuration.

use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// Model identifiers used by adaptive routing.
///
/// The chat provider picks between these per request; the bot provider has
/// a single fixed model and ignores them.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    /// Highest-quality model, pinned for planning and complex builds.
    pub large: String,
    /// Mid-tier model for queue-pressure and pattern-heavy work.
    pub mid: String,
    /// Small model for simple work under heavy queue pressure.
    pub small: String,
    /// Small model pinned for the fixer role.
    pub fixer: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            large: "qwen2.5-coder-32b".to_string(),
            mid: "qwen2.5-coder-14b".to_string(),
            small: "qwen2.5-coder-7b".to_string(),
            fixer: "qwen2.5-coder-7b".to_string(),
        }
    }
}

/// Configuration for the OpenAI-compatible chat-completions provider.
#[derive(Debug, Clone)]
pub struct ChatProviderConfig {
    /// Primary endpoint base URL (GPU-backed, bearer auth).
    pub primary_url: String,
    /// Bearer key for the primary endpoint.
    pub primary_key: Option<SecretString>,
    /// Fallback endpoint base URL (CPU-backed, no auth). Optional.
    pub fallback_url: Option<String>,
    /// Request timeout against the primary endpoint.
    pub primary_timeout: Duration,
    /// Non-streaming request timeout against the fallback endpoint.
    pub fallback_timeout: Duration,
    /// Streaming request timeout against the fallback endpoint.
    pub fallback_stream_timeout: Duration,
}

impl Default for ChatProviderConfig {
    fn default() -> Self {
        Self {
            primary_url: "http://127.0.0.1:8000".to_string(),
            primary_key: None,
            fallback_url: None,
            primary_timeout: Duration::from_millis(120_000),
            fallback_timeout: Duration::from_secs(600),
            fallback_stream_timeout: Duration::from_secs(900),
        }
    }
}

/// Configuration for the polling bot provider.
#[derive(Debug, Clone)]
pub struct BotProviderConfig {
    /// Base URL of the bot conversation service.
    pub base_url: String,
    /// Bearer secret for the conversation service.
    pub secret: Option<SecretString>,
    /// The constant user id this process posts activities as.
    pub user_id: String,
    /// Fixed model identifier reported in results.
    pub model_id: String,
    /// How long a conversation is reused before a fresh one is created.
    pub conversation_reuse: Duration,
    /// Total polling window for a single reply.
    pub poll_window: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
}

impl Default for BotProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://directline.botframework.com/v3/directline".to_string(),
            secret: None,
            user_id: "autoforge-orchestrator".to_string(),
            model_id: "bot-directline".to_string(),
            conversation_reuse: Duration::from_secs(25 * 60),
            poll_window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Aggregate LLM configuration.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub chat: ChatProviderConfig,
    pub bot: BotProviderConfig,
    pub models: ModelCatalog,
}

impl LlmConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let chat_defaults = ChatProviderConfig::default();
        let bot_defaults = BotProviderConfig::default();
        let model_defaults = ModelCatalog::default();

        let chat_timeout_ms: u64 = parse_optional_env("CHAT_TIMEOUT", 120_000)?;

        Ok(Self {
            chat: ChatProviderConfig {
                primary_url: parse_string_env("CHAT_PRIMARY_URL", &chat_defaults.primary_url),
                primary_key: optional_env("CHAT_PRIMARY_KEY").map(SecretString::from),
                fallback_url: optional_env("CHAT_FALLBACK_URL"),
                primary_timeout: Duration::from_millis(chat_timeout_ms),
                fallback_timeout: chat_defaults.fallback_timeout,
                fallback_stream_timeout: chat_defaults.fallback_stream_timeout,
            },
            bot: BotProviderConfig {
                base_url: parse_string_env("BOT_BASE_URL", &bot_defaults.base_url),
                secret: optional_env("BOT_SECRET").map(SecretString::from),
                user_id: parse_string_env("BOT_USER_ID", &bot_defaults.user_id),
                model_id: parse_string_env("BOT_MODEL_ID", &bot_defaults.model_id),
                ..bot_defaults
            },
            models: ModelCatalog {
                large: parse_string_env("MODEL_LARGE", &model_defaults.large),
                mid: parse_string_env("MODEL_MID", &model_defaults.mid),
                small: parse_string_env("MODEL_SMALL", &model_defaults.small),
                fixer: parse_string_env("MODEL_FIXER", &model_defaults.fixer),
            },
        })
    }
}
