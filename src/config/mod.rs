//! Configuration for AutoForge.
//!
//! Everything resolves env-var-first with typed defaults. `.env` is loaded
//! once at startup via dotenvy; API keys are held as `SecretString` and
//! never logged.

pub(crate) mod helpers;

mod gateway;
mod llm;
mod sandbox;

pub use self::gateway::GatewayConfig;
pub use self::llm::{BotProviderConfig, ChatProviderConfig, LlmConfig, ModelCatalog};
pub use self::sandbox::SandboxConfig;

use crate::error::ConfigError;

/// Main configuration for the orchestrator process.
#[derive(Debug, Clone)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub llm: LlmConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Ok(Self {
            sandbox: SandboxConfig::resolve()?,
            llm: LlmConfig::resolve()?,
            gateway: GatewayConfig::resolve()?,
        })
    }
}
