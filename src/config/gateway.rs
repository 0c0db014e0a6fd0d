//! Agent Gateway configuration.

use std::time::Duration;

use crate::config::helpers::parse_optional_env;
use crate::error::ConfigError;

/// Configuration for the gateway's bounded chat-provider queue.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Concurrent chat-provider invocations allowed.
    pub concurrency: usize,
    /// Pending invocations allowed before `QueueFull`.
    pub queue_cap: usize,
    /// Queue waits longer than this emit an alert.
    pub wait_alert_after: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            queue_cap: 64,
            wait_alert_after: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            concurrency: parse_optional_env("GATEWAY_CONCURRENCY", defaults.concurrency)?,
            queue_cap: parse_optional_env("GATEWAY_QUEUE_CAP", defaults.queue_cap)?,
            wait_alert_after: defaults.wait_alert_after,
        })
    }
}
