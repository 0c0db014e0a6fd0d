//! Agent capabilities consumed by the orchestrator.
//!
//! The orchestrator drives a trio of callable agents. Each is a capability
//! taking a prompt (and optionally the approved plan) and returning a text
//! artifact; the default implementation routes through the Agent Gateway,
//! but tests substitute scripted agents freely.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::gateway::{AgentGateway, Complexity, GatewayRequest};

/// The closed set of roles in an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Planner,
    Builder,
    Fixer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::Fixer => "fixer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text artifact returned by an agent.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    pub token_count: Option<u32>,
    pub model: Option<String>,
}

/// A callable agent capability.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn invoke(&self, prompt: &str, plan: Option<&str>) -> Result<AgentReply, ProviderError>;
}

/// The trio of agents driving one execution.
#[derive(Clone)]
pub struct AgentSet {
    pub planner: Arc<dyn Agent>,
    pub builder: Arc<dyn Agent>,
    pub fixer: Arc<dyn Agent>,
}

impl AgentSet {
    /// Build a trio whose members invoke the gateway under their role.
    pub fn via_gateway(
        gateway: Arc<AgentGateway>,
        session_id: &str,
        complexity: Complexity,
    ) -> Self {
        let agent = |role: AgentRole| -> Arc<dyn Agent> {
            Arc::new(GatewayAgent {
                gateway: Arc::clone(&gateway),
                session_id: session_id.to_string(),
                role,
                complexity,
            })
        };
        Self {
            planner: agent(AgentRole::Planner),
            builder: agent(AgentRole::Builder),
            fixer: agent(AgentRole::Fixer),
        }
    }
}

/// Adapter: an [`Agent`] backed by the Agent Gateway.
struct GatewayAgent {
    gateway: Arc<AgentGateway>,
    session_id: String,
    role: AgentRole,
    complexity: Complexity,
}

#[async_trait]
impl Agent for GatewayAgent {
    async fn invoke(&self, prompt: &str, plan: Option<&str>) -> Result<AgentReply, ProviderError> {
        let response = self
            .gateway
            .invoke(GatewayRequest {
                session_id: self.session_id.clone(),
                role: self.role.as_str().to_string(),
                prompt: prompt.to_string(),
                complexity: self.complexity,
                approved_plan: plan.map(str::to_string),
            })
            .await
            .map_err(|e| match e {
                crate::error::GatewayError::Provider(p) => p,
                crate::error::GatewayError::Queue(q) => ProviderError::Connection {
                    provider: "gateway".to_string(),
                    reason: q.to_string(),
                },
            })?;
        Ok(AgentReply {
            content: response.content,
            token_count: response.token_count,
            model: Some(response.model),
        })
    }
}
