//! Agent Gateway with adaptive routing.
//!
//! The gateway sits between agent callers and the two LLM backends:
//!
//! - classifies each request (role → provider, prompt → intent),
//! - picks a chat model from role, declared complexity, intent, and the
//!   current builder-queue depth,
//! - bounds chat-provider concurrency with a FIFO queue (waits recorded,
//!   long waits alerted),
//! - wraps chat invocations with bounded exponential-backoff retry,
//! - composes the approved-plan prompt for execution roles.
//!
//! The bot provider has no queue and no retry wrapper; supervisory traffic
//! goes straight through.

pub mod routing;

pub use routing::{Complexity, Intent, ModelChoice, ProviderKind};

use std::sync::Arc;

use crate::config::{GatewayConfig, ModelCatalog};
use crate::error::GatewayError;
use crate::llm::retry::{with_retry, RetryPolicy};
use crate::llm::{CompletionRequest, LlmProvider, ProviderResponse, TokenSink};
use crate::queue::{QueueStats, SlotQueue};

/// Role-specific system prompts. Fixed strings owned by the deployment.
const SYSTEM_PROMPTS: &[(&str, &str)] = &[
    (
        "planner",
        "You are a senior software architect. Produce a concise, numbered \
         implementation plan for the requested system. List the files to \
         create and what each contains. Do not write code.",
    ),
    (
        "builder",
        "You are an expert full-stack engineer. Implement the request \
         completely. Emit every file as a fenced code block whose first \
         line is `// filepath: <relative/path>`. No commentary between \
         blocks.",
    ),
    (
        "fixer",
        "You are a debugging specialist. Analyze the reported errors and \
         produce corrected code. Emit complete files as fenced code blocks \
         whose first line is `// filepath: <relative/path>`.",
    ),
];

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a capable software engineering agent. Follow the instructions precisely.";

/// Roles whose prompts are composed with the approved plan.
const PLAN_CONSUMING_ROLES: &[&str] = &["builder", "coder", "executor"];

/// A request into the gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub session_id: String,
    pub role: String,
    pub prompt: String,
    pub complexity: Complexity,
    /// Plan previously produced by the planner and promoted by the caller.
    pub approved_plan: Option<String>,
}

/// The routing decision made for one request, surfaced for observability.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub provider: ProviderKind,
    pub intent: Intent,
    pub model: String,
    pub reason: String,
}

pub struct AgentGateway {
    bot: Arc<dyn LlmProvider>,
    chat: Arc<dyn LlmProvider>,
    models: ModelCatalog,
    chat_queue: SlotQueue,
    retry: RetryPolicy,
}

impl AgentGateway {
    pub fn new(
        bot: Arc<dyn LlmProvider>,
        chat: Arc<dyn LlmProvider>,
        models: ModelCatalog,
        config: GatewayConfig,
    ) -> Self {
        Self {
            bot,
            chat,
            models,
            chat_queue: SlotQueue::new(
                "gateway-chat",
                config.concurrency,
                config.queue_cap,
                config.wait_alert_after,
            ),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry schedule (tests use fast or empty schedules).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Decide provider, intent, and model for a request without invoking it.
    pub fn route(&self, req: &GatewayRequest) -> RouteDecision {
        let provider = routing::route_role(&req.role);
        let intent = routing::detect_intent(&req.prompt);
        let choice = match provider {
            ProviderKind::Bot => ModelChoice {
                model: String::new(),
                reason: "bot_fixed_model".to_string(),
            },
            ProviderKind::Chat => routing::select_model(
                &req.role,
                req.complexity,
                intent,
                self.chat_queue.depth(),
                &self.models,
            ),
        };
        RouteDecision {
            provider,
            intent,
            model: choice.model,
            reason: choice.reason,
        }
    }

    /// Invoke the routed provider and return its full response.
    pub async fn invoke(&self, req: GatewayRequest) -> Result<ProviderResponse, GatewayError> {
        self.dispatch(req, None).await
    }

    /// Invoke the routed provider, streaming tokens into `sink`.
    pub async fn invoke_streaming(
        &self,
        req: GatewayRequest,
        sink: TokenSink,
    ) -> Result<ProviderResponse, GatewayError> {
        self.dispatch(req, Some(sink)).await
    }

    /// Read-only view of the chat queue.
    pub fn queue_stats(&self) -> QueueStats {
        self.chat_queue.stats()
    }

    async fn dispatch(
        &self,
        req: GatewayRequest,
        sink: Option<TokenSink>,
    ) -> Result<ProviderResponse, GatewayError> {
        let decision = self.route(&req);
        tracing::debug!(
            session_id = %req.session_id,
            role = %req.role,
            provider = ?decision.provider,
            intent = decision.intent.as_str(),
            model = %decision.model,
            reason = %decision.reason,
            "routed agent request"
        );

        let completion = CompletionRequest {
            session_id: req.session_id.clone(),
            role: req.role.clone(),
            model: decision.model,
            system_prompt: Some(system_prompt_for(&req.role).to_string()),
            prompt: compose_prompt(&req),
        };

        match decision.provider {
            ProviderKind::Bot => {
                let result = match sink {
                    Some(sink) => self.bot.complete_streaming(completion, sink).await,
                    None => self.bot.complete(completion).await,
                };
                Ok(result?)
            }
            ProviderKind::Chat => {
                let _permit = self.chat_queue.acquire().await.map_err(GatewayError::Queue)?;
                let result = match sink {
                    Some(sink) => {
                        with_retry(&self.retry, || {
                            self.chat
                                .complete_streaming(completion.clone(), Arc::clone(&sink))
                        })
                        .await
                    }
                    None => {
                        with_retry(&self.retry, || self.chat.complete(completion.clone())).await
                    }
                };
                Ok(result?)
            }
        }
    }
}

/// The system prompt for a role (fixed table, generic default).
pub fn system_prompt_for(role: &str) -> &'static str {
    let normalized = role.trim().to_lowercase();
    SYSTEM_PROMPTS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, prompt)| *prompt)
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
}

/// Compose the final user prompt: execution roles with an approved plan get
/// the plan-implementation preamble, everything else passes through.
fn compose_prompt(req: &GatewayRequest) -> String {
    let normalized = req.role.trim().to_lowercase();
    match req.approved_plan {
        Some(ref plan) if PLAN_CONSUMING_ROLES.contains(&normalized.as_str()) => format!(
            "APPROVED PLAN:\n{}\n\nNow implement this plan fully. Generate all files.\n\nOriginal request: {}",
            plan, req.prompt
        ),
        _ => req.prompt.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::ProviderError;
    use crate::llm::ServedBy;

    /// A mock provider that records requests and replies from a script.
    struct MockProvider {
        name: &'static str,
        served_by: ServedBy,
        requests: Mutex<Vec<CompletionRequest>>,
        failures_before_success: AtomicUsize,
        delay: Duration,
    }

    impl MockProvider {
        fn ok(name: &'static str, served_by: ServedBy) -> Self {
            Self {
                name,
                served_by,
                requests: Mutex::new(Vec::new()),
                failures_before_success: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn flaky(name: &'static str, failures: usize) -> Self {
            Self {
                failures_before_success: AtomicUsize::new(failures),
                ..Self::ok(name, ServedBy::Primary)
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok(name, ServedBy::Primary)
            }
        }

        fn last_request(&self) -> CompletionRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn complete(
            &self,
            req: CompletionRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.requests.lock().unwrap().push(req.clone());
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::Connection {
                    provider: self.name.to_string(),
                    reason: "synthetic outage".to_string(),
                });
            }
            Ok(ProviderResponse {
                content: format!("{} reply", self.name),
                model: req.model,
                latency_ms: 1,
                token_count: Some(2),
                served_by: self.served_by,
                activity_id: None,
                timestamp: chrono::Utc::now(),
            })
        }

        async fn complete_streaming(
            &self,
            req: CompletionRequest,
            sink: TokenSink,
        ) -> Result<ProviderResponse, ProviderError> {
            let response = self.complete(req).await?;
            sink(&response.content);
            Ok(response)
        }
    }

    fn catalog() -> ModelCatalog {
        ModelCatalog {
            large: "large".into(),
            mid: "mid".into(),
            small: "small".into(),
            fixer: "fixer-small".into(),
        }
    }

    fn gateway_with(bot: Arc<MockProvider>, chat: Arc<MockProvider>) -> AgentGateway {
        AgentGateway::new(bot, chat, catalog(), GatewayConfig::default())
            .with_retry_policy(RetryPolicy {
                delays: vec![Duration::from_millis(1); 3],
            })
    }

    fn request(role: &str, prompt: &str) -> GatewayRequest {
        GatewayRequest {
            session_id: "s1".to_string(),
            role: role.to_string(),
            prompt: prompt.to_string(),
            complexity: Complexity::Medium,
            approved_plan: None,
        }
    }

    #[tokio::test]
    async fn supervisory_roles_hit_the_bot() {
        let bot = Arc::new(MockProvider::ok("bot", ServedBy::Bot));
        let chat = Arc::new(MockProvider::ok("chat", ServedBy::Primary));
        let gateway = gateway_with(Arc::clone(&bot), Arc::clone(&chat));

        let response = gateway.invoke(request("planner", "plan a thing")).await.unwrap();
        assert_eq!(response.served_by, ServedBy::Bot);
        assert!(chat.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn execution_roles_hit_chat_with_selected_model() {
        let bot = Arc::new(MockProvider::ok("bot", ServedBy::Bot));
        let chat = Arc::new(MockProvider::ok("chat", ServedBy::Primary));
        let gateway = gateway_with(bot, Arc::clone(&chat));

        let mut req = request("builder", "a CRUD api for pets");
        req.complexity = Complexity::Complex;
        gateway.invoke(req).await.unwrap();

        let seen = chat.last_request();
        assert_eq!(seen.model, "mid"); // complex + crud intent
    }

    #[tokio::test]
    async fn approved_plan_is_composed_for_builders_only() {
        let bot = Arc::new(MockProvider::ok("bot", ServedBy::Bot));
        let chat = Arc::new(MockProvider::ok("chat", ServedBy::Primary));
        let gateway = gateway_with(Arc::clone(&bot), Arc::clone(&chat));

        let mut req = request("builder", "make it");
        req.approved_plan = Some("1. do the thing".to_string());
        gateway.invoke(req).await.unwrap();
        let prompt = chat.last_request().prompt;
        assert!(prompt.starts_with("APPROVED PLAN:\n1. do the thing"));
        assert!(prompt.contains("Now implement this plan fully. Generate all files."));
        assert!(prompt.ends_with("Original request: make it"));

        let mut req = request("planner", "make it");
        req.approved_plan = Some("1. do the thing".to_string());
        gateway.invoke(req).await.unwrap();
        assert_eq!(bot.last_request().prompt, "make it");
    }

    #[tokio::test]
    async fn transient_chat_failures_are_retried() {
        let bot = Arc::new(MockProvider::ok("bot", ServedBy::Bot));
        let chat = Arc::new(MockProvider::flaky("chat", 2));
        let gateway = gateway_with(bot, Arc::clone(&chat));

        let response = gateway.invoke(request("builder", "retry me")).await.unwrap();
        assert_eq!(response.content, "chat reply");
        assert_eq!(chat.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn chat_concurrency_is_bounded() {
        let bot = Arc::new(MockProvider::ok("bot", ServedBy::Bot));
        let chat = Arc::new(MockProvider::slow("chat", Duration::from_millis(30)));
        let gateway = Arc::new(
            AgentGateway::new(
                bot,
                chat,
                catalog(),
                GatewayConfig {
                    concurrency: 2,
                    queue_cap: 64,
                    wait_alert_after: Duration::from_secs(120),
                },
            )
            .with_retry_policy(RetryPolicy::none()),
        );

        let mut handles = Vec::new();
        for _ in 0..5 {
            let gateway = Arc::clone(&gateway);
            handles.push(tokio::spawn(async move {
                gateway.invoke(request("builder", "work")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stats = gateway.queue_stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.served, 5);
    }

    #[tokio::test]
    async fn streaming_invocations_feed_the_sink() {
        let bot = Arc::new(MockProvider::ok("bot", ServedBy::Bot));
        let chat = Arc::new(MockProvider::ok("chat", ServedBy::Primary));
        let gateway = gateway_with(bot, chat);

        let chunks = Arc::new(Mutex::new(String::new()));
        let chunks2 = Arc::clone(&chunks);
        let sink: crate::llm::TokenSink = Arc::new(move |chunk: &str| {
            chunks2.lock().unwrap().push_str(chunk);
        });

        let response = gateway
            .invoke_streaming(request("builder", "stream it"), sink)
            .await
            .unwrap();
        assert_eq!(response.content, "chat reply");
        assert_eq!(*chunks.lock().unwrap(), "chat reply");
    }

    #[test]
    fn system_prompts_resolve_by_role() {
        assert!(system_prompt_for("planner").contains("architect"));
        assert!(system_prompt_for("builder").contains("filepath"));
        assert!(system_prompt_for("FIXER").contains("debugging"));
        assert_eq!(system_prompt_for("unknown"), DEFAULT_SYSTEM_PROMPT);
    }
}
