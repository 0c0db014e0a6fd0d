//! Polling bot provider.
//!
//! A stateful conversational backend: each session maps to a remote
//! conversation, reused for up to 25 minutes before a fresh one is created.
//! Prompts are posted as message activities carrying an `[Agent Role: ...]`
//! prefix; replies are fetched by polling the activities endpoint with a
//! watermark cursor until a message from someone other than us appears.
//!
//! The service has no native streaming; when a streaming interface is
//! requested, the final response is replayed word-by-word.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::BotProviderConfig;
use crate::error::ProviderError;
use crate::llm::{
    estimate_tokens, CompletionRequest, LlmProvider, ProviderResponse, ServedBy, TokenSink,
};

const PROVIDER_NAME: &str = "bot";
/// Inter-word delay for the simulated stream.
const SIMULATED_STREAM_DELAY_MS: u64 = 15;

/// A cached remote conversation for one session.
#[derive(Debug, Clone)]
struct Conversation {
    id: String,
    watermark: Option<String>,
    created: Instant,
}

pub struct PollingBotProvider {
    client: Client,
    config: BotProviderConfig,
    /// session id -> live conversation.
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl PollingBotProvider {
    pub fn new(config: BotProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Connection {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            config,
            conversations: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.secret {
            Some(ref secret) => builder.header(
                "Authorization",
                format!("Bearer {}", secret.expose_secret()),
            ),
            None => builder,
        }
    }

    /// Get the session's conversation, creating one if missing or older
    /// than the reuse window.
    async fn conversation_for(&self, session_id: &str) -> Result<Conversation, ProviderError> {
        {
            let conversations = self.conversations.lock().await;
            if let Some(existing) = conversations.get(session_id) {
                if existing.created.elapsed() < self.config.conversation_reuse {
                    return Ok(existing.clone());
                }
            }
        }

        let response = self
            .auth(self.client.post(self.url("conversations")))
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let started: ConversationStarted =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    reason: format!("conversation create parse error: {}", e),
                })?;

        let conversation = Conversation {
            id: started.conversation_id,
            watermark: None,
            created: Instant::now(),
        };
        self.conversations
            .lock()
            .await
            .insert(session_id.to_string(), conversation.clone());
        tracing::debug!(
            session_id,
            conversation_id = %conversation.id,
            "started bot conversation"
        );
        Ok(conversation)
    }

    async fn post_activity(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), ProviderError> {
        let body = ActivityPost {
            activity_type: "message",
            from: ActivityFrom {
                id: self.config.user_id.clone(),
            },
            text: text.to_string(),
        };
        let response = self
            .auth(
                self.client
                    .post(self.url(&format!("conversations/{}/activities", conversation_id))),
            )
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Poll for the newest reply not sent by us, advancing the watermark.
    async fn poll_reply(
        &self,
        session_id: &str,
        conversation_id: &str,
    ) -> Result<Activity, ProviderError> {
        let deadline = Instant::now() + self.config.poll_window;

        while Instant::now() < deadline {
            let watermark = {
                let conversations = self.conversations.lock().await;
                conversations
                    .get(session_id)
                    .and_then(|c| c.watermark.clone())
            };

            let mut url = self.url(&format!("conversations/{}/activities", conversation_id));
            if let Some(ref wm) = watermark {
                url.push_str(&format!("?watermark={}", wm));
            }

            let response = self
                .auth(self.client.get(&url))
                .send()
                .await
                .map_err(classify_reqwest)?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http {
                    provider: PROVIDER_NAME.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }
            let page: ActivityPage =
                response
                    .json()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse {
                        provider: PROVIDER_NAME.to_string(),
                        reason: format!("activities parse error: {}", e),
                    })?;

            if let Some(new_watermark) = page.watermark {
                let mut conversations = self.conversations.lock().await;
                if let Some(conversation) = conversations.get_mut(session_id) {
                    conversation.watermark = Some(new_watermark);
                }
            }

            let reply = page
                .activities
                .into_iter()
                .filter(|a| {
                    a.activity_type.as_deref() == Some("message")
                        && a.from.as_ref().map(|f| f.id.as_str())
                            != Some(self.config.user_id.as_str())
                })
                .last();
            if let Some(reply) = reply {
                return Ok(reply);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        Err(ProviderError::PollExhausted {
            provider: PROVIDER_NAME.to_string(),
        })
    }
}

#[async_trait]
impl LlmProvider for PollingBotProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ProviderResponse, ProviderError> {
        let started = Instant::now();
        let conversation = self.conversation_for(&req.session_id).await?;

        let prompt = role_prefixed(&req.role, &req.prompt);
        self.post_activity(&conversation.id, &prompt).await?;

        let reply = self.poll_reply(&req.session_id, &conversation.id).await?;
        let content = reply.text.unwrap_or_default();

        Ok(ProviderResponse {
            token_count: Some(estimate_tokens(&content)),
            model: self.config.model_id.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
            served_by: ServedBy::Bot,
            activity_id: reply.id,
            timestamp: chrono::Utc::now(),
            content,
        })
    }

    async fn complete_streaming(
        &self,
        req: CompletionRequest,
        sink: TokenSink,
    ) -> Result<ProviderResponse, ProviderError> {
        // No native streaming: replay the final response word-by-word.
        let response = self.complete(req).await?;
        let sink = Arc::clone(&sink);
        let mut first = true;
        for word in response.content.split_whitespace() {
            if first {
                first = false;
            } else {
                sink(" ");
            }
            sink(word);
            tokio::time::sleep(std::time::Duration::from_millis(SIMULATED_STREAM_DELAY_MS)).await;
        }
        Ok(response)
    }
}

/// The role prefix the supervisory bot expects on every prompt.
fn role_prefixed(role: &str, prompt: &str) -> String {
    format!("[Agent Role: {}]\n\n{}", role.to_uppercase(), prompt)
}

fn classify_reqwest(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            provider: PROVIDER_NAME.to_string(),
        }
    } else {
        ProviderError::Connection {
            provider: PROVIDER_NAME.to_string(),
            reason: e.to_string(),
        }
    }
}

// -- Wire types (defensive: only the fields we use) -------------------------

#[derive(Debug, Deserialize)]
struct ConversationStarted {
    #[serde(alias = "conversationId", alias = "id")]
    conversation_id: String,
}

#[derive(Debug, Serialize)]
struct ActivityPost {
    #[serde(rename = "type")]
    activity_type: &'static str,
    from: ActivityFrom,
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActivityFrom {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Activity {
    #[serde(rename = "type", default)]
    activity_type: Option<String>,
    #[serde(default)]
    from: Option<ActivityFrom>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActivityPage {
    #[serde(default)]
    activities: Vec<Activity>,
    #[serde(default)]
    watermark: Option<String>,
}
