//! OpenAI-compatible chat-completions provider.
//!
//! Two endpoints are tried in order: **primary** (GPU-backed, bearer auth,
//! tight timeout) and **fallback** (CPU-backed, no auth, generous timeout).
//! Any primary failure, HTTP or transport, falls through to the fallback;
//! when both fail the call raises `AllProvidersFailed`.
//!
//! Streaming consumes Server-Sent-Event lines from `bytes_stream()`; each
//! `data:` payload carries `choices[0].delta.content` and the stream ends
//! on the `[DONE]` sentinel or socket close.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::ChatProviderConfig;
use crate::error::ProviderError;
use crate::llm::{
    estimate_tokens, CompletionRequest, LlmProvider, ProviderResponse, Role, ServedBy, TokenSink,
};

const PROVIDER_NAME: &str = "chat";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Streaming progress is logged at least this often.
const STREAM_PROGRESS_EVERY: Duration = Duration::from_secs(5);

pub struct ChatCompletionsProvider {
    client: Client,
    config: ChatProviderConfig,
}

/// One endpoint in the failover order.
struct Endpoint {
    served_by: ServedBy,
    url: String,
    bearer: Option<String>,
    timeout: Duration,
}

impl ChatCompletionsProvider {
    pub fn new(config: ChatProviderConfig) -> Result<Self, ProviderError> {
        // Per-request timeouts differ between endpoints, so the client
        // itself carries none.
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Connection {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    fn completions_url(base: &str) -> String {
        let base = base.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn endpoints(&self, streaming: bool) -> Vec<Endpoint> {
        let mut endpoints = vec![Endpoint {
            served_by: ServedBy::Primary,
            url: Self::completions_url(&self.config.primary_url),
            bearer: self
                .config
                .primary_key
                .as_ref()
                .map(|k| k.expose_secret().to_string()),
            timeout: self.config.primary_timeout,
        }];
        if let Some(ref fallback) = self.config.fallback_url {
            endpoints.push(Endpoint {
                served_by: ServedBy::Fallback,
                url: Self::completions_url(fallback),
                bearer: None,
                timeout: if streaming {
                    self.config.fallback_stream_timeout
                } else {
                    self.config.fallback_timeout
                },
            });
        }
        endpoints
    }

    fn build_messages(req: &CompletionRequest) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = req.system_prompt {
            messages.push(WireMessage {
                role: role_str(Role::System),
                content: system.clone(),
            });
        }
        messages.push(WireMessage {
            role: role_str(Role::User),
            content: req.prompt.clone(),
        });
        messages
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        body: &WireRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(&endpoint.url)
            .timeout(endpoint.timeout)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(ref bearer) = endpoint.bearer {
            builder = builder.header("Authorization", format!("Bearer {}", bearer));
        }

        let response = builder.send().await.map_err(|e| classify_reqwest(e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: PROVIDER_NAME.to_string(),
                status: status.as_u16(),
                body: truncate(&body_text, 512),
            });
        }
        Ok(response)
    }

    /// Run `op` against primary then fallback. With a single configured
    /// endpoint its error propagates untouched (and stays retryable for the
    /// gateway); with both configured a double failure collapses into
    /// `AllProvidersFailed`.
    async fn with_failover<T, F, Fut>(
        &self,
        streaming: bool,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut(Endpoint) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let endpoints = self.endpoints(streaming);
        let single = endpoints.len() == 1;
        let mut primary_error: Option<ProviderError> = None;

        for endpoint in endpoints {
            let served_by = endpoint.served_by;
            match op(endpoint).await {
                Ok(result) => return Ok(result),
                Err(e) if single => return Err(e),
                Err(e) => match served_by {
                    ServedBy::Primary => {
                        tracing::warn!(
                            error = %e,
                            "primary chat endpoint failed, attempting fallback"
                        );
                        primary_error = Some(e);
                    }
                    _ => {
                        return Err(ProviderError::AllProvidersFailed {
                            primary: primary_error
                                .map(|p| p.to_string())
                                .unwrap_or_else(|| "unknown".to_string()),
                            fallback: e.to_string(),
                        });
                    }
                },
            }
        }
        Err(ProviderError::InvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            reason: "failover loop exhausted without an outcome".to_string(),
        })
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn complete(&self, req: CompletionRequest) -> Result<ProviderResponse, ProviderError> {
        let body = WireRequest {
            model: req.model.clone(),
            messages: Self::build_messages(&req),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: false,
        };

        let started = Instant::now();
        self.with_failover(false, |endpoint| {
            let body = body.clone();
            async move {
                let served_by = endpoint.served_by;
                let response = self.send(&endpoint, &body).await?;
                let parsed: WireResponse =
                    response
                        .json()
                        .await
                        .map_err(|e| ProviderError::InvalidResponse {
                            provider: PROVIDER_NAME.to_string(),
                            reason: format!("JSON parse error: {}", e),
                        })?;

                let choice =
                    parsed
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| ProviderError::InvalidResponse {
                            provider: PROVIDER_NAME.to_string(),
                            reason: "no choices in response".to_string(),
                        })?;
                let content = choice
                    .message
                    .map(|m| m.content.unwrap_or_default())
                    .unwrap_or_default();

                let token_count = parsed
                    .usage
                    .and_then(|u| u.total_tokens)
                    .map(|t| t.min(u64::from(u32::MAX)) as u32)
                    .unwrap_or_else(|| estimate_tokens(&content));

                Ok(ProviderResponse {
                    model: parsed.model.unwrap_or_else(|| body.model.clone()),
                    latency_ms: started.elapsed().as_millis() as u64,
                    token_count: Some(token_count),
                    served_by,
                    activity_id: None,
                    timestamp: chrono::Utc::now(),
                    content,
                })
            }
        })
        .await
    }

    async fn complete_streaming(
        &self,
        req: CompletionRequest,
        sink: TokenSink,
    ) -> Result<ProviderResponse, ProviderError> {
        let body = WireRequest {
            model: req.model.clone(),
            messages: Self::build_messages(&req),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: true,
        };

        let started = Instant::now();
        self.with_failover(true, |endpoint| {
            let body = body.clone();
            let sink = Arc::clone(&sink);
            async move {
                let served_by = endpoint.served_by;
                let response = self.send(&endpoint, &body).await?;
                let content = consume_sse(response, &sink).await?;

                let token_count = estimate_tokens(&content);
                Ok(ProviderResponse {
                    model: body.model.clone(),
                    latency_ms: started.elapsed().as_millis() as u64,
                    token_count: Some(token_count),
                    served_by,
                    activity_id: None,
                    timestamp: chrono::Utc::now(),
                    content,
                })
            }
        })
        .await
    }
}

/// Drain an SSE response, feeding content deltas to `sink`.
async fn consume_sse(
    response: reqwest::Response,
    sink: &TokenSink,
) -> Result<String, ProviderError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut content = String::new();
    let mut last_progress = Instant::now();

    'outer: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| classify_reqwest(e))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            let line = line.trim();
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                break 'outer;
            }
            // Malformed interleaved payloads (keepalives, partial JSON) are
            // skipped rather than failing the whole stream.
            let Ok(event) = serde_json::from_str::<WireStreamEvent>(payload) else {
                continue;
            };
            if let Some(delta) = event
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
            {
                if !delta.is_empty() {
                    content.push_str(&delta);
                    sink(&delta);
                }
            }
        }

        if last_progress.elapsed() >= STREAM_PROGRESS_EVERY {
            tracing::debug!(chars = content.len(), "streaming completion in progress");
            last_progress = Instant::now();
        }
    }

    Ok(content)
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

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

// -- Wire types (defensive: only the fields we use) -------------------------

#[derive(Debug, Clone, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireStreamEvent {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_joins_correctly() {
        assert_eq!(
            ChatCompletionsProvider::completions_url("http://gpu:8000"),
            "http://gpu:8000/v1/chat/completions"
        );
        assert_eq!(
            ChatCompletionsProvider::completions_url("http://gpu:8000/"),
            "http://gpu:8000/v1/chat/completions"
        );
        assert_eq!(
            ChatCompletionsProvider::completions_url("http://gpu:8000/v1"),
            "http://gpu:8000/v1/chat/completions"
        );
    }

    #[test]
    fn stream_event_parses_delta_content() {
        let payload = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"hi"}}]}"#;
        let event: WireStreamEvent = serde_json::from_str(payload).unwrap();
        let delta = event.choices.into_iter().next().unwrap().delta.unwrap();
        assert_eq!(delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn stream_event_tolerates_unknown_fields_and_missing_delta() {
        let payload = r#"{"surprise":true,"choices":[{"finish_reason":"stop"}]}"#;
        let event: WireStreamEvent = serde_json::from_str(payload).unwrap();
        assert!(event.choices[0].delta.is_none());
    }

    #[test]
    fn response_parses_minimal_shape() {
        let payload = r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#;
        let parsed: WireResponse = serde_json::from_str(payload).unwrap();
        let content = parsed.choices[0]
            .message
            .as_ref()
            .and_then(|m| m.content.as_deref());
        assert_eq!(content, Some("ok"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let out = truncate(text, 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn endpoints_without_fallback_is_primary_only() {
        let provider = ChatCompletionsProvider::new(ChatProviderConfig::default()).unwrap();
        assert_eq!(provider.endpoints(false).len(), 1);
    }

    #[test]
    fn endpoints_with_fallback_orders_primary_first() {
        let config = ChatProviderConfig {
            fallback_url: Some("http://cpu:8001".to_string()),
            ..ChatProviderConfig::default()
        };
        let provider = ChatCompletionsProvider::new(config).unwrap();
        let endpoints = provider.endpoints(true);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].served_by, ServedBy::Primary);
        assert_eq!(endpoints[1].served_by, ServedBy::Fallback);
        // Streaming fallback gets the long timeout.
        assert_eq!(endpoints[1].timeout, Duration::from_secs(900));
    }
}
