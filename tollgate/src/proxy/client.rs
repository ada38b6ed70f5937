//! Upstream collaborator client.
//!
//! The engine treats the LLM routing proxy as an opaque collaborator behind
//! [`UpstreamClient`]: it accepts a resolved model name plus a chat-style
//! request and returns content with token usage and a cost estimate, either
//! whole or as a lazy sequence of fragments. Pricing is the collaborator's
//! concern; whatever it reports is recorded as-is.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{pin::Pin, time::Duration};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;

use crate::config::UpstreamConfig;

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One chat message. Content is passed through opaquely so multimodal
/// payloads survive the round trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: Role,
    #[schema(value_type = Object)]
    pub content: serde_json::Value,
}

/// Sampling parameters forwarded verbatim to the upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// A fully-resolved request as handed to the upstream collaborator.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub params: ChatParams,
}

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

/// A complete (non-streaming) upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub content: String,
    pub usage: UpstreamUsage,
    /// Cost in provider currency units as reported by the upstream; zero
    /// when the upstream does not report cost.
    pub cost_estimate: Decimal,
    /// Raw response body kept for diagnostics snapshots.
    pub raw: serde_json::Value,
}

/// One event in a streaming upstream response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A content fragment.
    Delta(String),
    /// The upstream signalled completion; usage arrives here when the
    /// upstream reports it at all.
    Done {
        usage: Option<UpstreamUsage>,
        cost_estimate: Decimal,
    },
}

pub type UpstreamChunkStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, UpstreamError>> + Send>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream stream ended prematurely: {0}")]
    Interrupted(String),
}

impl UpstreamError {
    /// Whether the failure justifies advancing to the next fallback
    /// candidate. Timeouts and transport failures always do; HTTP failures
    /// only for the configured status set. A stream that already delivered
    /// fragments is never restartable.
    pub fn is_transient(&self, fallback_statuses: &[u16]) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
            UpstreamError::Http { status, .. } => fallback_statuses.contains(status),
            UpstreamError::Interrupted(_) => false,
        }
    }
}

/// The upstream collaborator boundary.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Invoke the model once and return the complete response.
    async fn invoke(&self, model: &str, request: &ChatRequest) -> Result<UpstreamResponse, UpstreamError>;

    /// Invoke the model and return a lazy, finite, non-restartable sequence
    /// of fragments terminated by [`StreamEvent::Done`] or an error.
    async fn invoke_stream(&self, model: &str, request: &ChatRequest) -> Result<UpstreamChunkStream, UpstreamError>;
}

// OpenAI-compatible wire format, the lingua franca of routing proxies.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: i32,
    #[serde(default)]
    completion_tokens: i32,
    #[serde(default)]
    total_tokens: i32,
    /// Routing proxies that meter spend report it here.
    #[serde(default)]
    cost: Option<f64>,
}

impl From<WireUsage> for UpstreamUsage {
    fn from(usage: WireUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

fn cost_from(usage: Option<&WireUsage>) -> Decimal {
    usage
        .and_then(|u| u.cost)
        .and_then(|c| Decimal::try_from(c).ok())
        .unwrap_or(Decimal::ZERO)
}

/// HTTP implementation of [`UpstreamClient`] speaking the OpenAI-compatible
/// chat-completions wire format.
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpUpstreamClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut endpoint = config.url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("upstream URL cannot be a base: {}", config.url))?
            .pop_if_empty()
            .extend(["chat", "completions"]);

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    fn request_body(&self, model: &str, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
        });
        let obj = body.as_object_mut().expect("request body is an object");
        if let Some(temperature) = request.params.temperature {
            obj.insert("temperature".to_string(), temperature.into());
        }
        if let Some(top_p) = request.params.top_p {
            obj.insert("top_p".to_string(), top_p.into());
        }
        if let Some(max_tokens) = request.params.max_tokens {
            obj.insert("max_tokens".to_string(), max_tokens.into());
        }
        if stream {
            obj.insert("stream".to_string(), true.into());
            // Without this the final chunk carries no token usage and the
            // call would be billed from estimates.
            obj.insert("stream_options".to_string(), serde_json::json!({"include_usage": true}));
        }
        body
    }

    fn send_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }

    async fn post(&self, body: &serde_json::Value, with_timeout: bool) -> Result<reqwest::Response, UpstreamError> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        if with_timeout {
            request = request.timeout(self.timeout);
        }
        let response = request.send().await.map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn invoke(&self, model: &str, request: &ChatRequest) -> Result<UpstreamResponse, UpstreamError> {
        let body = self.request_body(model, request, false);
        let response = self.post(&body, true).await?;

        let raw: serde_json::Value = response.json().await.map_err(|e| self.send_error(e))?;
        let parsed: WireResponse = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::Transport(format!("malformed upstream response: {e}")))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        Ok(UpstreamResponse {
            content,
            usage: parsed.usage.map(UpstreamUsage::from).unwrap_or_default(),
            cost_estimate: cost_from(parsed.usage.as_ref()),
            raw,
        })
    }

    async fn invoke_stream(&self, model: &str, request: &ChatRequest) -> Result<UpstreamChunkStream, UpstreamError> {
        let body = self.request_body(model, request, true);
        // No whole-request timeout here: streams legitimately outlive it.
        // Instead each fragment must arrive within the configured window.
        let response = self.post(&body, false).await?;
        let timeout = self.timeout;

        let stream = async_stream::try_stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut usage: Option<WireUsage> = None;
            let mut finished = false;

            'receive: loop {
                let next = tokio::time::timeout(timeout, bytes.next())
                    .await
                    .map_err(|_| UpstreamError::Timeout(timeout))?;
                let Some(chunk) = next else { break 'receive };
                let chunk = chunk.map_err(|e| UpstreamError::Transport(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Process complete SSE events (terminated by a blank line).
                while let Some(pos) = buffer.find("\n\n") {
                    let event: String = buffer.drain(..pos + 2).collect();
                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data:") else { continue };
                        let data = data.trim();
                        if data == "[DONE]" {
                            finished = true;
                            break;
                        }
                        match serde_json::from_str::<WireResponse>(data) {
                            Ok(parsed) => {
                                if let Some(u) = parsed.usage {
                                    usage = Some(u);
                                }
                                let delta = parsed
                                    .choices
                                    .first()
                                    .and_then(|c| c.delta.as_ref())
                                    .and_then(|d| d.content.clone());
                                if let Some(delta) = delta {
                                    if !delta.is_empty() {
                                        yield StreamEvent::Delta(delta);
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "skipping malformed stream chunk");
                            }
                        }
                    }
                    if finished {
                        break 'receive;
                    }
                }
            }

            if finished {
                let cost_estimate = cost_from(usage.as_ref());
                yield StreamEvent::Done {
                    usage: usage.map(UpstreamUsage::from),
                    cost_estimate,
                };
            } else {
                Err(UpstreamError::Interrupted("stream closed before completion".to_string()))?;
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> UpstreamConfig {
        UpstreamConfig {
            url: Url::parse(&format!("{}/v1/", server.uri())).unwrap(),
            api_key: Some("test-key".to_string()),
            timeout: Duration::from_millis(500),
            fallback_on_status: vec![429, 500, 502, 503, 504],
        }
    }

    fn chat_request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: serde_json::json!("hello"),
            }],
            params: ChatParams::default(),
        }
    }

    #[tokio::test]
    async fn invoke_parses_content_usage_and_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "primary-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "hi there"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30, "cost": 0.01}
            })))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(&config_for(&server)).unwrap();
        let response = client.invoke("primary-model", &chat_request()).await.unwrap();

        assert_eq!(response.content, "hi there");
        assert_eq!(
            response.usage,
            UpstreamUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30
            }
        );
        assert_eq!(response.cost_estimate, Decimal::try_from(0.01).unwrap());
    }

    #[tokio::test]
    async fn invoke_surfaces_http_failures_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(&config_for(&server)).unwrap();
        let err = client.invoke("primary-model", &chat_request()).await.unwrap_err();

        match &err {
            UpstreamError::Http { status: 503, message } => assert_eq!(message, "overloaded"),
            other => panic!("expected Http error, got {other}"),
        }
        assert!(err.is_transient(&[429, 500, 502, 503, 504]));
        assert!(!err.is_transient(&[429]));
    }

    #[tokio::test]
    async fn invoke_times_out_against_slow_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(&config_for(&server)).unwrap();
        let err = client.invoke("primary-model", &chat_request()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout(_)));
    }

    #[tokio::test]
    async fn streaming_yields_deltas_then_done_with_usage() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2,\"total_tokens\":6,\"cost\":0.002}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(
                serde_json::json!({"stream": true, "stream_options": {"include_usage": true}}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse_body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(&config_for(&server)).unwrap();
        let mut stream = client.invoke_stream("primary-model", &chat_request()).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hel".to_string()),
                StreamEvent::Delta("lo".to_string()),
                StreamEvent::Done {
                    usage: Some(UpstreamUsage {
                        prompt_tokens: 4,
                        completion_tokens: 2,
                        total_tokens: 6
                    }),
                    cost_estimate: Decimal::try_from(0.002).unwrap(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn streaming_without_done_marker_is_interrupted() {
        let server = MockServer::start().await;
        let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse_body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(&config_for(&server)).unwrap();
        let mut stream = client.invoke_stream("primary-model", &chat_request()).await.unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Delta("partial".to_string())
        );
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, UpstreamError::Interrupted(_)));
        assert!(!err.is_transient(&[429, 500, 502, 503, 504]));
    }

    #[tokio::test]
    async fn streaming_rejection_surfaces_before_any_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = HttpUpstreamClient::new(&config_for(&server)).unwrap();
        let err = match client.invoke_stream("primary-model", &chat_request()).await {
            Ok(_) => panic!("expected invoke_stream to return an error"),
            Err(err) => err,
        };
        assert!(matches!(err, UpstreamError::Http { status: 429, .. }));
    }
}
