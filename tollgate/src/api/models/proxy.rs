//! API request/response models for proxied chat calls.

use crate::proxy::ProxyCallResult;
use crate::proxy::client::{ChatMessage, ChatParams};
use crate::types::LlmCallId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProxyChatRequest {
    /// Model group name to resolve (not a concrete model)
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Stream the response as server-sent events
    #[serde(default)]
    pub stream: bool,
    /// Free-text label recorded on the call for later analysis
    pub purpose: Option<String>,
    #[serde(flatten)]
    pub params: ChatParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProxyUsageResponse {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    /// Cost (returned as string to preserve precision)
    #[schema(value_type = String)]
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProxyChatResponse {
    /// Concrete model that served the call after fallback
    pub model: String,
    pub content: String,
    #[schema(value_type = String, format = "uuid")]
    pub call_id: LlmCallId,
    pub usage: ProxyUsageResponse,
}

impl From<ProxyCallResult> for ProxyChatResponse {
    fn from(result: ProxyCallResult) -> Self {
        Self {
            model: result.model,
            content: result.content,
            call_id: result.call.id,
            usage: ProxyUsageResponse {
                prompt_tokens: result.call.prompt_tokens,
                completion_tokens: result.call.completion_tokens,
                total_tokens: result.call.total_tokens,
                cost: result.call.cost,
            },
        }
    }
}
