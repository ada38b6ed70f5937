//! HTTP handler for proxied chat calls within a job.

use crate::{
    AppState,
    api::models::proxy::{ProxyChatRequest, ProxyChatResponse},
    errors::{Error, Result},
    proxy::{CallProxy, StreamFrame},
    proxy::client::ChatRequest,
    types::JobId,
};
use axum::{
    extract::{Path, State},
    response::{
        IntoResponse, Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;

/// Proxy one chat call through a model group on behalf of a job.
///
/// With `"stream": true` the response is a server-sent event stream of
/// OpenAI-style delta chunks, a final usage chunk, and a `[DONE]` marker.
#[utoipa::path(
    post,
    path = "/jobs/{job_id}/chat/completions",
    tag = "proxy",
    summary = "Proxy a chat call through a model group",
    description = "Resolves the group, walks its candidates in priority order, records one call per attempt \
                   against the job, and returns the last attempt's content (or streams it as SSE).",
    params(("job_id" = String, Path, format = "uuid", description = "Job ID")),
    request_body = ProxyChatRequest,
    responses(
        (status = 200, description = "Upstream response (JSON, or SSE when streaming)", body = ProxyChatResponse),
        (status = 404, description = "Job or model group not found"),
        (status = 409, description = "Job already terminal, or group has no active models"),
        (status = 502, description = "All candidate models failed"),
        (status = 504, description = "Upstream timed out"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn job_chat_completions(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(data): Json<ProxyChatRequest>,
) -> Result<Response> {
    if data.messages.is_empty() {
        return Err(Error::BadRequest {
            message: "messages must not be empty".to_string(),
        });
    }

    let proxy = CallProxy::new(
        state.db.clone(),
        state.upstream.clone(),
        state.config.upstream.fallback_on_status.clone(),
    );
    let chat = ChatRequest {
        messages: data.messages,
        params: data.params,
    };

    if data.stream {
        let rx = proxy.execute_stream(job_id, &data.model, chat, data.purpose).await?;
        let frames = ReceiverStream::new(rx)
            .map(|frame| -> std::result::Result<Event, Infallible> {
                let event = match frame {
                    StreamFrame::Delta(content) => Event::default().data(
                        serde_json::json!({"choices": [{"delta": {"content": content}}]}).to_string(),
                    ),
                    StreamFrame::Done { totals } => Event::default().data(
                        serde_json::json!({
                            "choices": [],
                            "usage": {
                                "prompt_tokens": totals.prompt_tokens,
                                "completion_tokens": totals.completion_tokens,
                                "total_tokens": totals.total_tokens,
                                "cost": totals.cost,
                            }
                        })
                        .to_string(),
                    ),
                    StreamFrame::Failed { message } => {
                        Event::default().event("error").data(serde_json::json!({"error": message}).to_string())
                    }
                };
                Ok(event)
            })
            .chain(futures::stream::once(async {
                Ok::<_, Infallible>(Event::default().data("[DONE]"))
            }));

        Ok(Sse::new(frames).keep_alive(KeepAlive::default()).into_response())
    } else {
        let result = proxy.execute(job_id, &data.model, &chat, data.purpose).await?;
        Ok(Json(ProxyChatResponse::from(result)).into_response())
    }
}
