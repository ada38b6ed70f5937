//! Call proxy: resolution, fallback, and call recording around the
//! upstream collaborator.
//!
//! Every upstream attempt is recorded against the owning job the moment it
//! returns, success or failure, so fallback across candidates leaves one
//! telemetry row per attempt and cost stays visible even for dead ends. The
//! caller only ever receives the last attempt's content.

pub mod accumulator;
pub mod client;

use crate::db::handlers::{Jobs, ModelGroups};
use crate::db::models::llm_calls::{LlmCallCreateDBRequest, LlmCallDBResponse};
use crate::db::models::model_groups::ModelGroupEntryDBResponse;
use crate::errors::{Error, Result};
use crate::proxy::accumulator::{CallTotals, StreamAccumulator};
use crate::proxy::client::{ChatRequest, StreamEvent, UpstreamChunkStream, UpstreamClient, UpstreamError, UpstreamResponse};
use crate::types::{JobId, abbrev_uuid};
use futures::StreamExt;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::instrument;

/// Fragments delivered to the HTTP layer for one streamed call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Delta(String),
    Done { totals: CallTotals },
    Failed { message: String },
}

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a non-streaming proxied call.
#[derive(Debug, Clone)]
pub struct ProxyCallResult {
    pub content: String,
    pub model: String,
    pub call: LlmCallDBResponse,
}

pub struct CallProxy {
    db: PgPool,
    upstream: Arc<dyn UpstreamClient>,
    fallback_statuses: Vec<u16>,
}

impl CallProxy {
    pub fn new(db: PgPool, upstream: Arc<dyn UpstreamClient>, fallback_statuses: Vec<u16>) -> Self {
        Self {
            db,
            upstream,
            fallback_statuses,
        }
    }

    /// Resolve a group to its fallback-ordered candidates, surfacing the
    /// resolution failures without touching any state.
    async fn candidates(&self, group: &str) -> Result<Vec<ModelGroupEntryDBResponse>> {
        let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let mut groups = ModelGroups::new(&mut conn);
        match groups.resolve(group).await? {
            None => Err(Error::UnknownModelGroup { name: group.to_string() }),
            Some(entries) if entries.is_empty() => Err(Error::NoActiveModels { name: group.to_string() }),
            Some(entries) => Ok(entries),
        }
    }

    async fn record(&self, job_id: JobId, request: &LlmCallCreateDBRequest) -> Result<LlmCallDBResponse> {
        let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let mut jobs = Jobs::new(&mut conn);
        Ok(jobs.record_call(job_id, request).await?)
    }

    /// Proxy one complete (non-streaming) call through the group's
    /// candidates. Transient failures advance to the next candidate; each
    /// attempt is recorded. Exhausting every candidate records one more
    /// failed call carrying only the group name.
    #[instrument(skip(self, chat, purpose), fields(job_id = %abbrev_uuid(&job_id), group = %group), err)]
    pub async fn execute(
        &self,
        job_id: JobId,
        group: &str,
        chat: &ChatRequest,
        purpose: Option<String>,
    ) -> Result<ProxyCallResult> {
        let candidates = self.candidates(group).await?;
        let attempts = candidates.len();
        let request_snapshot = request_snapshot(group, chat);

        let mut last_error: Option<UpstreamError> = None;
        for entry in &candidates {
            let started = Instant::now();
            let outcome = self.upstream.invoke(&entry.model_name, chat).await;
            let latency_ms = started.elapsed().as_millis() as i64;

            match outcome {
                Ok(response) => {
                    let call = self
                        .record(job_id, &success_request(group, entry, &response, latency_ms, &purpose, &request_snapshot))
                        .await?;
                    return Ok(ProxyCallResult {
                        content: response.content,
                        model: entry.model_name.clone(),
                        call,
                    });
                }
                Err(err) => {
                    self.record(
                        job_id,
                        &failure_request(
                            group,
                            Some(entry.model_name.clone()),
                            &err.to_string(),
                            latency_ms,
                            &purpose,
                            &request_snapshot,
                        ),
                    )
                    .await?;

                    if err.is_transient(&self.fallback_statuses) {
                        tracing::warn!(
                            model = %entry.model_name,
                            error = %err,
                            "upstream attempt failed, advancing to next candidate"
                        );
                        last_error = Some(err);
                        continue;
                    }
                    return Err(surface_error(&entry.model_name, &err));
                }
            }
        }

        // Out of candidates. The exhaustion itself is recorded with the
        // group name but no resolved model.
        let message = last_error
            .map(|e| format!("all candidate models exhausted: {e}"))
            .unwrap_or_else(|| "all candidate models exhausted".to_string());
        self.record(
            job_id,
            &failure_request(group, None, &message, 0, &purpose, &request_snapshot),
        )
        .await?;

        Err(Error::AllModelsExhausted {
            group: group.to_string(),
            attempts,
        })
    }

    /// Proxy one streaming call. Candidates are tried until one opens a
    /// stream; fragments are then forwarded through a bounded channel while
    /// a detached producer accumulates totals. The call is recorded exactly
    /// once — on upstream completion, on mid-stream failure, or when the
    /// consumer disconnects — never silently dropped.
    #[instrument(skip(self, chat, purpose), fields(job_id = %abbrev_uuid(&job_id), group = %group), err)]
    pub async fn execute_stream(
        &self,
        job_id: JobId,
        group: &str,
        chat: ChatRequest,
        purpose: Option<String>,
    ) -> Result<mpsc::Receiver<StreamFrame>> {
        let candidates = self.candidates(group).await?;
        let attempts = candidates.len();
        let request_snapshot = request_snapshot(group, &chat);

        let mut last_error: Option<UpstreamError> = None;
        for entry in &candidates {
            let started = Instant::now();
            match self.upstream.invoke_stream(&entry.model_name, &chat).await {
                Ok(stream) => {
                    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
                    let recorder = StreamRecorder {
                        db: self.db.clone(),
                        job_id,
                        model_group: group.to_string(),
                        resolved_model: entry.model_name.clone(),
                        purpose,
                        request_snapshot,
                        started,
                    };
                    tokio::spawn(run_stream_producer(recorder, stream, tx));
                    return Ok(rx);
                }
                Err(err) => {
                    let latency_ms = started.elapsed().as_millis() as i64;
                    self.record(
                        job_id,
                        &failure_request(
                            group,
                            Some(entry.model_name.clone()),
                            &err.to_string(),
                            latency_ms,
                            &purpose,
                            &request_snapshot,
                        ),
                    )
                    .await?;

                    if err.is_transient(&self.fallback_statuses) {
                        tracing::warn!(
                            model = %entry.model_name,
                            error = %err,
                            "upstream stream rejected, advancing to next candidate"
                        );
                        last_error = Some(err);
                        continue;
                    }
                    return Err(surface_error(&entry.model_name, &err));
                }
            }
        }

        let message = last_error
            .map(|e| format!("all candidate models exhausted: {e}"))
            .unwrap_or_else(|| "all candidate models exhausted".to_string());
        self.record(
            job_id,
            &failure_request(group, None, &message, 0, &purpose, &request_snapshot),
        )
        .await?;

        Err(Error::AllModelsExhausted {
            group: group.to_string(),
            attempts,
        })
    }
}

fn surface_error(model: &str, err: &UpstreamError) -> Error {
    match err {
        UpstreamError::Timeout(_) => Error::UpstreamTimeout {
            model: model.to_string(),
        },
        other => Error::UpstreamCallFailed {
            model: model.to_string(),
            message: other.to_string(),
        },
    }
}

fn request_snapshot(group: &str, chat: &ChatRequest) -> serde_json::Value {
    serde_json::json!({
        "model_group": group,
        "messages": chat.messages,
        "params": chat.params,
    })
}

fn success_request(
    group: &str,
    entry: &ModelGroupEntryDBResponse,
    response: &UpstreamResponse,
    latency_ms: i64,
    purpose: &Option<String>,
    request_snapshot: &serde_json::Value,
) -> LlmCallCreateDBRequest {
    LlmCallCreateDBRequest::builder()
        .model_group(group.to_string())
        .resolved_model(entry.model_name.clone())
        .prompt_tokens(response.usage.prompt_tokens)
        .completion_tokens(response.usage.completion_tokens)
        .total_tokens(response.usage.total_tokens)
        .cost(response.cost_estimate)
        .latency_ms(latency_ms)
        .maybe_purpose(purpose.clone())
        .succeeded(true)
        .request_snapshot(request_snapshot.clone())
        .response_snapshot(response.raw.clone())
        .build()
}

fn failure_request(
    group: &str,
    resolved_model: Option<String>,
    message: &str,
    latency_ms: i64,
    purpose: &Option<String>,
    request_snapshot: &serde_json::Value,
) -> LlmCallCreateDBRequest {
    LlmCallCreateDBRequest::builder()
        .model_group(group.to_string())
        .maybe_resolved_model(resolved_model)
        .latency_ms(latency_ms)
        .maybe_purpose(purpose.clone())
        .succeeded(false)
        .error_message(message.to_string())
        .request_snapshot(request_snapshot.clone())
        .build()
}

struct StreamRecorder {
    db: PgPool,
    job_id: JobId,
    model_group: String,
    resolved_model: String,
    purpose: Option<String>,
    request_snapshot: serde_json::Value,
    started: Instant,
}

impl StreamRecorder {
    async fn record(&self, request: &LlmCallCreateDBRequest) {
        let result = async {
            let mut conn = self.db.acquire().await?;
            let mut jobs = Jobs::new(&mut conn);
            jobs.record_call(self.job_id, request)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(err) = result {
            tracing::error!(
                job_id = %abbrev_uuid(&self.job_id),
                model = %self.resolved_model,
                error = %err,
                "failed to record streamed call"
            );
        }
    }

    async fn record_success(&self, totals: &CallTotals) {
        let request = LlmCallCreateDBRequest::builder()
            .model_group(self.model_group.clone())
            .resolved_model(self.resolved_model.clone())
            .prompt_tokens(totals.prompt_tokens)
            .completion_tokens(totals.completion_tokens)
            .total_tokens(totals.total_tokens)
            .cost(totals.cost)
            .latency_ms(self.started.elapsed().as_millis() as i64)
            .maybe_purpose(self.purpose.clone())
            .succeeded(true)
            .request_snapshot(self.request_snapshot.clone())
            .response_snapshot(serde_json::json!({
                "content": totals.content,
                "fragments": totals.fragments,
            }))
            .build();
        self.record(&request).await;
    }

    async fn record_failure(&self, totals: CallTotals, message: &str) {
        let request = LlmCallCreateDBRequest::builder()
            .model_group(self.model_group.clone())
            .resolved_model(self.resolved_model.clone())
            .prompt_tokens(totals.prompt_tokens)
            .completion_tokens(totals.completion_tokens)
            .total_tokens(totals.total_tokens)
            .latency_ms(self.started.elapsed().as_millis() as i64)
            .maybe_purpose(self.purpose.clone())
            .succeeded(false)
            .error_message(message.to_string())
            .request_snapshot(self.request_snapshot.clone())
            .response_snapshot(serde_json::json!({
                "content": totals.content,
                "fragments": totals.fragments,
            }))
            .build();
        self.record(&request).await;
    }
}

/// Forwards fragments to the consumer while accumulating totals, then
/// records the call exactly once. Runs detached so a consumer that goes
/// away cannot leave the call unrecorded.
async fn run_stream_producer(recorder: StreamRecorder, mut stream: UpstreamChunkStream, tx: mpsc::Sender<StreamFrame>) {
    let mut accumulator = StreamAccumulator::new();

    loop {
        match stream.next().await {
            Some(Ok(StreamEvent::Delta(delta))) => {
                accumulator.push(&delta);
                if tx.send(StreamFrame::Delta(delta)).await.is_err() {
                    recorder
                        .record_failure(accumulator.abort(), "client disconnected before stream completion")
                        .await;
                    return;
                }
            }
            Some(Ok(StreamEvent::Done { usage, cost_estimate })) => {
                let totals = accumulator.finish(usage, cost_estimate);
                recorder.record_success(&totals).await;
                let _ = tx.send(StreamFrame::Done { totals }).await;
                return;
            }
            Some(Err(err)) => {
                let message = err.to_string();
                recorder.record_failure(accumulator.abort(), &message).await;
                let _ = tx.send(StreamFrame::Failed { message }).await;
                return;
            }
            None => {
                let message = "upstream stream ended without completion";
                recorder.record_failure(accumulator.abort(), message).await;
                let _ = tx
                    .send(StreamFrame::Failed {
                        message: message.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::{LlmCalls, ModelGroups, Repository};
    use crate::db::models::jobs::JobCreateDBRequest;
    use crate::db::models::model_groups::{ModelGroupCreateDBRequest, ModelGroupEntrySpec};
    use crate::proxy::client::{ChatMessage, ChatParams, Role, UpstreamUsage};
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use std::collections::VecDeque;
    use std::time::Duration;
    use uuid::Uuid;

    enum Scripted {
        Response(UpstreamResponse),
        Failure(UpstreamError),
        Stream(Vec<std::result::Result<StreamEvent, UpstreamError>>),
        StreamRejected(UpstreamError),
    }

    struct ScriptedUpstream {
        outcomes: tokio::sync::Mutex<VecDeque<Scripted>>,
    }

    impl ScriptedUpstream {
        fn new(outcomes: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: tokio::sync::Mutex::new(outcomes.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn invoke(&self, _model: &str, _request: &ChatRequest) -> std::result::Result<UpstreamResponse, UpstreamError> {
            match self.outcomes.lock().await.pop_front().expect("script exhausted") {
                Scripted::Response(response) => Ok(response),
                Scripted::Failure(err) => Err(err),
                _ => panic!("scripted a stream outcome for a non-streaming call"),
            }
        }

        async fn invoke_stream(
            &self,
            _model: &str,
            _request: &ChatRequest,
        ) -> std::result::Result<UpstreamChunkStream, UpstreamError> {
            match self.outcomes.lock().await.pop_front().expect("script exhausted") {
                Scripted::Stream(events) => Ok(Box::pin(futures::stream::iter(events))),
                Scripted::StreamRejected(err) => Err(err),
                _ => panic!("scripted a non-streaming outcome for a streaming call"),
            }
        }
    }

    fn ok_response(content: &str) -> UpstreamResponse {
        UpstreamResponse {
            content: content.to_string(),
            usage: UpstreamUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            },
            cost_estimate: Decimal::new(1, 2),
            raw: serde_json::json!({"content": content}),
        }
    }

    fn chat() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: serde_json::json!("hello"),
            }],
            params: ChatParams::default(),
        }
    }

    const FALLBACK: [u16; 5] = [429, 500, 502, 503, 504];

    async fn seed(pool: &PgPool, group: &str, models: Vec<(&str, i32, bool)>) -> JobId {
        let mut conn = pool.acquire().await.unwrap();
        let mut groups = ModelGroups::new(&mut conn);
        let created = groups
            .create(&ModelGroupCreateDBRequest::builder().name(group.to_string()).build())
            .await
            .unwrap();
        let specs = models
            .into_iter()
            .map(|(model_name, priority, active)| ModelGroupEntrySpec {
                model_name: model_name.to_string(),
                priority,
                active,
            })
            .collect();
        groups.set_entries(created.id, specs).await.unwrap();

        let mut jobs = Jobs::new(&mut conn);
        let job = jobs
            .create(
                &JobCreateDBRequest::builder()
                    .team_id(Uuid::new_v4())
                    .job_type("chat".to_string())
                    .build(),
            )
            .await
            .unwrap();
        job.id
    }

    async fn calls_for(pool: &PgPool, job_id: JobId) -> Vec<LlmCallDBResponse> {
        let mut conn = pool.acquire().await.unwrap();
        LlmCalls::new(&mut conn).list_for_job(job_id).await.unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn fallback_records_every_attempt_and_returns_last(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true), ("model-b", 1, true)]).await;
        let upstream = ScriptedUpstream::new(vec![
            Scripted::Failure(UpstreamError::Http {
                status: 503,
                message: "overloaded".to_string(),
            }),
            Scripted::Response(ok_response("answer from b")),
        ]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let result = proxy.execute(job_id, "tiered", &chat(), None).await.unwrap();
        assert_eq!(result.content, "answer from b");
        assert_eq!(result.model, "model-b");

        // One telemetry row per attempt; only the last one succeeded.
        let calls = calls_for(&pool, job_id).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].resolved_model.as_deref(), Some("model-a"));
        assert!(!calls[0].succeeded);
        assert_eq!(calls[1].resolved_model.as_deref(), Some("model-b"));
        assert!(calls[1].succeeded);
        assert_eq!(calls[1].total_tokens, 30);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn exhaustion_records_group_level_failure(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true), ("model-b", 1, true)]).await;
        let upstream = ScriptedUpstream::new(vec![
            Scripted::Failure(UpstreamError::Http {
                status: 500,
                message: "boom".to_string(),
            }),
            Scripted::Failure(UpstreamError::Timeout(Duration::from_secs(30))),
        ]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let err = proxy.execute(job_id, "tiered", &chat(), None).await.unwrap_err();
        assert!(matches!(err, Error::AllModelsExhausted { attempts: 2, .. }));

        let calls = calls_for(&pool, job_id).await;
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| !c.succeeded));
        // The final row marks the exhaustion itself: group name, no model.
        assert_eq!(calls[2].resolved_model, None);
        assert_eq!(calls[2].model_group, "tiered");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn permanent_failures_stop_the_fallback_walk(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true), ("model-b", 1, true)]).await;
        let upstream = ScriptedUpstream::new(vec![Scripted::Failure(UpstreamError::Http {
            status: 400,
            message: "bad request".to_string(),
        })]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let err = proxy.execute(job_id, "tiered", &chat(), None).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamCallFailed { .. }));

        // Recorded, but the second candidate was never consulted.
        let calls = calls_for(&pool, job_id).await;
        assert_eq!(calls.len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn resolution_failures_mutate_nothing(pool: PgPool) {
        let job_id = seed(&pool, "drained", vec![("retired-model", 0, false)]).await;
        let upstream = ScriptedUpstream::new(vec![]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let err = proxy.execute(job_id, "no-such-group", &chat(), None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownModelGroup { .. }));

        let err = proxy.execute(job_id, "drained", &chat(), None).await.unwrap_err();
        assert!(matches!(err, Error::NoActiveModels { .. }));

        assert!(calls_for(&pool, job_id).await.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn streaming_accumulates_and_records_success(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true)]).await;
        let upstream = ScriptedUpstream::new(vec![Scripted::Stream(vec![
            Ok(StreamEvent::Delta("Hel".to_string())),
            Ok(StreamEvent::Delta("lo".to_string())),
            Ok(StreamEvent::Done {
                usage: Some(UpstreamUsage {
                    prompt_tokens: 4,
                    completion_tokens: 2,
                    total_tokens: 6,
                }),
                cost_estimate: Decimal::new(2, 3),
            }),
        ])]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let mut rx = proxy.execute_stream(job_id, "tiered", chat(), None).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], StreamFrame::Delta("Hel".to_string()));
        assert_eq!(frames[1], StreamFrame::Delta("lo".to_string()));
        let StreamFrame::Done { totals } = &frames[2] else {
            panic!("expected Done frame");
        };
        assert_eq!(totals.content, "Hello");
        assert_eq!(totals.total_tokens, 6);

        // The Done frame is sent only after the call row is committed.
        let calls = calls_for(&pool, job_id).await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].succeeded);
        assert_eq!(calls[0].completion_tokens, 2);
        assert_eq!(calls[0].cost, Decimal::new(2, 3));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn streaming_midway_error_records_partial_failure(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true)]).await;
        let upstream = ScriptedUpstream::new(vec![Scripted::Stream(vec![
            Ok(StreamEvent::Delta("partial ".to_string())),
            Err(UpstreamError::Interrupted("connection reset".to_string())),
        ])]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let mut rx = proxy.execute_stream(job_id, "tiered", chat(), None).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames[0], StreamFrame::Delta("partial ".to_string()));
        assert!(matches!(frames[1], StreamFrame::Failed { .. }));

        let calls = calls_for(&pool, job_id).await;
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].succeeded);
        // Partial token estimate from the accumulated content.
        assert_eq!(calls[0].completion_tokens, 2);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn streaming_falls_back_when_the_stream_never_opens(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true), ("model-b", 1, true)]).await;
        let upstream = ScriptedUpstream::new(vec![
            Scripted::StreamRejected(UpstreamError::Http {
                status: 503,
                message: "overloaded".to_string(),
            }),
            Scripted::Stream(vec![Ok(StreamEvent::Done {
                usage: None,
                cost_estimate: Decimal::ZERO,
            })]),
        ]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let mut rx = proxy.execute_stream(job_id, "tiered", chat(), None).await.unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert!(matches!(frames[0], StreamFrame::Done { .. }));

        let calls = calls_for(&pool, job_id).await;
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].succeeded);
        assert!(calls[1].succeeded);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn disconnected_consumer_still_gets_a_recorded_call(pool: PgPool) {
        let job_id = seed(&pool, "tiered", vec![("model-a", 0, true)]).await;
        // More deltas than the channel buffers, so the producer is still
        // sending when the consumer walks away.
        let mut events: Vec<std::result::Result<StreamEvent, UpstreamError>> = (0..STREAM_CHANNEL_CAPACITY + 64)
            .map(|i| Ok(StreamEvent::Delta(format!("chunk-{i} "))))
            .collect();
        events.push(Ok(StreamEvent::Done {
            usage: None,
            cost_estimate: Decimal::ZERO,
        }));
        let upstream = ScriptedUpstream::new(vec![Scripted::Stream(events)]);
        let proxy = CallProxy::new(pool.clone(), upstream, FALLBACK.to_vec());

        let mut rx = proxy.execute_stream(job_id, "tiered", chat(), None).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, StreamFrame::Delta(_)));
        drop(rx);

        // The detached producer notices the closed channel and records the
        // partial call; poll until it lands.
        let mut recorded = Vec::new();
        for _ in 0..50 {
            recorded = calls_for(&pool, job_id).await;
            if !recorded.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].succeeded);
        assert_eq!(
            recorded[0].error_message.as_deref(),
            Some("client disconnected before stream completion")
        );
    }
}
