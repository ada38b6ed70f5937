//! # tollgate: Job & Credit Accounting for LLM Proxies
//!
//! `tollgate` sits next to an OpenAI-compatible LLM routing proxy and turns
//! loose upstream calls into billable units. Callers open a **job**, proxy
//! any number of chat calls through it (each call resolved from a logical
//! **model group** with priority fallback), and then complete the job; a
//! successfully completed job with no failed calls costs its team exactly
//! one credit, deducted from a balance-consistent, append-only ledger.
//!
//! ## Overview
//!
//! Platforms that resell LLM capacity need three things the proxy itself
//! does not give them: grouping (one business operation spans several
//! upstream calls), routing policy (logical model names with fallback,
//! changeable without redeploying callers), and billing (per-team budgets
//! with an auditable trail). `tollgate` owns those three concerns and
//! nothing else — team management, authentication, and dashboards belong to
//! the surrounding platform, which talks to this engine over a small HTTP
//! API and a pair of injected traits.
//!
//! ### Request Flow
//!
//! A caller creates a job for a team, then posts chat requests to the job.
//! Each request names a model group; the engine resolves the group to its
//! active candidate models in priority order and walks them until one
//! succeeds, recording one telemetry row per attempt (tokens, cost,
//! latency, error) the instant the attempt returns. Streaming calls forward
//! fragments to the caller as server-sent events while a detached producer
//! accumulates totals, so even a cancelled stream ends up recorded.
//! Completing the job aggregates its calls, stamps a terminal status, and —
//! only for a clean `completed` job — deducts one credit inside the same
//! transaction that flips the job's `credit_applied` flag. Completion is
//! idempotent: replays return the original summary and never touch the
//! ledger again.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for
//! the HTTP layer and uses PostgreSQL for all persistence.
//!
//! The **database layer** ([`db`]) uses the repository pattern: each table
//! family has a repository wrapping a `&mut PgConnection`, and multi-step
//! operations open their own transaction so they compose via savepoints.
//! Row locks on the job and team rows are the concurrency boundaries — no
//! in-process lock is held across calls, so any number of replicas can
//! serve the same database.
//!
//! The **proxy layer** ([`proxy`]) treats the upstream as an opaque
//! collaborator behind the [`proxy::client::UpstreamClient`] trait and owns
//! fallback and call recording.
//!
//! The **API layer** ([`api`]) is deliberately thin: handlers call the
//! engine's exposed operations and translate errors to status codes.
//!
//! **Background services**: an auto-refill sweeper ([`refill`]) applies
//! periodic credit allocations to teams that carry a refill policy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use tollgate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = tollgate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     tollgate::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! The application requires a PostgreSQL database and automatically runs
//! migrations on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
//! tollgate::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod proxy;
mod refill;
pub mod teams;
pub mod telemetry;
mod types;

use crate::proxy::client::{HttpUpstreamClient, UpstreamClient};
use crate::teams::{AllowAllTeams, TeamGate};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, patch, post, put},
};
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument};
use utoipa::OpenApi;

pub use types::{JobId, LlmCallId, ModelGroupId, TeamId, TransactionId, UserId};

/// Application state shared across all request handlers.
///
/// # Fields
///
/// - `db`: PostgreSQL connection pool
/// - `config`: application configuration
/// - `upstream`: the LLM routing proxy collaborator
/// - `team_gate`: team existence/suspension check injected by the platform
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub upstream: Arc<dyn UpstreamClient>,
    #[builder(default = Arc::new(AllowAllTeams))]
    pub team_gate: Arc<dyn TeamGate>,
}

/// Get the tollgate database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_allowed_origins.iter().any(|origin| origin == "*") {
        Ok(layer.allow_origin(Any))
    } else {
        let origins = config
            .cors_allowed_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(layer.allow_origin(origins))
    }
}

/// Build the application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        // Job lifecycle
        .route("/jobs", post(api::handlers::jobs::create_job))
        .route("/jobs", get(api::handlers::jobs::list_jobs))
        .route("/jobs/{job_id}", get(api::handlers::jobs::get_job))
        .route("/jobs/{job_id}/calls", get(api::handlers::jobs::list_job_calls))
        .route("/jobs/{job_id}/completion", post(api::handlers::jobs::complete_job))
        // Proxied calls within a job
        .route(
            "/jobs/{job_id}/chat/completions",
            post(api::handlers::proxy::job_chat_completions),
        )
        // Model group management and resolution
        .route("/model-groups", post(api::handlers::model_groups::create_model_group))
        .route("/model-groups", get(api::handlers::model_groups::list_model_groups))
        .route("/model-groups/{name}", get(api::handlers::model_groups::get_model_group))
        .route("/model-groups/{name}", patch(api::handlers::model_groups::update_model_group))
        .route("/model-groups/{name}", delete(api::handlers::model_groups::delete_model_group))
        .route(
            "/model-groups/{name}/entries",
            put(api::handlers::model_groups::set_model_group_entries),
        )
        .route(
            "/model-groups/{name}/resolution",
            get(api::handlers::model_groups::resolve_model_group),
        )
        // Credit ledger
        .route("/teams/{team_id}/credits", get(api::handlers::credits::get_balance))
        .route(
            "/teams/{team_id}/credits/allocations",
            post(api::handlers::credits::create_allocation),
        )
        .route(
            "/teams/{team_id}/credits/deductions",
            post(api::handlers::credits::create_deduction),
        )
        .route("/teams/{team_id}/credits/refunds", post(api::handlers::credits::create_refund))
        .route(
            "/teams/{team_id}/credits/adjustments",
            post(api::handlers::credits::create_adjustment),
        )
        .route(
            "/teams/{team_id}/credits/refill-policy",
            put(api::handlers::credits::set_refill_policy),
        )
        .route(
            "/teams/{team_id}/transactions",
            get(api::handlers::credits::list_team_transactions),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::response::Json(openapi::ApiDoc::openapi()) }),
        )
        .nest("/api/v1", api_routes);

    let cors_layer = create_cors_layer(&state.config)?;

    Ok(router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ))
}

/// Container for background services and their lifecycle management.
///
/// When dropped, the `drop_guard` cancels the shutdown token, signalling
/// the tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Setup background services (currently the auto-refill sweeper)
fn setup_background_services(
    pool: PgPool,
    config: Config,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let handle = tokio::spawn(refill::run(pool, config.credits.clone(), shutdown_token.clone()));
    background_tasks.push(handle);

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs
///    migrations, and starts background services
/// 2. **Serve**: [`Application::serve`] binds a TCP port and handles
///    requests until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.database.acquire_timeout_secs))
            .connect(&config.database.url)
            .await?;
        migrator().run(&pool).await?;

        let upstream: Arc<dyn UpstreamClient> = Arc::new(HttpUpstreamClient::new(&config.upstream)?);

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(pool.clone(), config.clone(), shutdown_token);

        let state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .upstream(upstream)
            .build();
        let router = build_router(&state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("tollgate listening on http://{bind_addr}");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
