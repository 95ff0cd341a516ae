//! HTTP server setup and configuration.

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::metrics::Metrics;
use crate::admission::Gate;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::upstream::Backends;

/// Fixed connect/read timeout for every upstream call.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(600);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<Gate>,
    pub http_client: Client,
    pub config: Arc<Config>,
    pub backends: Arc<Backends>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Build the process-wide state. `instructions` is the base prompt.
    pub fn new(config: Config, instructions: impl Into<Arc<str>>) -> Result<Self> {
        let http_client = upstream_client(UPSTREAM_TIMEOUT)?;

        Ok(Self {
            gate: Arc::new(Gate::from_config(&config.admission)),
            http_client,
            backends: Arc::new(Backends::from_config(&config, instructions.into())),
            config: Arc::new(config),
            metrics: Arc::new(Metrics::default()),
        })
    }
}

/// Timeouts bound connecting and each read, not the whole response.
fn upstream_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(allowed)
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/models", get(handlers::list_models))
        // Operational endpoints
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // State and middleware
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let instructions = config.load_base_instructions()?;

    tracing::info!(
        default_backend = %config.server.default_backend,
        max_concurrency = config.admission.max_concurrency,
        queue_limit = config.admission.queue_limit,
        rate_limit_rps = config.admission.rate_limit_rps,
        compat = ?config.reasoning.compat,
        "Configured admission and backends"
    );

    let state = AppState::new(config, instructions)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatrelay server");

    axum::serve(listener, app).await?;

    Ok(())
}
