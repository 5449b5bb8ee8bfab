//! Stream Guardrails Server
//!
//! Main entry point for the stream guardrails server.

use std::sync::Arc;
use stream_guardrails::{
    inference_client::{HttpInferenceClient, InferenceBackend},
    state::{AppConfig, AppState, GuardLimits},
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_guardrails=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stream Guardrails v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    let limits = GuardLimits::from_env();
    tracing::info!(
        inference_url = %config.inference_url,
        return_annotated = config.return_annotated,
        max_fps_per_session = limits.max_fps_per_session,
        inference_timeout_secs = limits.inference_timeout.as_secs(),
        "Configuration loaded"
    );

    // Initialize components
    let inference =
        HttpInferenceClient::with_timeout(config.inference_url.clone(), limits.inference_timeout)?;
    tracing::info!(
        url = %inference.base_url(),
        timeout_secs = inference.timeout().as_secs(),
        "Inference client ready"
    );
    if inference.health_check().await {
        tracing::info!(url = %inference.base_url(), "Inference service reachable");
    } else {
        tracing::warn!(url = %inference.base_url(), "Inference service not reachable, frames will fail until it is");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let stats_interval = limits.stats_interval;
    let state = AppState::new(config, limits, Arc::new(inference));

    // Stats broadcast for the process lifetime
    tokio::spawn(state.registry.clone().run_stats_broadcast(stats_interval));
    tracing::info!(interval_ms = stats_interval.as_millis() as u64, "Stats broadcast started");

    // Build router
    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
