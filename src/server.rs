//! 📡 HTTP surface
//!
//! Three read-only endpoints over the tracker: the SSE trade stream
//! (history replay, then live trades), Prometheus metrics, and a JSON
//! health snapshot. All mutation stays on the tracker's command channel.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::ServerConfig;
use crate::metrics;
use crate::tracker::TrackerHandle;

#[derive(Clone)]
struct AppState {
    tracker: TrackerHandle,
}

/// Bind and serve until the process exits.
pub async fn run_server(tracker: TrackerHandle, config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    info!("📡 Starting HTTP server on {}", addr);

    let app = Router::new()
        .route("/stream", get(stream_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { tracker });

    let listener = TcpListener::bind(&addr).await?;
    info!("✓ HTTP server listening on http://{}", addr);
    info!("  • Trade stream: http://{}/stream", addr);
    info!("  • Metrics:      http://{}/metrics", addr);
    info!("  • Health:       http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// SSE trade stream. The attach is taken on the tracker's processing
/// path, so the history replay and the live subscription meet at an
/// exact boundary: no trade is missed, none is sent twice.
async fn stream_handler(State(state): State<AppState>) -> Response {
    let (history, rx) = match state.tracker.stream_attach().await {
        Ok(attach) => attach,
        Err(e) => {
            warn!("⚠️ Stream attach failed: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    info!("📡 Stream subscriber attached, replaying {} trade(s)", history.len());

    let replay = stream::iter(
        history
            .into_iter()
            .map(|trade| Event::default().event("trade").json_data(&trade)),
    );
    let live = BroadcastStream::new(rx).map(|item| match item {
        Ok(trade) => Event::default().event("trade").json_data(&trade),
        // A slow consumer skips ahead instead of stalling ingestion
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            Ok(Event::default().event("lagged").data(missed.to_string()))
        }
    });

    Sse::new(replay.chain(live))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn metrics_handler() -> Response {
    match metrics::encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("❌ Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.tracker.snapshot().await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "down", "error": e.to_string() })),
        )
            .into_response(),
    }
}
