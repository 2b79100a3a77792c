use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use rater_core::traits::HealthProbe;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: &'static str,
    pub version: &'static str,
}

pub fn router<P: HealthProbe>(probe: P) -> Router {
    Router::new()
        .route("/health", get(health::<P>))
        .with_state(probe)
}

async fn health<P: HealthProbe>(State(probe): State<P>) -> impl IntoResponse {
    let (status, broker) = match probe.ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    let response = HealthResponse {
        status: if status == StatusCode::OK {
            "ok"
        } else {
            "unavailable"
        },
        broker,
        version: env!("CARGO_PKG_VERSION"),
    };

    (status, Json(response))
}

/// Bind the health listener on all interfaces.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {addr}"))?;
    tracing::info!("Health endpoint listening on {addr}");
    Ok(listener)
}

/// Serve the health endpoint on `listener` until `cancel_token` fires.
pub async fn serve<P: HealthProbe>(
    listener: TcpListener,
    probe: P,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(probe).layer(TraceLayer::new_for_http());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;

    Ok(())
}
