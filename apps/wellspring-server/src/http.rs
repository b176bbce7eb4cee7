use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use gqlkit::async_graphql::dynamic::Schema;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    schema: Schema,
}

/// `POST /graphql`, `GET /schema` (SDL) and `GET /healthz`.
pub fn router(schema: Schema) -> Router {
    Router::new()
        .route("/graphql", post(graphql))
        .route("/schema", get(sdl))
        .route("/healthz", get(healthz))
        .with_state(AppState { schema })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn graphql(
    State(state): State<AppState>,
    Json(request): Json<gqlkit::async_graphql::Request>,
) -> Json<gqlkit::async_graphql::Response> {
    Json(state.schema.execute(request).await)
}

async fn sdl(State(state): State<AppState>) -> String {
    state.schema.sdl()
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serves `router` on `addr` until `cancel` fires, then waits up to
/// `drain` for in-flight requests.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    cancel: CancellationToken,
    drain: Duration,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "HTTP server bound");

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully");
        }
    };
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .into_future();

    tokio::select! {
        res = server => res.context("HTTP server failed"),
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(drain).await;
        } => {
            tracing::warn!(drain_secs = drain.as_secs(), "Shutdown timeout elapsed; dropping open connections");
            Ok(())
        }
    }
}
