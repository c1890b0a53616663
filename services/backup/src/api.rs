use crate::config::ApiConfig;
use crate::listener::ConnectionState;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub connection: watch::Receiver<ConnectionState>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/backup", get(health_check))
        .route("/backup/", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "running" }))
}

/// Readiness probe, healthy only while the broker connection is up
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let connection = *state.connection.borrow();

    match connection {
        ConnectionState::Connected => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "mqtt": connection.as_str()
            })),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "mqtt": connection.as_str()
            })),
        ),
    }
}

/// Serve the health API until `token` is cancelled
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    token: CancellationToken,
) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting health API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn router(connection: ConnectionState) -> Router {
        let (_tx, rx) = watch::channel(connection);
        create_router(AppState { connection: rx })
    }

    #[tokio::test]
    async fn test_health_reports_running() {
        for uri in ["/health", "/backup", "/backup/"] {
            let (status, body) = get_json(router(ConnectionState::Disconnected), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, serde_json::json!({ "status": "running" }));
        }
    }

    #[tokio::test]
    async fn test_ready_follows_connection_state() {
        let (status, body) = get_json(router(ConnectionState::Connected), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mqtt"], "connected");

        let (status, body) = get_json(router(ConnectionState::Reconnecting), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
        assert_eq!(body["mqtt"], "reconnecting");
    }
}
