use crate::ingest::IngestState;
use crate::metrics;
use crate::registry::SubscriberRegistry;
use crate::ws;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::error;

const DASHBOARD: &str = include_str!("index.html");

#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Arc<SubscriberRegistry>,
    pub log_path: PathBuf,
    pub ingest_state: watch::Receiver<IngestState>,
    pub subscriber_buffer: usize,
    pub index_page: Arc<str>,
}

impl AppState {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        log_path: PathBuf,
        ingest_state: watch::Receiver<IngestState>,
        subscriber_buffer: usize,
    ) -> Self {
        Self {
            registry,
            log_path,
            ingest_state,
            subscriber_buffer,
            index_page: Arc::from(DASHBOARD),
        }
    }

    pub fn with_index_page(mut self, html: String) -> Self {
        self.index_page = Arc::from(html);
        self
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    subscribers: usize,
    state: IngestState,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler))
        .route("/download", get(download))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(state.index_page.to_string())
}

async fn download(State(state): State<AppState>) -> Result<Response, AppError> {
    let bytes = match tokio::fs::read(&state.log_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((StatusCode::NOT_FOUND, "No telemetry recorded yet").into_response());
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"telemetry.csv\"",
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn metrics_handler() -> Result<String, AppError> {
    Ok(metrics::gather_metrics()?)
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        subscribers: state.registry.len(),
        state: *state.ingest_state.borrow(),
    })
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(log_path: PathBuf) -> AppState {
        let (_tx, rx) = watch::channel(IngestState::Running);
        AppState::new(SubscriberRegistry::new(), log_path, rx, 8)
    }

    #[tokio::test]
    async fn test_download_serves_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.csv");
        std::fs::write(&path, "ts,device_id,temp_c,humidity\n").unwrap();

        let response = create_router(state(path))
            .oneshot(Request::get("/download").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert!(response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("telemetry.csv"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ts,device_id,temp_c,humidity\n");
    }

    #[tokio::test]
    async fn test_download_before_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let response = create_router(state(dir.path().join("telemetry.csv")))
            .oneshot(Request::get("/download").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_state() {
        let dir = tempfile::tempdir().unwrap();
        let response = create_router(state(dir.path().join("telemetry.csv")))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["state"], "running");
        assert_eq!(health["subscribers"], 0);
    }
}
