//! HTTP control API.
//!
//! Paths and payload shapes:
//! - `POST /containers/create/{name}` with optional `{username, password}`
//! - `GET /containers/list`
//! - `DELETE /containers/remove/{nameOrId}`

mod handlers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::sandbox::{SandboxError, SandboxManager};

/// Shared handler state.
#[derive(Clone)]
pub(crate) struct AppState {
    pub manager: Arc<SandboxManager>,
    pub started_at: DateTime<Utc>,
}

/// Build the control API router.
pub(crate) fn router(manager: Arc<SandboxManager>) -> Router {
    let state = AppState {
        manager,
        started_at: Utc::now(),
    };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/containers/create/{name}", post(handlers::create))
        .route("/containers/list", get(handlers::list))
        .route("/containers/remove/{name}", delete(handlers::remove))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A `SandboxError` rendered as an HTTP response.
#[derive(Debug)]
pub(crate) struct ApiError(SandboxError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SandboxError::AlreadyExists { .. }
            | SandboxError::NoFreePort
            | SandboxError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            SandboxError::NotFound { .. } => StatusCode::NOT_FOUND,
            SandboxError::ImagePullFailure { .. }
            | SandboxError::StartFailure { .. }
            | SandboxError::Runtime { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self.0);
        }
        let body = Json(json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sandbox::{ManagerSettings, MockRuntime};
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(runtime: &MockRuntime) -> Router {
        runtime.add_image("sshbox-sandbox:latest");
        let settings = ManagerSettings::from_config(&Config::default()).unwrap();
        router(Arc::new(SandboxManager::new(
            Arc::new(runtime.clone()),
            settings,
        )))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SandboxError::already_exists("a"), StatusCode::BAD_REQUEST),
            (SandboxError::NoFreePort, StatusCode::BAD_REQUEST),
            (SandboxError::invalid_request("x"), StatusCode::BAD_REQUEST),
            (SandboxError::not_found("a"), StatusCode::NOT_FOUND),
            (
                SandboxError::image_pull_failure("i", "m"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SandboxError::start_failure("a", "m"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (SandboxError::runtime("m"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(&MockRuntime::new());
        let (status, json) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_without_body_uses_defaults() {
        let app = app(&MockRuntime::new());
        let (status, json) = send(&app, "POST", "/containers/create/alice", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "alice");
        assert_eq!(json["status"], "running");
        assert_eq!(json["port"], 22001);
        assert_eq!(json["username"], "tanu");
        assert_eq!(json["password"], "123");
    }

    #[tokio::test]
    async fn test_create_with_credentials() {
        let app = app(&MockRuntime::new());
        let (status, json) = send(
            &app,
            "POST",
            "/containers/create/alice",
            Some(serde_json::json!({"username": "dev", "password": "pw"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["username"], "dev");
        assert_eq!(json["password"], "pw");
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_body() {
        let app = app(&MockRuntime::new());
        let request = Request::builder()
            .method("POST")
            .uri("/containers/create/alice")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_duplicate_is_bad_request() {
        let app = app(&MockRuntime::new());
        send(&app, "POST", "/containers/create/alice", None).await;
        let (status, json) = send(&app, "POST", "/containers/create/alice", None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "already_exists");
    }

    #[tokio::test]
    async fn test_pool_exhaustion_and_reuse() {
        let app = app(&MockRuntime::new());
        for (name, port) in [("alice", 22001), ("bob", 22002), ("carol", 22003)] {
            let (status, json) =
                send(&app, "POST", &format!("/containers/create/{name}"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["port"], port);
        }

        let (status, json) = send(&app, "POST", "/containers/create/dave", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "no_free_port");

        let (status, json) = send(&app, "DELETE", "/containers/remove/alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Container alice removed");

        let (status, json) = send(&app, "POST", "/containers/create/eve", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["port"], 22001);
    }

    #[tokio::test]
    async fn test_list() {
        let runtime = MockRuntime::new();
        runtime.insert_foreign("redis", 6379);
        let app = app(&runtime);
        send(&app, "POST", "/containers/create/alice", None).await;

        let (status, json) = send(&app, "GET", "/containers/list", None).await;
        assert_eq!(status, StatusCode::OK);

        let items = json.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "alice");
        assert_eq!(items[0]["status"], "running");
        assert_eq!(items[0]["port"], 22001);
        assert!(items[0].get("password").is_none());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_404() {
        let app = app(&MockRuntime::new());
        let (status, json) = send(&app, "DELETE", "/containers/remove/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Container not found: ghost");
    }

    #[tokio::test]
    async fn test_remove_unmanaged_container_is_404() {
        let runtime = MockRuntime::new();
        runtime.insert_foreign("postgres", 5432);
        let app = app(&runtime);

        let (status, json) = send(&app, "DELETE", "/containers/remove/postgres", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["kind"], "not_found");
        assert!(runtime.container("postgres").is_some());
    }

    #[tokio::test]
    async fn test_runtime_failure_is_500() {
        let runtime = MockRuntime::new();
        let app = app(&runtime);
        runtime.fail_list("daemon gone");

        let (status, json) = send(&app, "GET", "/containers/list", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["kind"], "runtime_error");
    }
}
