use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::sandbox::{CreatedSandbox, Credentials, SandboxError, SandboxSummary};

/// Optional create body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreateRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateResponse {
    pub message: String,
    pub status: &'static str,
    #[serde(flatten)]
    pub sandbox: CreatedSandbox,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<CreateResponse>, ApiError> {
    let request = parse_create_body(&body)?;

    let sandbox = state
        .manager
        .create(
            &name,
            Credentials {
                username: request.username,
                password: request.password,
            },
        )
        .await?;

    Ok(Json(CreateResponse {
        message: "SSH sandbox created successfully".to_string(),
        status: "running",
        sandbox,
    }))
}

pub(crate) async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<SandboxSummary>>, ApiError> {
    Ok(Json(state.manager.list().await?))
}

pub(crate) async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.manager.remove(&name).await?;
    Ok(Json(MessageResponse {
        message: format!("Container {name} removed"),
    }))
}

/// An empty body means "use the defaults".
fn parse_create_body(body: &[u8]) -> Result<CreateRequest, SandboxError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| SandboxError::invalid_request(format!("malformed request body: {e}")))
}
