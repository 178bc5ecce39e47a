//! REST API server for the advisory chat layer
//!
//! Thin transport boundary: parses requests, calls the orchestrator and
//! serializes the result. No routing logic lives here.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;
use crate::models::FileContext;

const MAX_MESSAGE_CHARS: usize = 4_000;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub file_context: Option<FileContext>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            error_code: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn status_for(error: &OrchestrationError) -> StatusCode {
    match error {
        OrchestrationError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        OrchestrationError::InvalidSessionId(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        OrchestrationError::GenerationError { .. }
        | OrchestrationError::RetrievalError { .. }
        | OrchestrationError::HttpError(_) => StatusCode::BAD_GATEWAY,
        OrchestrationError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: OrchestrationError) -> ApiResult {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(error = %error, code = error.code(), "Request failed");
    }
    (status, Json(ApiResponse::error(error.to_string(), error.code())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "active_sessions": state.orchestrator.store().len().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let message = req.message.trim();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("message must not be empty", "INVALID_REQUEST")),
        );
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ApiResponse::error(
                format!("message exceeds {} characters", MAX_MESSAGE_CHARS),
                "INVALID_REQUEST",
            )),
        );
    }

    let session_id = req.session_id.as_deref().filter(|id| !id.trim().is_empty());
    info!(session_id = ?session_id, "Chat request received");

    // A dropped connection drops this future, abandoning the turn before its memory write
    match state
        .orchestrator
        .process_message_with_context(message, session_id, req.file_context)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => failure(e),
    }
}

/// =============================
/// Session Endpoints
/// =============================

async fn session_summary(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    match state.orchestrator.session_summary(&session_id).await {
        Ok(summary) => (StatusCode::OK, Json(ApiResponse::success(summary))),
        Err(e) => failure(e),
    }
}

async fn reset_session(State(state): State<ApiState>, Path(session_id): Path<String>) -> ApiResult {
    match state.orchestrator.reset_session(&session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "session_id": session_id,
                "reset": true,
            }))),
        ),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions/:session_id/summary", get(session_summary))
        .route("/api/sessions/:session_id", delete(reset_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(&OrchestrationError::SessionNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&OrchestrationError::InvalidSessionId("../x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&OrchestrationError::GenerationTimeout(100)),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&OrchestrationError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ApiResponse::error("Session not found: x", "SESSION_NOT_FOUND")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "SESSION_NOT_FOUND");
        assert!(body.get("data").is_none());
    }
}
