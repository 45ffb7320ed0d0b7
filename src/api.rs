//! REST API Server for the query pipeline
//!
//! Exposes `ask` and the observability log over HTTP.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::models::{Event, EventTag};
use crate::pipeline::QueryPipeline;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AskRequest {
    pub question: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Caller-safe view of a recorded event: fixed labels only, never SQL,
/// engine diagnostics, row digests, or free text.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EventSummary {
    pub sequence: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tag: EventTag,
    pub correlation_id: Option<Uuid>,
    pub kind: Option<String>,
    pub stage: Option<String>,
    pub direction: Option<String>,
    pub attempt: Option<u64>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        let label = |key: &str| {
            event.payload[key]
                .as_str()
                .map(|value| value.to_string())
        };

        Self {
            sequence: event.sequence,
            timestamp: event.timestamp,
            tag: event.tag,
            correlation_id: event.correlation_id,
            kind: label("kind"),
            stage: label("stage"),
            direction: label("direction"),
            attempt: event.payload["attempt"].as_u64(),
        }
    }
}

fn summarize(events: &[Event]) -> Vec<EventSummary> {
    events.iter().map(EventSummary::from).collect()
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<QueryPipeline>,
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<ApiResponse> {
    Json(ApiResponse::success(serde_json::json!({ "status": "ok" })))
}

async fn ask_handler(
    State(state): State<ApiState>,
    Json(req): Json<AskRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let question = req.question.trim();
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("question must not be empty".to_string())),
        );
    }

    info!(chars = question.len(), "Received ask request");

    let outcome = state.pipeline.ask_detailed(question).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "answer": outcome.answer,
            "correlation_id": outcome.correlation_id,
            "attempts": outcome.state.attempts_made,
            "state": outcome.state,
        }))),
    )
}

async fn events_handler(State(state): State<ApiState>) -> Json<ApiResponse> {
    let events = state.pipeline.recorder().drain().await;
    Json(ApiResponse::success(summarize(&events)))
}

async fn correlation_events_handler(
    State(state): State<ApiState>,
    Path(correlation_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let Ok(correlation_id) = Uuid::parse_str(&correlation_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "invalid correlation id: {}",
                correlation_id
            ))),
        );
    };

    let events = state.pipeline.recorder().events_for(correlation_id).await;
    (StatusCode::OK, Json(ApiResponse::success(summarize(&events))))
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<QueryPipeline>) -> Router {
    let state = ApiState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/api/ask", post(ask_handler))
        .route("/api/events", get(events_handler))
        .route("/api/events/:correlation_id", get(correlation_events_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<QueryPipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
