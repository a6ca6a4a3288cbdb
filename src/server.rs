// 🌐 HTTP API (feature "server")
//
// POST /api/chat       one chat turn
// POST /api/report     report without the intent gate
// GET  /api/export     CSV for an export link
// GET  /api/merchants  merchant memory
// PUT  /api/merchants  remember token → category
// GET  /api/health

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::engine::{ChatLedger, EngineError, Outcome};
use crate::export::{export_csv, file_name};
use crate::intent::Intent;
use crate::model::MerchantMapping;
use crate::report::{ExportQuery, ReportReply};

/// Header a client can use to identify its device across requests
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatLedger>,
    /// Conversation used when a request names none
    pub default_conversation: String,
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: None,
        }
    }

    fn err(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            retryable: Some(retryable),
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err(message, false))).into_response()
}

/// Storage trouble is the caller's cue to retry, never a silent drop
fn engine_failure(e: &EngineError) -> Response {
    error!("Request failed: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::err(e.user_message(), e.is_retryable())),
    )
        .into_response()
}

fn join_failure(e: tokio::task::JoinError) -> Response {
    error!("Worker task failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::err("internal error", true)),
    )
        .into_response()
}

// ============================================================================
// CALLER IDENTITY
// ============================================================================

/// Body `caller_id` → `X-Client-Id` header → peer IP → "anonymous"
pub fn resolve_caller(body: Option<&str>, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    body.and_then(non_empty)
        .or_else(|| {
            headers
                .get(CLIENT_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(non_empty)
        })
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "anonymous".to_string())
}

// ============================================================================
// REQUESTS / RESPONSES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub intent: Intent,
    pub outcome: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_link: Option<String>,
    pub caller_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportRequestBody {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct MerchantUpdate {
    pub token: String,
    pub category: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/chat - One chat turn
async fn chat(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Response {
    let message = body.message.unwrap_or_default();
    if message.trim().is_empty() {
        return bad_request("Missing 'message'");
    }

    let caller_id = resolve_caller(body.caller_id.as_deref(), &headers, peer.map(|c| c.0));
    let conversation_id = body
        .conversation_id
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| state.default_conversation.clone());

    let engine = state.engine.clone();
    let caller = caller_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        engine.handle(&message, &conversation_id, &caller)
    })
    .await;

    match result {
        Ok(Ok(reply)) => {
            let export_link = reply.export_link().map(str::to_string);
            let outcome = serde_json::to_value(&reply.outcome).unwrap_or(serde_json::Value::Null);
            if matches!(reply.outcome, Outcome::RepeatRequest) {
                warn!("Caller {} asked to repeat after pending conflict", caller_id);
            }
            Json(ApiResponse::ok(ChatResponse {
                reply: reply.text,
                intent: reply.intent,
                outcome,
                export_link,
                caller_id,
            }))
            .into_response()
        }
        Ok(Err(e)) => engine_failure(&e),
        Err(e) => join_failure(e),
    }
}

/// POST /api/report - Report for a message, defaulting to the current month
async fn report(State(state): State<AppState>, Json(body): Json<ReportRequestBody>) -> Response {
    let conversation_id = body
        .conversation_id
        .unwrap_or_else(|| state.default_conversation.clone());
    let engine = state.engine.clone();

    let result = tokio::task::spawn_blocking(move || {
        engine.handle_report(&body.message, &conversation_id)
    })
    .await;

    match result {
        Ok(Ok(reply)) => Json(ApiResponse::<ReportReply>::ok(reply)).into_response(),
        Ok(Err(e)) => engine_failure(&e),
        Err(e) => join_failure(e),
    }
}

/// GET /api/export?from&to&type&property - CSV download
async fn export(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> Response {
    let engine = state.engine.clone();
    let q = query.clone();
    let result =
        tokio::task::spawn_blocking(move || export_csv(engine.ledger().as_ref(), &q)).await;

    match result {
        Ok(Ok(csv)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file_name(&query)),
                ),
            ],
            csv,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!("Export failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::<()>::err("export unavailable", true)),
            )
                .into_response()
        }
        Err(e) => join_failure(e),
    }
}

/// GET /api/merchants - All merchant mappings
async fn list_merchants(State(state): State<AppState>) -> Response {
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.merchants().all()).await;

    match result {
        Ok(Ok(mappings)) => Json(ApiResponse::<Vec<MerchantMapping>>::ok(mappings)).into_response(),
        Ok(Err(e)) => engine_failure(&e.into()),
        Err(e) => join_failure(e),
    }
}

/// PUT /api/merchants - Remember token → category
async fn put_merchant(
    State(state): State<AppState>,
    Json(update): Json<MerchantUpdate>,
) -> Response {
    let engine = state.engine.clone();
    let result =
        tokio::task::spawn_blocking(move || engine.merchants().set(&update.token, &update.category))
            .await;

    match result {
        Ok(Ok(Some(mapping))) => Json(ApiResponse::ok(mapping)).into_response(),
        Ok(Ok(None)) => bad_request("Missing 'token' or 'category'"),
        Ok(Err(e)) => engine_failure(&e.into()),
        Err(e) => join_failure(e),
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route("/report", post(report))
        .route("/export", get(export))
        .route("/merchants", get(list_merchants).put(put_merchant))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
