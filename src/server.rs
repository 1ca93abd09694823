//! HTTP surface of the service.
//!
//! Routes mirror the original backend: the page shell at `/`, the
//! streaming `/chat` endpoint, feedback create/patch, trace-URL
//! resolution and a health ping. The chat response body is
//! newline-delimited JSON assembled from the chain's event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::chain::{AnswerChain, ChainRequest, HistoryPair};
use crate::events::ndjson_line;
use crate::langsmith::LangSmithClient;
use crate::ui;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The answer chain behind `/chat`.
    pub chain: Arc<AnswerChain>,
    /// LangSmith client for feedback and traces.
    pub langsmith: Arc<LangSmithClient>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

/// Build the application router.
///
/// CORS is wide open: the chat front end is served from its own origin,
/// as in the original deployment.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_endpoint))
        .route("/feedback", post(send_feedback).patch(update_feedback))
        .route("/get_trace", post(get_trace))
        .route("/ping", get(ping))
        .route("/", get(index_handler))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Index page handler.
async fn index_handler() -> impl IntoResponse {
    Html(ui::index_page())
}

/// Request body for the chat endpoint.
#[derive(Debug, Deserialize)]
struct ChatRequestBody {
    /// User message content.
    message: String,
    /// Prior turns as `{human, ai}` pairs, oldest first.
    #[serde(default)]
    history: Option<Vec<HistoryPair>>,
    /// Client-side conversation id.
    #[serde(default)]
    conversation_id: Option<String>,
}

/// POST /chat - stream the answer as newline-delimited JSON.
async fn chat_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ChatRequestBody>,
) -> Response {
    tracing::info!(
        message_length = req.message.len(),
        history_turns = req.history.as_ref().map_or(0, Vec::len),
        conversation_id = ?req.conversation_id,
        "received chat request"
    );

    let chain_req = ChainRequest {
        question: req.message,
        history: req.history.unwrap_or_default(),
        conversation_id: req.conversation_id,
    };
    let chain = Arc::clone(&state.chain);

    let lines = async_stream::stream! {
        let inner = chain.stream(chain_req);
        futures::pin_mut!(inner);
        while let Some(item) = inner.next().await {
            match item {
                Ok(event) => yield Ok::<String, Infallible>(ndjson_line(&event)),
                Err(e) => {
                    // The body is already committed; log and end the stream.
                    tracing::error!(error = %e, "chat stream aborted");
                    break;
                }
            }
        }
    };

    build_stream_response(axum::body::Body::from_stream(lines))
}

/// POST /feedback - record feedback for a run.
async fn send_feedback(State(state): State<AppState>, Json(data): Json<Value>) -> Response {
    let Some(run_id) = data.get("run_id").and_then(Value::as_str) else {
        return Json(json!({
            "result": "No LangSmith run ID provided",
            "code": 400,
        }))
        .into_response();
    };

    let key = data.get("key").and_then(Value::as_str).unwrap_or("user_score");
    let score = data.get("score").cloned().filter(|v| !v.is_null());
    let comment = data.get("comment").and_then(Value::as_str);

    match state.langsmith.create_feedback(run_id, key, score, comment).await {
        Ok(()) => Json(json!({
            "result": "posted feedback successfully",
            "code": 200,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "failed to post feedback");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to post feedback: {e}"),
            )
                .into_response()
        }
    }
}

/// PATCH /feedback - update an existing feedback entry.
async fn update_feedback(State(state): State<AppState>, Json(data): Json<Value>) -> Response {
    let Some(feedback_id) = data.get("feedback_id").and_then(Value::as_str) else {
        return Json(json!({
            "result": "No feedback ID provided",
            "code": 400,
        }))
        .into_response();
    };

    let score = data.get("score").cloned().filter(|v| !v.is_null());
    let comment = data.get("comment").and_then(Value::as_str);

    match state.langsmith.update_feedback(feedback_id, score, comment).await {
        Ok(()) => Json(json!({
            "result": "patched feedback successfully",
            "code": 200,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(feedback_id = %feedback_id, error = %e, "failed to patch feedback");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to patch feedback: {e}"),
            )
                .into_response()
        }
    }
}

/// POST /get_trace - resolve the shareable trace URL for a run.
async fn get_trace(State(state): State<AppState>, Json(data): Json<Value>) -> Response {
    let Some(run_id) = data.get("run_id").and_then(Value::as_str) else {
        return Json(json!({
            "result": "No LangSmith run ID provided",
            "code": 400,
        }))
        .into_response();
    };

    match state.langsmith.trace_url(run_id).await {
        Ok(url) => Json(url).into_response(),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "failed to resolve trace url");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to resolve trace: {e}"),
            )
                .into_response()
        }
    }
}

/// GET /ping - health check.
async fn ping() -> Json<Value> {
    Json(json!({ "ping": "pong!" }))
}

fn build_stream_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert("Content-Type", "application/x-ndjson".parse().unwrap());
    h.insert("Cache-Control", "no-cache".parse().unwrap());
    h.insert("X-Accel-Buffering", "no".parse().unwrap());
    resp
}
