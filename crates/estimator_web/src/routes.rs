//! HTTP routes: the page, session endpoints and the SSE turn stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use estimator_chat::{ChatError, ChatManager, SessionId, SessionSnapshot, TurnEvent};

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Shared state of the web server
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChatManager>,
    /// Model name shown by the health check
    pub model: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Chat(ChatError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Chat(ChatError::LlmNotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Chat(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub content: String,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(end_session))
        .route("/api/sessions/:id/messages", post(send_message))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.model.clone(),
    })
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CreatedSession>) {
    let id = state.manager.create_session().await;
    (StatusCode::CREATED, Json(CreatedSession { id }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.manager.get_session(&id).await?))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.end_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a turn and stream its events. Dropping the response closes the
/// channel, which cancels the turn.
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if body.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Message content is empty".to_string()));
    }

    let rx = state.manager.send_message(&id, &body.content).await?;
    debug!("Streaming turn of session {}", id);

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &TurnEvent) -> Event {
    match Event::default().event(event.kind()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => Event::default()
            .event("error")
            .data(json!({ "type": "error", "message": e.to_string() }).to_string()),
    }
}
