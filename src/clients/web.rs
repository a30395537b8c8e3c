use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rig::{completion::CompletionModel, embeddings::EmbeddingModel};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::Agent;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing message, session_id, or user_id")]
    MissingField,
    #[error("{0}")]
    Engine(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingField => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            ApiError::Engine(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "response": format!("Error: {}", message),
                    "error": true,
                })),
            )
                .into_response(),
        }
    }
}

struct AppState<M: CompletionModel, E: EmbeddingModel + 'static> {
    agent: Agent<M, E>,
    // session_id -> user_id; advisory only, chat does not require it
    sessions: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct StartResponse {
    message: &'static str,
    user_id: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
    session_id: String,
}

/// HTTP front-end over [`Agent`]: session bootstrap, the chat endpoint and
/// the static chat page.
pub struct WebClient<M: CompletionModel, E: EmbeddingModel + 'static> {
    agent: Agent<M, E>,
    static_dir: PathBuf,
}

impl<M, E> WebClient<M, E>
where
    M: CompletionModel + Send + Sync + 'static,
    E: EmbeddingModel + Send + Sync + 'static,
{
    pub fn new(agent: Agent<M, E>, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent,
            static_dir: static_dir.into(),
        }
    }

    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<()> {
        let state = Arc::new(AppState {
            agent: self.agent,
            sessions: RwLock::new(HashMap::new()),
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/start", post(start_session::<M, E>))
            .route("/chat", post(chat::<M, E>))
            .route("/health", get(health::<M, E>))
            .fallback_service(ServeDir::new(&self.static_dir))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        info!(addr = %addr, "Starting web client");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn health<M, E>(State(state): State<Arc<AppState<M, E>>>) -> Json<serde_json::Value>
where
    M: CompletionModel + Send + Sync + 'static,
    E: EmbeddingModel + Send + Sync + 'static,
{
    let sessions = state.sessions.read().await.len();
    let entries = state.agent.knowledge().store().count().await.unwrap_or(0);
    Json(json!({
        "status": "ok",
        "sessions": sessions,
        "knowledge_entries": entries,
    }))
}

async fn start_session<M, E>(
    State(state): State<Arc<AppState<M, E>>>,
    Json(request): Json<StartRequest>,
) -> Json<StartResponse>
where
    M: CompletionModel + Send + Sync + 'static,
    E: EmbeddingModel + Send + Sync + 'static,
{
    let user_id = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(short_id);
    let session_id = new_session_id(&user_id);

    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), user_id.clone());

    info!(user_id = %user_id, session_id = %session_id, "Session started");
    Json(StartResponse {
        message: "Session started.",
        user_id,
        session_id,
    })
}

async fn chat<M, E>(
    State(state): State<Arc<AppState<M, E>>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError>
where
    M: CompletionModel + Send + Sync + 'static,
    E: EmbeddingModel + Send + Sync + 'static,
{
    let (message, session_id, user_id) = validate(&request)?;

    match state.agent.respond(message, session_id, user_id).await {
        Ok(response) => Ok(Json(ChatResponse {
            response,
            session_id: session_id.to_string(),
        })),
        Err(e) => {
            error!(error = ?e, "Chat engine failed");
            Err(ApiError::Engine(e.to_string()))
        }
    }
}

fn validate(request: &ChatRequest) -> Result<(&str, &str, &str), ApiError> {
    let message = request.message.trim();
    let session_id = request.session_id.trim();
    let user_id = request.user_id.trim();

    if message.is_empty() || session_id.is_empty() || user_id.is_empty() {
        return Err(ApiError::MissingField);
    }

    Ok((message, session_id, user_id))
}

fn new_session_id(user_id: &str) -> String {
    format!("{}_{}", user_id, short_id())
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: &str, session_id: &str, user_id: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    #[test]
    fn validate_accepts_complete_request() {
        let request = request("How do I set up VPN?", "alice_1a2b3c4d", "alice");
        let (message, session_id, user_id) = validate(&request).unwrap();
        assert_eq!(message, "How do I set up VPN?");
        assert_eq!(session_id, "alice_1a2b3c4d");
        assert_eq!(user_id, "alice");
    }

    #[test]
    fn validate_trims_fields() {
        let request = request("  hi  ", " s1 ", " u1 ");
        let (message, session_id, user_id) = validate(&request).unwrap();
        assert_eq!(message, "hi");
        assert_eq!(session_id, "s1");
        assert_eq!(user_id, "u1");
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(validate(&request("", "s1", "u1")).is_err());
        assert!(validate(&request("hi", "   ", "u1")).is_err());
        assert!(validate(&request("hi", "s1", "")).is_err());
    }

    #[test]
    fn session_ids_embed_the_user_id() {
        let session_id = new_session_id("alice");
        let (prefix, suffix) = session_id.split_once('_').unwrap();
        assert_eq!(prefix, "alice");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_ids_are_eight_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
