//! HTTP front door.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Queue length and task counts |
//! | `GET`  | `/is-model-loaded` | Whether the model service reported ready |
//! | `GET`  | `/status/{uuid}` | Status of one task, with its result when done |
//! | `GET`  | `/tasks` | Every known URL with its task, result, and chat history |
//! | `POST` | `/tasks` | Enqueue a URL (`{"url": ...}`) |
//! | `POST` | `/chat` | Ask about a processed page (`{"uuid": ..., "message": ...}`) |
//! | `GET`  | `/ws` | WebSocket stream of task updates |
//!
//! # WebSocket Messages
//!
//! Every frame is `{"type": ..., "payload": ...}`. A client first receives
//! `connected`, then one `task_update` per task that completes while it is
//! connected:
//!
//! ```json
//! { "type": "task_update", "payload": { "uuid": "...", "url": "...", "status": "done", "result": { ... } } }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `chat_error` (502),
//! `internal` (500).

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use pagewise_core::models::{CacheEntry, ProcessResult, Role, TaskStatus};
use pagewise_core::queue::TaskQueue;
use pagewise_core::store::{RecordStore, MODELS_READY_FLAG};

use crate::conversation::{strip_context_prefix, ConversationManager};
use crate::producer::enqueue_url;
use crate::queue::{Notification, NotificationHub};
use crate::readiness::ReadinessPoller;
use crate::scrape::validate_url;
use crate::stats::{collect_stats, Stats};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub conversations: Arc<ConversationManager>,
    pub readiness: Arc<ReadinessPoller>,
    pub events: NotificationHub,
    /// Channel whose notifications are forwarded as task updates.
    pub results_channel: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/is-model-loaded", get(handle_model_loaded))
        .route("/status/{uuid}", get(handle_status))
        .route("/tasks", get(handle_list_tasks).post(handle_enqueue))
        .route("/chat", post(handle_chat))
        .route("/ws", get(handle_ws))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` turns `true`.
pub async fn run_server(
    bind_addr: &str,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: format!("{:#}", err),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn chat_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "chat_error",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<Stats>, AppError> {
    Ok(Json(
        collect_stats(state.store.as_ref(), state.queue.as_ref()).await?,
    ))
}

// ============ GET /is-model-loaded ============

#[derive(Serialize)]
struct ModelLoadedResponse {
    loaded: bool,
}

/// Ready if this process saw readiness, or another one persisted the flag.
async fn handle_model_loaded(
    State(state): State<AppState>,
) -> Result<Json<ModelLoadedResponse>, AppError> {
    let loaded = state.readiness.is_ready()
        || state.store.get_flag(MODELS_READY_FLAG).await?.as_deref() == Some("true");
    Ok(Json(ModelLoadedResponse { loaded }))
}

// ============ GET /status/{uuid} ============

#[derive(Serialize)]
struct StatusResponse {
    uuid: String,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CacheEntry>,
}

async fn handle_status(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state
        .store
        .get_status(&uuid)
        .await?
        .ok_or_else(|| not_found(format!("task not found: {}", uuid)))?;

    let url = state.store.find_url_for_task(&uuid).await?;
    let result = match (&url, status) {
        (Some(url), TaskStatus::Done) => state.store.get_cache(url).await?,
        _ => None,
    };

    Ok(Json(StatusResponse {
        uuid,
        status,
        url,
        result,
    }))
}

// ============ GET /tasks ============

#[derive(Serialize)]
struct TaskSummary {
    url: String,
    uuid: String,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentiment: Option<String>,
    conversation: Vec<DisplayTurn>,
}

#[derive(Serialize)]
struct DisplayTurn {
    role: Role,
    content: String,
}

#[derive(Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskSummary>,
}

/// Task history. User turns are shown without their retrieved context.
async fn handle_list_tasks(
    State(state): State<AppState>,
) -> Result<Json<TaskListResponse>, AppError> {
    let mut tasks = Vec::new();
    for (url, mapping) in state.store.list_url_mappings().await? {
        let cached = state.store.get_cache(&url).await?;
        let conversation = state
            .store
            .get_conversation(&mapping.task_id)
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|turn| DisplayTurn {
                role: turn.role,
                content: match turn.role {
                    Role::User => strip_context_prefix(&turn.content).to_string(),
                    _ => turn.content,
                },
            })
            .collect();

        tasks.push(TaskSummary {
            url,
            uuid: mapping.task_id,
            status: mapping.status,
            summary: cached.as_ref().map(|c| c.summary.clone()),
            sentiment: cached.map(|c| c.sentiment),
            conversation,
        });
    }
    Ok(Json(TaskListResponse { tasks }))
}

// ============ POST /tasks ============

#[derive(Deserialize)]
struct EnqueueRequest {
    url: String,
}

#[derive(Serialize)]
struct EnqueueResponse {
    uuid: String,
    status: TaskStatus,
    created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<CacheEntry>,
}

async fn handle_enqueue(
    State(state): State<AppState>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let url = req.url.trim();
    validate_url(url).map_err(|e| bad_request(e.to_string()))?;

    let enqueued = enqueue_url(state.store.as_ref(), state.queue.as_ref(), url).await?;
    let code = if enqueued.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    let result = match (enqueued.created, enqueued.status) {
        (false, TaskStatus::Done) => state.store.get_cache(url).await?,
        _ => None,
    };
    Ok((
        code,
        Json(EnqueueResponse {
            uuid: enqueued.task_id,
            status: enqueued.status,
            created: enqueued.created,
            result,
        }),
    ))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    uuid: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    uuid: String,
    answer: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    if state.store.get_status(&req.uuid).await?.is_none() {
        return Err(not_found(format!("task not found: {}", req.uuid)));
    }

    let reply = state
        .conversations
        .chat(&req.uuid, &req.message)
        .await
        .map_err(|e| chat_error(format!("{:#}", e)))?;

    Ok(Json(ChatResponse {
        uuid: req.uuid,
        answer: reply.answer,
    }))
}

// ============ GET /ws ============

#[derive(Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
enum WsMessage {
    Connected(String),
    TaskUpdate(TaskUpdate),
}

#[derive(Serialize)]
struct TaskUpdate {
    uuid: String,
    url: String,
    status: TaskStatus,
    result: CacheEntry,
}

impl From<ProcessResult> for TaskUpdate {
    fn from(done: ProcessResult) -> Self {
        Self {
            uuid: done.task_id,
            url: done.url,
            status: TaskStatus::Done,
            result: done.result,
        }
    }
}

/// Subscribes before upgrading, so nothing published after the request
/// arrives is missed.
async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_task_updates(socket, events, state.results_channel))
}

async fn stream_task_updates(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<Notification>,
    results_channel: String,
) {
    let welcome = WsMessage::Connected("WebSocket connection established".to_string());
    if send_json(&mut socket, &welcome).await.is_err() {
        return;
    }
    debug!("websocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(note) if note.channel == results_channel => {
                    let done: ProcessResult = match serde_json::from_str(&note.payload) {
                        Ok(done) => done,
                        Err(e) => {
                            warn!(error = %e, "skipping malformed result notification");
                            continue;
                        }
                    };
                    let update = WsMessage::TaskUpdate(done.into());
                    if send_json(&mut socket, &update).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client fell behind, updates dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("websocket client disconnected");
}

async fn send_json(socket: &mut WebSocket, message: &WsMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}
