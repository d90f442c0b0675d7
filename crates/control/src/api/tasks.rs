//! Task control endpoints — create, lifecycle transitions, transcript
//! fetch, and a live SSE event stream.
//!
//! - `POST   /v1/tasks`                    — create a task
//! - `POST   /v1/tasks/:name/start`        — start it
//! - `POST   /v1/tasks/:name/stop`         — stop it
//! - `POST   /v1/tasks/:name/resume`       — resume after a stop
//! - `POST   /v1/tasks/:name/recover`      — recover after exhaustion
//! - `POST   /v1/tasks/:name/send_input`   — queue human input
//! - `DELETE /v1/tasks/:name`              — delete a terminal task
//! - `GET    /v1/tasks/:name/events`       — SSE stream of task events
//! - `GET    /v1/tasks/:name/transcript`   — full interaction transcript
//!
//! Every handler is keyed by task *name* at the edge (the natural
//! human-facing identifier) and resolves to the store's internal task
//! *id* before calling into the executor, whose own API is id-keyed.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use engine_domain::model::{Attachment, CriteriaConfig, ProjectRef};
use engine_domain::Error;
use engine_executor::CreateTaskRequest;
use engine_fanout::TaskEvent;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    pub name: String,
    pub owner: String,
    pub description: String,
    pub root_path: String,
    pub base_branch: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub projects: Vec<ProjectRef>,
    #[serde(default)]
    pub project_context: Option<String>,
    #[serde(default)]
    pub criteria_config: CriteriaConfig,
    #[serde(default)]
    pub chat_mode: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendInputBody {
    pub text: String,
    #[serde(default)]
    pub images: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct RecoverBody {
    #[serde(default)]
    pub raise_max_iterations: Option<u32>,
    #[serde(default)]
    pub raise_max_tokens: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> impl IntoResponse {
    let req = CreateTaskRequest {
        name: body.name,
        owner: body.owner,
        description: body.description,
        root_path: body.root_path,
        base_branch: body.base_branch,
        branch: body.branch,
        projects: body.projects,
        project_context: body.project_context,
        criteria_config: body.criteria_config,
        chat_mode: body.chat_mode,
    };

    match state.executor.create(req).await {
        Ok(task) => (StatusCode::CREATED, Json(serde_json::json!(task))).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle transitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_task(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.executor.start(&task_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn stop_task(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.executor.stop(&task_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn resume_task(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.executor.resume(&task_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn recover_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<RecoverBody>>,
) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let Json(body) = body.unwrap_or(Json(RecoverBody { raise_max_iterations: None, raise_max_tokens: None }));
    match state
        .executor
        .recover(&task_id, body.raise_max_iterations, body.raise_max_tokens)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn send_input(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SendInputBody>,
) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.executor.send_input(&task_id, body.text, body.images).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_task(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    match state.executor.delete(&task_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:name/transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn fetch_transcript(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let transcript = state.executor.fetch_transcript(&task_id);
    Json(serde_json::json!(transcript)).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/tasks/:name/events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn task_events_sse(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let task_id = match resolve_id(&state, &name) {
        Ok(id) => id,
        Err(r) => return r,
    };
    let rx = state.executor.subscribe(&task_id);
    let stream = make_task_event_stream(rx);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn make_task_event_stream(
    rx: tokio::sync::broadcast::Receiver<TaskEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    futures_util::stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        let event = engine_fanout::recv(&mut rx).await?;
        let event_type = match &event {
            TaskEvent::Interaction(_) => "task.interaction",
            TaskEvent::StatusChanged { .. } => "task.status",
            TaskEvent::SubscriberLagged { .. } => "task.lagged",
            TaskEvent::TaskDeleted => "task.deleted",
        };
        let close = match &event {
            TaskEvent::StatusChanged { status } => status.is_terminal(),
            TaskEvent::TaskDeleted => true,
            _ => false,
        };
        let data = serde_json::to_string(&event).unwrap_or_default();
        let item = Ok(Event::default().event(event_type).data(data));
        Some((item, (rx, close)))
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn resolve_id(state: &AppState, name: &str) -> Result<String, axum::response::Response> {
    state
        .store
        .get_task_by_name(name)
        .map(|t| t.id)
        .map_err(|e| error_response(&e))
}

fn error_response(e: &Error) -> axum::response::Response {
    let status = match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) | Error::BranchInUse(_) | Error::ReclaimBlocked(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AssistantTimeout => StatusCode::GATEWAY_TIMEOUT,
        Error::Assistant(_) => StatusCode::BAD_GATEWAY,
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::SubprocessSpawnFailed(_) | Error::Io(_) | Error::Json(_) | Error::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}
