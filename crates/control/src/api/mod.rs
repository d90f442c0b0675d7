pub mod tasks;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router. No auth/CORS/rate-limit layers — this
/// facade is meant to sit behind a reverse proxy or run on a loopback
/// interface rather than face the public internet directly.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tasks", post(tasks::create_task))
        .route("/v1/tasks/:name/start", post(tasks::start_task))
        .route("/v1/tasks/:name/stop", post(tasks::stop_task))
        .route("/v1/tasks/:name/resume", post(tasks::resume_task))
        .route("/v1/tasks/:name/recover", post(tasks::recover_task))
        .route("/v1/tasks/:name/send_input", post(tasks::send_input))
        .route("/v1/tasks/:name", delete(tasks::delete_task))
        .route("/v1/tasks/:name/events", get(tasks::task_events_sse))
        .route("/v1/tasks/:name/transcript", get(tasks::fetch_transcript))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
