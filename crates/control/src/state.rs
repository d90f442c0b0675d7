use std::sync::Arc;

use engine_domain::config::Config;
use engine_executor::Executor;
use engine_store::Store;

/// Shared state passed to every API handler. Thin on purpose — all
/// control logic lives in [`Executor`]; this crate only routes,
/// validates, and translates errors to HTTP status codes.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
}
