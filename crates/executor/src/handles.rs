//! Registry of live task loops, keyed 1:1 (one loop per task id, not N
//! permits per session) since the invariant here is serial execution
//! within a task, parallel across tasks.

use std::collections::HashMap;

use engine_assistant::CancelToken;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Handle {
    join: JoinHandle<()>,
    stop: CancelToken,
}

#[derive(Default)]
pub struct ExecutorHandles {
    inner: Mutex<HashMap<String, Handle>>,
}

impl ExecutorHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: &str, join: JoinHandle<()>, stop: CancelToken) {
        self.inner
            .lock()
            .insert(task_id.to_string(), Handle { join, stop });
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.inner.lock().contains_key(task_id)
    }

    /// Clone the stop token for a live task without removing it from the
    /// registry.
    pub fn stop_token(&self, task_id: &str) -> Option<CancelToken> {
        self.inner.lock().get(task_id).map(|h| h.stop.clone())
    }

    /// Remove and return the join handle and stop token for a task, if
    /// one is registered. Used by `stop`/`delete` so the loop task is no
    /// longer considered "running" the moment cancellation begins.
    pub fn take(&self, task_id: &str) -> Option<(JoinHandle<()>, CancelToken)> {
        self.inner
            .lock()
            .remove(task_id)
            .map(|h| (h.join, h.stop))
    }
}
