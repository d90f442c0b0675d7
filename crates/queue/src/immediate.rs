//! Out-of-band dispatch signalling for [`crate::UserInputQueue::trigger_immediate`].
//! A per-task registry shape generalized from cancel tokens to
//! [`tokio::sync::Notify`] handles — a task's live loop awaits its
//! handle instead of polling the queue.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
pub struct ImmediateDispatchRegistry {
    handles: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ImmediateDispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the notify handle for a task. The executor calls
    /// this once when it starts a task's loop.
    pub fn handle(&self, task_id: &str) -> Arc<Notify> {
        self.handles
            .lock()
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Best-effort wake: if no loop is currently registered for this
    /// task, this is a silent no-op.
    pub fn notify(&self, task_id: &str) {
        if let Some(handle) = self.handles.lock().get(task_id) {
            handle.notify_one();
        }
    }

    /// Drop the handle once a task's loop exits so the registry doesn't
    /// grow unbounded across the lifetime of the process.
    pub fn remove(&self, task_id: &str) {
        self.handles.lock().remove(task_id);
    }
}
