//! User input queue (component F) — a per-task FIFO implemented purely
//! through [`Store::mutate`]; this crate owns no state of its own beyond
//! the store handle and a small out-of-band dispatch registry, so the
//! queue and its `user_input_pending` summary flag always move together.

pub mod immediate;

use chrono::{DateTime, Utc};
use engine_domain::model::{Attachment, UserInputEntry};
use engine_domain::Result;
use engine_store::Store;

pub use immediate::ImmediateDispatchRegistry;

pub struct UserInputQueue<'a> {
    store: &'a dyn Store,
}

impl<'a> UserInputQueue<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Append a new entry and mark the task's pending flag. Id and
    /// timestamp are supplied by the caller so J's deterministic test
    /// doubles never reach for the wall clock or a random generator
    /// through this crate.
    pub fn push(
        &self,
        task_id: &str,
        id: String,
        text: String,
        images: Vec<Attachment>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.store.mutate(
            task_id,
            Box::new(move |task| {
                task.user_input_queue.push_back(UserInputEntry {
                    id,
                    text,
                    images,
                    timestamp,
                    processed: false,
                });
                Ok(())
            }),
        )?;
        Ok(())
    }

    /// Return the oldest unprocessed entry, marking it processed in the
    /// same `mutate` call so a crash between read and mark can never
    /// replay the same input twice.
    pub fn pop_unprocessed(&self, task_id: &str) -> Result<Option<UserInputEntry>> {
        use std::sync::Arc;
        let popped: Arc<parking_lot::Mutex<Option<UserInputEntry>>> = Arc::new(parking_lot::Mutex::new(None));
        let slot = popped.clone();
        self.store.mutate(
            task_id,
            Box::new(move |task| {
                if let Some(entry) = task.user_input_queue.iter_mut().find(|e| !e.processed) {
                    entry.processed = true;
                    *slot.lock() = Some(entry.clone());
                }
                Ok(())
            }),
        )?;
        let result = popped.lock().take();
        Ok(result)
    }

    /// Fast path: read `user_input_pending` without loading the queue.
    pub fn has_unprocessed(&self, task_id: &str) -> Result<bool> {
        Ok(self.store.get_task(task_id)?.user_input_pending)
    }

    /// `push` plus a best-effort out-of-band wake of the task's live
    /// loop. The `immediate_processing_active` guard (set here, cleared
    /// by the loop once it consumes the entry) prevents the scheduled
    /// iteration from also picking it up.
    pub fn trigger_immediate(
        &self,
        task_id: &str,
        id: String,
        text: String,
        images: Vec<Attachment>,
        timestamp: DateTime<Utc>,
        registry: &ImmediateDispatchRegistry,
    ) -> Result<()> {
        self.store.mutate(
            task_id,
            Box::new(move |task| {
                task.user_input_queue.push_back(UserInputEntry {
                    id,
                    text,
                    images,
                    timestamp,
                    processed: false,
                });
                task.immediate_processing_active = true;
                Ok(())
            }),
        )?;
        registry.notify(task_id);
        Ok(())
    }

    /// Clear the guard after the loop has consumed the immediately
    /// dispatched entry.
    pub fn clear_immediate_guard(&self, task_id: &str) -> Result<()> {
        self.store.mutate(
            task_id,
            Box::new(|task| {
                task.immediate_processing_active = false;
                Ok(())
            }),
        )?;
        Ok(())
    }
}
