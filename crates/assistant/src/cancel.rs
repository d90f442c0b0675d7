//! A cancellation token the executor hands to [`crate::client::send`] so a
//! `stop` request or an idle timeout can abort an in-flight subprocess
//! call. Ported from the shape of a per-turn cancel token used to signal
//! a running conversation loop to stop cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
