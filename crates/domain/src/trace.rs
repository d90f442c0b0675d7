use serde::Serialize;

/// Structured trace events emitted across all engine crates.
///
/// Each variant is logged through [`TraceEvent::emit`] as a single
/// `tracing::info!` line carrying the event as a JSON blob, so external
/// log aggregation can pull out the shape without re-parsing prose.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TaskCreated {
        task_id: String,
        name: String,
    },
    TaskStatusChanged {
        task_id: String,
        from: String,
        to: String,
    },
    SessionIdCaptured {
        task_id: String,
        session_id: String,
    },
    WorkspaceProvisioned {
        task_id: String,
        branch: String,
        worktree_path: String,
    },
    WorkspaceReclaimed {
        task_id: String,
        committed: bool,
    },
    WorkspaceReclaimBlocked {
        task_id: String,
        reason: String,
    },
    CriteriaJudged {
        task_id: String,
        is_complete: bool,
        confidence: f64,
    },
    SubscriberLagged {
        task_id: String,
        skipped: u64,
    },
    ChunkTooLarge {
        task_id: String,
        byte_len: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "engine_event");
    }
}
