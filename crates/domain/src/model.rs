//! Core entities — Task, Interaction, Project — and their supporting
//! value types, per the data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Testing,
    Completed,
    Failed,
    Finished,
    Exhausted,
}

impl TaskStatus {
    /// Active: the task currently owns a live workspace and may run.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Running | Self::Paused | Self::Testing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Finished | Self::Exhausted
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project attachment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectAccess {
    Read,
    Write,
}

/// A project descriptor attached to a task at create time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRef {
    pub name: String,
    pub path: String,
    pub access: ProjectAccess,
    #[serde(default)]
    pub context: Option<String>,
    /// Forward-compatible bag: unknown keys are preserved on write but
    /// ignored by core logic.
    #[serde(default)]
    pub extra: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Criteria config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaConfig {
    #[serde(default)]
    pub criteria: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

fn default_max_iterations() -> u32 {
    25
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            criteria: None,
            max_iterations: default_max_iterations(),
            max_tokens: None,
            warning: None,
            extra: serde_json::Value::Null,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User input queue entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub images: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub base64: String,
    pub media_type: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub owner: String,

    pub description: String,
    #[serde(default)]
    pub project_context: Option<String>,
    #[serde(default)]
    pub projects: Vec<ProjectRef>,

    pub root_path: String,
    pub branch: String,
    pub base_branch: String,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub assistant_session_id: Option<String>,

    pub status: TaskStatus,
    #[serde(default)]
    pub subprocess_id: Option<String>,
    #[serde(default)]
    pub immediate_processing_active: bool,

    pub criteria_config: CriteriaConfig,
    #[serde(default)]
    pub total_tokens_used: u64,
    #[serde(default)]
    pub interaction_count: u64,

    #[serde(default)]
    pub user_input_queue: VecDeque<UserInputEntry>,
    #[serde(default)]
    pub user_input_pending: bool,

    #[serde(default)]
    pub chat_mode: bool,

    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency counter, bumped on every write. Callers of
    /// `Store::mutate` observe a `Conflict` error if the row moved under
    /// them and are expected to retry.
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// Recompute `user_input_pending` from the queue contents. Must be
    /// called every time the queue changes so the two stay in lock-step
    /// (data model invariant).
    pub fn recompute_pending(&mut self) {
        self.user_input_pending = self.user_input_queue.iter().any(|e| !e.processed);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    UserRequest,
    AssistantResponse,
    SimulatedHuman,
    ToolResult,
    ToolGroup,
    SystemMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cost += other.cost;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub task_id: String,
    pub kind: InteractionKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub duration_ms: Option<u64>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tools: Vec<ToolInvocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_active_terminal_partition() {
        use TaskStatus::*;
        let all = [
            Pending, Running, Paused, Stopped, Testing, Completed, Failed, Finished, Exhausted,
        ];
        for s in all {
            // No status is both active and terminal.
            assert!(!(s.is_active() && s.is_terminal()), "{s:?}");
        }
        assert!(Pending.is_active());
        assert!(Running.is_active());
        assert!(Paused.is_active());
        assert!(Testing.is_active());
        assert!(!Stopped.is_active());
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Finished.is_terminal());
        assert!(Exhausted.is_terminal());
    }

    #[test]
    fn recompute_pending_reflects_unprocessed_entries() {
        let mut task = sample_task();
        assert!(!task.user_input_pending);

        task.user_input_queue.push_back(UserInputEntry {
            id: "e1".into(),
            text: "hi".into(),
            images: vec![],
            timestamp: Utc::now(),
            processed: false,
        });
        task.recompute_pending();
        assert!(task.user_input_pending);

        task.user_input_queue[0].processed = true;
        task.recompute_pending();
        assert!(!task.user_input_pending);
    }

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: "t1".into(),
            name: "demo".into(),
            owner: "owner".into(),
            description: "desc".into(),
            project_context: None,
            projects: vec![],
            root_path: "/repo".into(),
            branch: "task/demo".into(),
            base_branch: "main".into(),
            worktree_path: None,
            assistant_session_id: None,
            status: TaskStatus::Pending,
            subprocess_id: None,
            immediate_processing_active: false,
            criteria_config: CriteriaConfig::default(),
            total_tokens_used: 0,
            interaction_count: 0,
            user_input_queue: VecDeque::new(),
            user_input_pending: false,
            chat_mode: false,
            summary: None,
            error_message: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}
