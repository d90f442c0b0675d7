//! The task executor (component J) — the heart of the system. Owns the
//! per-task loop that alternates between choosing the next user turn and
//! invoking the assistant, and the handful of control-surface operations
//! (create/start/stop/resume/recover/delete/send_input) that observe or
//! mutate a task's row. One `tokio::spawn`, instrumented with a span,
//! per active task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use engine_assistant::{AssistantClient, CancelToken, EventSink, SpawnRequest};
use engine_criteria::CriteriaAnalyzer;
use engine_domain::clock::{Clock, IdGenerator};
use engine_domain::model::{
    Attachment, CriteriaConfig, Interaction, InteractionKind, ProjectRef, Task, TaskStatus, Usage,
};
use engine_domain::trace::TraceEvent;
use engine_domain::{Error, Result};
use engine_fanout::{FanOut, TaskEvent};
use engine_queue::{ImmediateDispatchRegistry, UserInputQueue};
use engine_store::{MutateFn, Store};
use engine_workspace::WorkspaceManager;
use tokio::sync::Notify;

/// Matches `StoreConfig::max_mutate_retries`'s default — the executor has
/// no handle on the live config, so this mirrors rather than reads it.
const MUTATE_RETRY_LIMIT: u32 = 3;
const STORAGE_UNAVAILABLE_STEP: Duration = Duration::from_secs(5);
const STORAGE_UNAVAILABLE_BUDGET: Duration = Duration::from_secs(30);

use crate::handles::ExecutorHandles;
use crate::prompt::build_initial_prompt;
use crate::state_machine::{self, Event};

pub struct CreateTaskRequest {
    pub name: String,
    pub owner: String,
    pub description: String,
    pub root_path: String,
    pub base_branch: String,
    pub branch: Option<String>,
    pub projects: Vec<ProjectRef>,
    pub project_context: Option<String>,
    pub criteria_config: CriteriaConfig,
    pub chat_mode: bool,
}

pub struct Executor {
    store: Arc<dyn Store>,
    workspace: Arc<WorkspaceManager>,
    assistant: Arc<dyn AssistantClient>,
    criteria: Option<Arc<dyn CriteriaAnalyzer>>,
    fanout: Arc<FanOut>,
    clock: Arc<dyn Clock>,
    idgen: Arc<dyn IdGenerator>,
    handles: ExecutorHandles,
    immediate: ImmediateDispatchRegistry,
}

impl Executor {
    pub fn new(
        store: Arc<dyn Store>,
        workspace: Arc<WorkspaceManager>,
        assistant: Arc<dyn AssistantClient>,
        criteria: Option<Arc<dyn CriteriaAnalyzer>>,
        fanout: Arc<FanOut>,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            workspace,
            assistant,
            criteria,
            fanout,
            clock,
            idgen,
            handles: ExecutorHandles::new(),
            immediate: ImmediateDispatchRegistry::new(),
        })
    }

    // ── control surface ──────────────────────────────────────────────

    pub async fn create(&self, req: CreateTaskRequest) -> Result<Task> {
        let provision = self
            .workspace
            .provision(&req.name, &req.root_path, &req.base_branch, req.branch.as_deref())
            .await?;

        let now = self.clock.now();
        let task = Task {
            id: self.idgen.new_id(),
            name: req.name.clone(),
            owner: req.owner,
            description: req.description,
            project_context: req.project_context,
            projects: req.projects,
            root_path: req.root_path,
            branch: provision.branch,
            base_branch: req.base_branch,
            worktree_path: Some(provision.worktree_path),
            assistant_session_id: None,
            status: TaskStatus::Pending,
            subprocess_id: None,
            immediate_processing_active: false,
            criteria_config: req.criteria_config,
            total_tokens_used: 0,
            interaction_count: 0,
            user_input_queue: VecDeque::new(),
            user_input_pending: false,
            chat_mode: req.chat_mode,
            summary: None,
            error_message: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        self.store.create_task(task.clone())?;
        TraceEvent::TaskCreated {
            task_id: task.id.clone(),
            name: task.name.clone(),
        }
        .emit();

        Ok(task)
    }

    /// Precondition: `PENDING`. A `max_iterations = 0` task is exhausted
    /// before the loop ever calls the assistant.
    pub async fn start(self: &Arc<Self>, task_id: &str) -> Result<()> {
        let task = self.store.get_task(task_id)?;
        self.set_status(task_id, Event::Start, None)?;

        if task.criteria_config.max_iterations == 0 {
            self.set_status(
                task_id,
                Event::CapExceeded,
                Some("iteration cap (max_iterations = 0) tripped before any turn".to_string()),
            )?;
            return Ok(());
        }

        self.spawn_loop(task_id);
        Ok(())
    }

    /// Precondition: status in `{RUNNING, PAUSED, TESTING}`. Cancels the
    /// live loop's in-flight assistant call (if any) and waits for the
    /// loop task to observe it, bounded so a hung subprocess can never
    /// make `stop` itself hang.
    pub async fn stop(&self, task_id: &str) -> Result<()> {
        self.set_status(task_id, Event::Stop, None)?;
        if let Some((join, stop)) = self.handles.take(task_id) {
            stop.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(3), join).await;
        }
        Ok(())
    }

    /// Precondition: `STOPPED`. Respawns the loop with the task's
    /// existing `assistant_session_id`.
    pub async fn resume(self: &Arc<Self>, task_id: &str) -> Result<()> {
        self.set_status(task_id, Event::Resume, None)?;
        self.spawn_loop(task_id);
        Ok(())
    }

    /// Precondition: terminal or `STOPPED`. Clears the session id (the
    /// next subprocess call is a fresh, non-resuming invocation) while
    /// preserving every prior Interaction, and optionally raises the
    /// iteration/token caps before respawning the loop.
    pub async fn recover(
        self: &Arc<Self>,
        task_id: &str,
        raise_max_iterations: Option<u32>,
        raise_max_tokens: Option<u64>,
    ) -> Result<()> {
        self.set_status(task_id, Event::Recover, None)?;
        self.store.mutate(
            task_id,
            Box::new(move |t| {
                t.assistant_session_id = None;
                t.error_message = None;
                if let Some(mi) = raise_max_iterations {
                    t.criteria_config.max_iterations = mi;
                }
                if let Some(mt) = raise_max_tokens {
                    t.criteria_config.max_tokens = Some(mt);
                }
                Ok(())
            }),
        )?;
        self.spawn_loop(task_id);
        Ok(())
    }

    /// Enqueued regardless of status; if the task is `PENDING`, this is
    /// an implicit start. If the loop is already live, the entry is
    /// dispatched immediately rather than waiting for the next scheduled
    /// iteration (this is also what wakes a suspended `chat_mode` loop).
    pub async fn send_input(
        self: &Arc<Self>,
        task_id: &str,
        text: String,
        images: Vec<Attachment>,
    ) -> Result<()> {
        let task = self.store.get_task(task_id)?;
        let queue = UserInputQueue::new(self.store.as_ref());
        let id = self.idgen.new_id();
        let now = self.clock.now();

        if self.handles.is_running(task_id) {
            queue.trigger_immediate(task_id, id, text, images, now, &self.immediate)?;
        } else {
            queue.push(task_id, id, text, images, now)?;
        }

        if task.status == TaskStatus::Pending {
            self.set_status(task_id, Event::ImplicitStart, None)?;
            self.spawn_loop(task_id);
        }
        Ok(())
    }

    /// Unconditional. Stops any live loop, reclaims the workspace
    /// (commit-first), then deletes the task and its interactions. A
    /// blocked reclaim leaves the task row intact so a retry is
    /// possible — "unconditional" describes which task *statuses* accept
    /// `delete`, not that a failed reclaim is silently discarded.
    pub async fn delete(&self, task_id: &str) -> Result<()> {
        let task = self.store.get_task(task_id)?;

        if let Some((join, stop)) = self.handles.take(task_id) {
            stop.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), join).await;
        }

        if let Some(worktree_path) = &task.worktree_path {
            self.workspace
                .reclaim(worktree_path, &task.branch, &task.base_branch, &task.root_path)
                .await?;
        }

        self.store.delete_interactions(task_id)?;
        self.store.delete_task(task_id)?;
        self.fanout.delete(task_id);
        self.immediate.remove(task_id);
        Ok(())
    }

    pub fn subscribe(&self, task_id: &str) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.fanout.subscribe(task_id)
    }

    pub fn fetch_transcript(&self, task_id: &str) -> Vec<Interaction> {
        self.store.list_interactions(task_id)
    }

    // ── internals ────────────────────────────────────────────────────

    fn spawn_loop(self: &Arc<Self>, task_id: &str) {
        let stop = CancelToken::new();
        let executor = self.clone();
        let id = task_id.to_string();
        let stop_for_loop = stop.clone();

        let span = tracing::info_span!("task_loop", task_id = %id);
        let join = tokio::spawn(tracing::Instrument::instrument(
            run_task_loop(executor, id.clone(), stop_for_loop),
            span,
        ));
        self.handles.register(&id, join, stop);
    }

    fn set_status(
        &self,
        task_id: &str,
        event: Event,
        error_message: Option<String>,
    ) -> Result<TaskStatus> {
        let current = self.store.get_task(task_id)?.status;
        let next = state_machine::transition(current, event)?;
        let now = self.clock.now();
        let has_message = error_message.is_some();

        self.store.mutate(
            task_id,
            Box::new(move |t| {
                t.status = next;
                if next.is_terminal() {
                    t.completed_at = Some(now);
                }
                if has_message {
                    t.error_message = error_message;
                }
                Ok(())
            }),
        )?;

        TraceEvent::TaskStatusChanged {
            task_id: task_id.to_string(),
            from: format!("{current:?}"),
            to: format!("{next:?}"),
        }
        .emit();
        self.fanout.publish(task_id, TaskEvent::StatusChanged { status: next });
        Ok(next)
    }
}

/// The per-task main loop. Runs until a terminal status is
/// reached or `stop` cancels it. Serialized within a task by
/// construction: only [`Executor::spawn_loop`] ever creates one of
/// these, and it replaces whatever was registered for the task id.
///
/// Whether to build the initial prompt or the next conversational turn
/// is derived from the persisted `interaction_count` rather than a
/// local flag, so a respawn via `resume`/`recover` — which starts this
/// function fresh but on a task that has already taken turns — never
/// repeats the initial prompt.
async fn run_task_loop(executor: Arc<Executor>, task_id: String, stop: CancelToken) {
    run_task_loop_inner(&executor, &task_id, &stop).await;
    executor.immediate.remove(&task_id);
}

async fn run_task_loop_inner(executor: &Arc<Executor>, task_id: &str, stop: &CancelToken) {
    loop {
        if stop.is_cancelled() {
            return;
        }

        let task = match with_backoff(|| executor.store.get_task(task_id)).await {
            Ok(t) => t,
            Err(e) => return fail_task(executor, task_id, e).await,
        };

        let prompt = if task.interaction_count == 0 {
            build_initial_prompt(&task)
        } else {
            let previous_reply = last_assistant_reply(executor, task_id);
            match next_user_turn(executor, &task, task_id, &previous_reply, stop).await {
                NextTurn::Text(text) => text,
                NextTurn::Stopped => return,
            }
        };

        let user_interaction = Interaction {
            id: executor.idgen.new_id(),
            task_id: task_id.to_string(),
            kind: InteractionKind::UserRequest,
            content: prompt.clone(),
            timestamp: executor.clock.now(),
            usage: Usage::default(),
            duration_ms: None,
            attachments: vec![],
            tools: vec![],
        };
        if let Err(e) =
            with_backoff(|| executor.store.append_interaction(user_interaction.clone())).await
        {
            return fail_task(executor, task_id, e).await;
        }
        executor
            .fanout
            .publish(task_id, TaskEvent::Interaction(user_interaction));

        let req = SpawnRequest {
            prompt,
            workdir: task.worktree_path.clone().unwrap_or_else(|| task.root_path.clone()),
            resume_session_id: task.assistant_session_id.clone(),
        };

        let turn = match invoke_assistant(executor, task_id, req, stop).await {
            Ok(turn) => turn,
            Err(_) if stop.is_cancelled() => return,
            Err(e) => {
                let _ = executor.set_status(task_id, Event::ExecutionError, Some(e.to_string()));
                return;
            }
        };

        if let Some(session_id) = turn.session_id {
            if task.assistant_session_id.is_none() {
                let captured = session_id.clone();
                let make_fn = move || -> MutateFn<'static> {
                    let captured = captured.clone();
                    Box::new(move |t: &mut Task| {
                        t.assistant_session_id = Some(captured);
                        Ok(())
                    })
                };
                if let Err(e) = mutate_with_retry(executor.store.as_ref(), task_id, make_fn).await {
                    return fail_task(executor, task_id, e).await;
                }
                TraceEvent::SessionIdCaptured {
                    task_id: task_id.to_string(),
                    session_id,
                }
                .emit();
            }
        }

        if let Err(e) =
            with_backoff(|| executor.store.increment_tokens(task_id, turn.usage.output_tokens)).await
        {
            return fail_task(executor, task_id, e).await;
        }
        let bump_interaction_count = || -> MutateFn<'static> {
            Box::new(|t: &mut Task| {
                t.interaction_count += 1;
                Ok(())
            })
        };
        if let Err(e) = mutate_with_retry(executor.store.as_ref(), task_id, bump_interaction_count).await
        {
            return fail_task(executor, task_id, e).await;
        }

        if stop.is_cancelled() {
            return;
        }

        match check_completion(executor, task_id, &turn.full_text).await {
            Completion::Finished => {
                let _ = executor.set_status(task_id, Event::CriteriaMet, None);
                return;
            }
            Completion::TestsPassed => {
                let _ = executor.set_status(task_id, Event::EnterTesting, None);
                let _ = executor.set_status(task_id, Event::TestsPass, None);
                return;
            }
            Completion::TestsFailed => {
                let _ = executor.set_status(task_id, Event::EnterTesting, None);
                let _ = executor.set_status(
                    task_id,
                    Event::TestsFail,
                    Some("assistant reported a failing test suite".to_string()),
                );
                return;
            }
            Completion::Continue => {}
        }

        if let Ok(task) = executor.store.get_task(task_id) {
            if let Some(reason) = cap_tripped(&task) {
                let _ = executor.set_status(task_id, Event::CapExceeded, Some(reason));
                return;
            }
        }

        if stop.is_cancelled() {
            return;
        }
    }
}

/// Retry a read-only store call on `Error::StorageUnavailable`, stepping
/// `STORAGE_UNAVAILABLE_STEP` at a time up to `STORAGE_UNAVAILABLE_BUDGET`
/// total before giving up. Any other error returns immediately.
async fn with_backoff<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut elapsed = Duration::ZERO;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(Error::StorageUnavailable(_)) if elapsed < STORAGE_UNAVAILABLE_BUDGET => {
                tokio::time::sleep(STORAGE_UNAVAILABLE_STEP).await;
                elapsed += STORAGE_UNAVAILABLE_STEP;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `mutate` retried up to `MUTATE_RETRY_LIMIT` times on `Error::Conflict`
/// and backed off up to `STORAGE_UNAVAILABLE_BUDGET` on
/// `Error::StorageUnavailable`. `make_fn` is a factory rather than a
/// single closure because `MutateFn` is `FnOnce` — a fresh box is needed
/// for every attempt.
async fn mutate_with_retry(
    store: &dyn Store,
    task_id: &str,
    make_fn: impl Fn() -> MutateFn<'static>,
) -> Result<Task> {
    let mut conflict_retries = 0;
    let mut elapsed = Duration::ZERO;
    loop {
        match store.mutate(task_id, make_fn()) {
            Ok(task) => return Ok(task),
            Err(Error::Conflict(_)) if conflict_retries < MUTATE_RETRY_LIMIT => {
                conflict_retries += 1;
            }
            Err(Error::StorageUnavailable(_)) if elapsed < STORAGE_UNAVAILABLE_BUDGET => {
                tokio::time::sleep(STORAGE_UNAVAILABLE_STEP).await;
                elapsed += STORAGE_UNAVAILABLE_STEP;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Any error kind other than a transient conflict or a short storage
/// outage (both already absorbed by the retry helpers above) transitions
/// the task straight to `FAILED` with the cause recorded.
async fn fail_task(executor: &Arc<Executor>, task_id: &str, cause: Error) {
    tracing::warn!(task_id, error = %cause, "task loop failing task after unrecoverable store error");
    let _ = executor.set_status(task_id, Event::ExecutionError, Some(cause.to_string()));
}

enum NextTurn {
    Text(String),
    Stopped,
}

/// The priority contract: an unprocessed queue entry always wins over
/// the auto-responder. In `chat_mode` with an empty queue, the loop
/// suspends until a push (delivered as an immediate dispatch) or a
/// stop request wakes it.
async fn next_user_turn(
    executor: &Arc<Executor>,
    task: &Task,
    task_id: &str,
    last_assistant_text: &str,
    stop: &CancelToken,
) -> NextTurn {
    let queue = UserInputQueue::new(executor.store.as_ref());
    loop {
        match queue.pop_unprocessed(task_id) {
            Ok(Some(entry)) => {
                let _ = queue.clear_immediate_guard(task_id);
                return NextTurn::Text(entry.text);
            }
            Ok(None) => {
                if !task.chat_mode {
                    let iteration = task.interaction_count as u32;
                    return NextTurn::Text(engine_responder::generate(last_assistant_text, iteration));
                }
                let notify = executor.immediate_handle(task_id);
                let paused = executor.set_status(task_id, Event::PauseForTurn, None).is_ok();
                wait_for_wake(stop, &notify).await;
                if paused {
                    let _ = executor.set_status(task_id, Event::DispatchResume, None);
                }
                if stop.is_cancelled() {
                    return NextTurn::Stopped;
                }
                // Woken up: loop back and re-check the queue.
            }
            Err(_) => return NextTurn::Stopped,
        }
    }
}

async fn wait_for_wake(stop: &CancelToken, notify: &Notify) {
    loop {
        if stop.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = notify.notified() => return,
            _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
        }
    }
}

async fn invoke_assistant(
    executor: &Arc<Executor>,
    task_id: &str,
    req: SpawnRequest,
    stop: &CancelToken,
) -> Result<engine_assistant::AssistantTurnResult> {
    let store = executor.store.clone();
    let fanout = executor.fanout.clone();
    let sink_task_id = task_id.to_string();
    let mut sink: Box<EventSink<'_>> = Box::new(move |interaction: &Interaction| {
        let _ = store.append_interaction(interaction.clone());
        fanout.publish(&sink_task_id, TaskEvent::Interaction(interaction.clone()));
    });

    executor
        .assistant
        .send(
            task_id,
            req,
            stop,
            executor.clock.as_ref(),
            executor.idgen.as_ref(),
            &mut *sink,
        )
        .await
}

/// How the loop should react to the latest assistant turn: keep going,
/// finish via criteria/heuristic, or resolve a tests pass/fail cue.
enum Completion {
    Continue,
    Finished,
    TestsPassed,
    TestsFailed,
}

/// If criteria analysis confirms completion, the task is done via
/// `FINISHED`. Otherwise an explicit tests pass/fail cue routes through
/// `TESTING` instead, and only then does the general completion heuristic
/// (completion cues with no trailing question) apply.
/// `engine_responder::should_continue` already implements that heuristic
/// as "false only when the completion branch fired and no question cue is
/// present" — reused here rather than duplicated.
async fn check_completion(executor: &Arc<Executor>, task_id: &str, latest_assistant_text: &str) -> Completion {
    let task = match executor.store.get_task(task_id) {
        Ok(t) => t,
        Err(_) => return Completion::Continue,
    };

    if let (Some(criteria), Some(analyzer)) = (&task.criteria_config.criteria, &executor.criteria) {
        let tail = tail_interactions(executor, task_id, 3);
        if let Ok(verdict) = analyzer.judge(criteria, &tail, latest_assistant_text).await {
            if verdict.counts_as_complete() {
                TraceEvent::CriteriaJudged {
                    task_id: task_id.to_string(),
                    is_complete: verdict.is_complete,
                    confidence: verdict.confidence,
                }
                .emit();
                return Completion::Finished;
            }
        }
    }

    if engine_responder::is_tests_fail_cue(latest_assistant_text) {
        return Completion::TestsFailed;
    }
    if engine_responder::is_tests_pass_cue(latest_assistant_text) {
        return Completion::TestsPassed;
    }

    if engine_responder::should_continue(latest_assistant_text, u32::MAX, 0) {
        Completion::Continue
    } else {
        Completion::Finished
    }
}

/// The content of the most recent `AssistantResponse` interaction, or
/// empty if the task has not had one yet. Read fresh from the store
/// every iteration rather than threaded through a loop-local variable,
/// so a loop respawned by `resume`/`recover` picks up where the
/// persisted transcript actually left off.
fn last_assistant_reply(executor: &Arc<Executor>, task_id: &str) -> String {
    executor
        .store
        .list_interactions(task_id)
        .into_iter()
        .rev()
        .find(|i| i.kind == InteractionKind::AssistantResponse)
        .map(|i| i.content)
        .unwrap_or_default()
}

fn tail_interactions(executor: &Arc<Executor>, task_id: &str, n: usize) -> Vec<Interaction> {
    let all = executor.store.list_interactions(task_id);
    let start = all.len().saturating_sub(n);
    all[start..].to_vec()
}

fn cap_tripped(task: &Task) -> Option<String> {
    if task.interaction_count >= task.criteria_config.max_iterations as u64 {
        return Some(format!(
            "iteration cap reached: {} >= {}",
            task.interaction_count, task.criteria_config.max_iterations
        ));
    }
    if let Some(max_tokens) = task.criteria_config.max_tokens {
        if task.total_tokens_used >= max_tokens {
            return Some(format!(
                "token cap reached: {} >= {max_tokens}",
                task.total_tokens_used
            ));
        }
    }
    None
}

impl Executor {
    fn immediate_handle(&self, task_id: &str) -> Arc<Notify> {
        self.immediate.handle(task_id)
    }
}
