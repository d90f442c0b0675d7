//! End-to-end lifecycle scenarios driving a real [`Executor`] against a
//! [`MemoryStore`], a [`WorkspaceManager`] rooted at a throwaway git
//! repository, and a scripted assistant double. Mirrors the fake-binary
//! approach the assistant crate uses for its own client tests, except
//! here the double implements [`AssistantClient`] directly so the loop's
//! turn-taking logic is exercised without spawning a subprocess.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use engine_assistant::{AssistantClient, AssistantTurnResult, CancelToken, EventSink, SpawnRequest};
use engine_domain::clock::testing::{CountingIdGenerator, StepClock};
use engine_domain::clock::{Clock, IdGenerator};
use engine_domain::model::{CriteriaConfig, Interaction, InteractionKind, ProjectRef, TaskStatus, Usage};
use engine_domain::Error;
use engine_executor::{CreateTaskRequest, Executor};
use engine_fanout::FanOut;
use engine_store::{MemoryStore, Store};
use engine_workspace::WorkspaceManager;
use parking_lot::Mutex;
use tokio::sync::Notify;

struct ScriptedTurn {
    text: String,
    output_tokens: u64,
    session_id: Option<String>,
}

/// A scripted [`AssistantClient`] double. Every call emits one
/// `AssistantResponse` interaction through `on_event` — exactly as the
/// real streaming client would — then returns the scripted turn. An
/// optional pause point lets a test suspend the loop mid-flight to
/// inject a `send_input` or `stop` deterministically.
struct MockAssistant {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    seen_prompts: Mutex<Vec<String>>,
    seen_resume_ids: Mutex<Vec<Option<String>>>,
    call_count: AtomicUsize,
    /// Pause right as call N begins, after call N-1's full post-processing
    /// in the executor loop has already happened.
    pause_before_call: Option<usize>,
    /// Pause right as call N is about to return its result, before the
    /// executor loop has post-processed call N itself.
    pause_after_call: Option<usize>,
    paused: Arc<Notify>,
    resume: Arc<Notify>,
}

impl Default for MockAssistant {
    fn default() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            seen_prompts: Mutex::new(Vec::new()),
            seen_resume_ids: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            pause_before_call: None,
            pause_after_call: None,
            paused: Arc::new(Notify::new()),
            resume: Arc::new(Notify::new()),
        }
    }
}

impl MockAssistant {
    fn prompts(&self) -> Vec<String> {
        self.seen_prompts.lock().clone()
    }

    fn resume_ids(&self) -> Vec<Option<String>> {
        self.seen_resume_ids.lock().clone()
    }
}

#[async_trait::async_trait]
impl AssistantClient for MockAssistant {
    async fn send(
        &self,
        task_id: &str,
        req: SpawnRequest,
        cancel: &CancelToken,
        clock: &dyn Clock,
        idgen: &dyn IdGenerator,
        on_event: &mut EventSink<'_>,
    ) -> engine_domain::Result<AssistantTurnResult> {
        let call_index = self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.pause_before_call == Some(call_index) {
            self.paused.notify_one();
            tokio::select! {
                _ = self.resume.notified() => {}
                _ = poll_until_cancelled(cancel) => {
                    return Err(Error::Assistant("cancelled while paused".into()));
                }
            }
        }

        self.seen_prompts.lock().push(req.prompt.clone());
        self.seen_resume_ids.lock().push(req.resume_session_id.clone());

        let turn = self.turns.lock().pop_front().unwrap_or(ScriptedTurn {
            text: "Please continue.".into(),
            output_tokens: 0,
            session_id: None,
        });

        let interaction = Interaction {
            id: idgen.new_id(),
            task_id: task_id.to_string(),
            kind: InteractionKind::AssistantResponse,
            content: turn.text.clone(),
            timestamp: clock.now(),
            usage: Usage {
                output_tokens: turn.output_tokens,
                ..Default::default()
            },
            duration_ms: None,
            attachments: vec![],
            tools: vec![],
        };
        on_event(&interaction);

        if self.pause_after_call == Some(call_index) {
            self.paused.notify_one();
            tokio::select! {
                _ = self.resume.notified() => {}
                _ = poll_until_cancelled(cancel) => {
                    return Err(Error::Assistant("cancelled while paused".into()));
                }
            }
        }

        Ok(AssistantTurnResult {
            full_text: turn.text,
            subprocess_id: None,
            session_id: turn.session_id,
            usage: Usage {
                output_tokens: turn.output_tokens,
                ..Default::default()
            },
        })
    }
}

async fn poll_until_cancelled(cancel: &CancelToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn init_repo(dir: &str) {
    let run = |args: &[&str]| {
        let dir = dir.to_string();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        async move {
            tokio::process::Command::new("git")
                .current_dir(&dir)
                .args(&args)
                .output()
                .await
                .unwrap();
        }
    };
    run(&["init", "-q", "-b", "main"]).await;
    run(&["config", "user.email", "test@example.com"]).await;
    run(&["config", "user.name", "test"]).await;
    tokio::fs::write(Path::new(dir).join("README.md"), "hello").await.unwrap();
    run(&["add", "-A"]).await;
    run(&["commit", "-q", "-m", "init"]).await;
}

fn build_executor(assistant: Arc<MockAssistant>, root: &str) -> Arc<Executor> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::in_memory());
    let workspace = Arc::new(WorkspaceManager::new(".isolated"));
    let fanout = Arc::new(FanOut::default());
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new(chrono::Utc::now(), 10));
    let idgen: Arc<dyn IdGenerator> = Arc::new(CountingIdGenerator::default());
    let _ = root;
    Executor::new(store, workspace, assistant, None, fanout, clock, idgen)
}

fn base_request(name: &str, root: &str, description: &str, max_iterations: u32) -> CreateTaskRequest {
    CreateTaskRequest {
        name: name.to_string(),
        owner: "owner".to_string(),
        description: description.to_string(),
        root_path: root.to_string(),
        base_branch: "main".to_string(),
        branch: None,
        projects: Vec::<ProjectRef>::new(),
        project_context: None,
        criteria_config: CriteriaConfig {
            criteria: None,
            max_iterations,
            max_tokens: None,
            warning: None,
            extra: serde_json::Value::Null,
        },
        chat_mode: false,
    }
}

#[tokio::test]
async fn s1_happy_path_completes_on_a_heuristic_completion_cue() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    init_repo(&root).await;

    let store = Arc::new(MemoryStore::in_memory());
    let workspace = Arc::new(WorkspaceManager::new(".isolated"));
    let fanout = Arc::new(FanOut::default());
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new(chrono::Utc::now(), 10));
    let idgen: Arc<dyn IdGenerator> = Arc::new(CountingIdGenerator::default());
    let assistant = Arc::new(MockAssistant {
        turns: Mutex::new(VecDeque::from([ScriptedTurn {
            text: "Done — greet.py written.".into(),
            output_tokens: 40,
            session_id: None,
        }])),
        ..Default::default()
    });

    let executor = Executor::new(
        store.clone() as Arc<dyn Store>,
        workspace,
        assistant,
        None,
        fanout,
        clock,
        idgen,
    );

    let task = executor
        .create(base_request("t1", &root, "Write greet.py that prints 'hi'", 5))
        .await
        .unwrap();
    executor.start(&task.id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = store.get_task(&task.id).unwrap();
        if current.status == TaskStatus::Finished || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let final_task = store.get_task(&task.id).unwrap();
    assert_eq!(final_task.status, TaskStatus::Finished);
    assert_eq!(final_task.total_tokens_used, 40);
    assert_eq!(final_task.interaction_count, 1);

    let transcript = executor.fetch_transcript(&task.id);
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].kind, InteractionKind::UserRequest);
    assert!(transcript[0].content.contains("Write greet.py"));
    assert_eq!(transcript[1].kind, InteractionKind::AssistantResponse);
    assert_eq!(transcript[1].content, "Done — greet.py written.");
}

#[tokio::test]
async fn s2_priority_input_beats_the_auto_responder() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    init_repo(&root).await;

    let store = Arc::new(MemoryStore::in_memory());
    let workspace = Arc::new(WorkspaceManager::new(".isolated"));
    let fanout = Arc::new(FanOut::default());
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new(chrono::Utc::now(), 10));
    let idgen: Arc<dyn IdGenerator> = Arc::new(CountingIdGenerator::default());

    let paused = Arc::new(Notify::new());
    let resume = Arc::new(Notify::new());
    let assistant = Arc::new(MockAssistant {
        turns: Mutex::new(VecDeque::from([
            ScriptedTurn { text: "Still investigating the layout.".into(), output_tokens: 1, session_id: None },
            ScriptedTurn { text: "Trying another approach next.".into(), output_tokens: 1, session_id: None },
            ScriptedTurn { text: "Done, all tests pass.".into(), output_tokens: 1, session_id: None },
        ])),
        pause_after_call: Some(1), // pause right after turn 2 returns, before turn 3's prompt is built
        paused: paused.clone(),
        resume: resume.clone(),
        ..Default::default()
    });

    let executor = Executor::new(
        store.clone() as Arc<dyn Store>,
        workspace,
        assistant.clone(),
        None,
        fanout,
        clock,
        idgen,
    );

    let task = executor
        .create(base_request("t2", &root, "Format the codebase consistently.", 5))
        .await
        .unwrap();
    executor.start(&task.id).await.unwrap();

    paused.notified().await;
    executor
        .send_input(&task.id, "Use tabs not spaces".to_string(), vec![])
        .await
        .unwrap();
    resume.notify_one();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = store.get_task(&task.id).unwrap();
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let prompts = assistant.prompts();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[2], "Use tabs not spaces");

    let final_task = store.get_task(&task.id).unwrap();
    let dispatched = final_task
        .user_input_queue
        .iter()
        .find(|e| e.text == "Use tabs not spaces")
        .expect("queued entry must still be present");
    assert!(dispatched.processed);
}

#[tokio::test]
async fn s3_resume_continues_the_captured_session_without_replaying_the_initial_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    init_repo(&root).await;

    let store = Arc::new(MemoryStore::in_memory());
    let workspace = Arc::new(WorkspaceManager::new(".isolated"));
    let fanout = Arc::new(FanOut::default());
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new(chrono::Utc::now(), 10));
    let idgen: Arc<dyn IdGenerator> = Arc::new(CountingIdGenerator::default());

    let paused = Arc::new(Notify::new());
    let resume = Arc::new(Notify::new());
    let assistant = Arc::new(MockAssistant {
        turns: Mutex::new(VecDeque::from([
            ScriptedTurn { text: "Starting the refactor.".into(), output_tokens: 2, session_id: Some("SID".into()) },
            ScriptedTurn { text: "Still working on it.".into(), output_tokens: 2, session_id: None },
            ScriptedTurn { text: "Done, all tests pass.".into(), output_tokens: 2, session_id: None },
        ])),
        pause_before_call: Some(2),
        paused: paused.clone(),
        resume: resume.clone(),
        ..Default::default()
    });

    let executor = Executor::new(
        store.clone() as Arc<dyn Store>,
        workspace,
        assistant.clone(),
        None,
        fanout,
        clock,
        idgen,
    );

    let task = executor
        .create(base_request("t3", &root, "Refactor the module boundary.", 10))
        .await
        .unwrap();
    executor.start(&task.id).await.unwrap();

    paused.notified().await;

    let mid_task = store.get_task(&task.id).unwrap();
    assert_eq!(mid_task.assistant_session_id.as_deref(), Some("SID"));
    assert_eq!(mid_task.interaction_count, 2);

    executor.stop(&task.id).await.unwrap();
    let stopped = store.get_task(&task.id).unwrap();
    assert_eq!(stopped.status, TaskStatus::Stopped);

    executor.resume(&task.id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = store.get_task(&task.id).unwrap();
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resume_ids = assistant.resume_ids();
    assert_eq!(resume_ids.len(), 3);
    assert_eq!(resume_ids[2].as_deref(), Some("SID"));

    let final_task = store.get_task(&task.id).unwrap();
    assert_eq!(final_task.assistant_session_id.as_deref(), Some("SID"));

    let transcript = executor.fetch_transcript(&task.id);
    let user_requests: Vec<&Interaction> = transcript.iter().filter(|i| i.kind == InteractionKind::UserRequest).collect();
    // Initial prompt, then one responder-generated turn per loop pass —
    // including the pass that was aborted by `stop` and retaken after
    // `resume`, since the turn's prompt is persisted before the
    // assistant call that consumes it.
    assert_eq!(user_requests.len(), 4);
    assert!(user_requests[0].content.contains("Refactor the module boundary"));
    assert!(!user_requests[2].content.contains("Refactor the module boundary"));
    assert!(!user_requests[3].content.contains("Refactor the module boundary"));
}

#[tokio::test]
async fn s4_iteration_cap_exhausts_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    init_repo(&root).await;

    let store = Arc::new(MemoryStore::in_memory());
    let workspace = Arc::new(WorkspaceManager::new(".isolated"));
    let fanout = Arc::new(FanOut::default());
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new(chrono::Utc::now(), 10));
    let idgen: Arc<dyn IdGenerator> = Arc::new(CountingIdGenerator::default());
    let assistant = Arc::new(MockAssistant {
        turns: Mutex::new(VecDeque::from([
            ScriptedTurn { text: "Still working through it.".into(), output_tokens: 3, session_id: None },
            ScriptedTurn { text: "Still working through it.".into(), output_tokens: 3, session_id: None },
            ScriptedTurn { text: "Still working through it.".into(), output_tokens: 3, session_id: None },
        ])),
        ..Default::default()
    });

    let executor = Executor::new(
        store.clone() as Arc<dyn Store>,
        workspace,
        assistant,
        None,
        fanout,
        clock,
        idgen,
    );

    let task = executor
        .create(base_request("t4", &root, "Investigate the flaky test.", 2))
        .await
        .unwrap();
    executor.start(&task.id).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = store.get_task(&task.id).unwrap();
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let final_task = store.get_task(&task.id).unwrap();
    assert_eq!(final_task.status, TaskStatus::Exhausted);
    assert!(final_task.error_message.unwrap().contains("iteration cap"));
}

#[tokio::test]
async fn s5_workspace_collision_rejects_a_second_task_on_the_same_branch() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    init_repo(&root).await;

    let assistant = Arc::new(MockAssistant::default());
    let executor = build_executor(assistant, &root);

    let mut req_a = base_request("t5a", &root, "Do the thing.", 5);
    req_a.branch = Some("feat".to_string());
    let task_a = executor.create(req_a).await.unwrap();

    let mut req_b = base_request("t5b", &root, "Do the other thing.", 5);
    req_b.branch = Some("feat".to_string());
    let result_b = executor.create(req_b).await;

    assert!(matches!(result_b, Err(Error::BranchInUse(_))));
    assert_eq!(task_a.status, TaskStatus::Pending);
    assert_eq!(task_a.branch, "feat");
}

#[tokio::test]
async fn s6_recover_from_failed_drops_the_session_and_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap().to_string();
    init_repo(&root).await;

    let store = Arc::new(MemoryStore::in_memory());
    let workspace = Arc::new(WorkspaceManager::new(".isolated"));
    let fanout = Arc::new(FanOut::default());
    let clock: Arc<dyn Clock> = Arc::new(StepClock::new(chrono::Utc::now(), 10));
    let idgen: Arc<dyn IdGenerator> = Arc::new(CountingIdGenerator::default());
    let assistant = Arc::new(MockAssistant {
        turns: Mutex::new(VecDeque::from([ScriptedTurn {
            text: "Done, all tests pass.".into(),
            output_tokens: 7,
            session_id: None,
        }])),
        ..Default::default()
    });

    let executor = Executor::new(
        store.clone() as Arc<dyn Store>,
        workspace,
        assistant.clone(),
        None,
        fanout,
        clock,
        idgen,
    );

    let task = executor
        .create(base_request("t6", &root, "Patch the broken release script.", 5))
        .await
        .unwrap();

    store
        .mutate(
            &task.id,
            Box::new(|t| {
                t.status = TaskStatus::Failed;
                t.assistant_session_id = Some("stale-sid".to_string());
                t.error_message = Some("assistant: stream closed unexpectedly".to_string());
                Ok(())
            }),
        )
        .unwrap();
    store
        .append_interaction(Interaction {
            id: "prior-1".to_string(),
            task_id: task.id.clone(),
            kind: InteractionKind::UserRequest,
            content: "Patch the broken release script.".to_string(),
            timestamp: chrono::Utc::now(),
            usage: Usage::default(),
            duration_ms: None,
            attachments: vec![],
            tools: vec![],
        })
        .unwrap();

    executor.recover(&task.id, None, None).await.unwrap();

    let after_recover = store.get_task(&task.id).unwrap();
    assert_eq!(after_recover.status, TaskStatus::Running);
    assert!(after_recover.assistant_session_id.is_none());
    assert!(after_recover.error_message.is_none());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let current = store.get_task(&task.id).unwrap();
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resume_ids = assistant.resume_ids();
    assert_eq!(resume_ids[0], None, "recovery must issue a fresh, non-resumed call");

    let transcript = executor.fetch_transcript(&task.id);
    assert!(transcript.iter().any(|i| i.id == "prior-1"), "prior history survives a recover");
}
