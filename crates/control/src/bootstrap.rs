//! Wires the concrete collaborators (store, workspace manager, streaming
//! assistant client, criteria analyzer, fan-out, clock, id generator)
//! into an [`Executor`] and the [`AppState`] handlers share. Mirrors the
//! teacher's `main.rs::run_server` construction order, minus the
//! subsystems this crate's scope excludes (memory, sessions, skills,
//! providers, MCP, nodes).

use std::path::Path;
use std::sync::Arc;

use engine_assistant::StreamingAssistantClient;
use engine_criteria::{AssistantBackedAnalyzer, CriteriaAnalyzer};
use engine_domain::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use engine_domain::config::Config;
use engine_executor::Executor;
use engine_fanout::FanOut;
use engine_store::{MemoryStore, Store};
use engine_workspace::WorkspaceManager;

use crate::state::AppState;

pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let journal_path = Path::new(&config.store.journal_path);
    let store: Arc<dyn Store> = if let Some(parent) = journal_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
        Arc::new(MemoryStore::open(journal_path)?)
    } else {
        Arc::new(MemoryStore::open(journal_path)?)
    };

    let workspace = Arc::new(WorkspaceManager::new(config.workspace.isolated_subdir.clone()));
    let fanout = Arc::new(FanOut::new(config.fanout.subscriber_buffer));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let idgen: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);

    let assistant = Arc::new(StreamingAssistantClient::new(config.assistant.clone()));
    let criteria: Arc<dyn CriteriaAnalyzer> = Arc::new(AssistantBackedAnalyzer::new(
        assistant.clone(),
        config.workspace.default_root.clone(),
        clock.clone(),
        idgen.clone(),
    ));

    let executor = Executor::new(
        store.clone(),
        workspace,
        assistant,
        Some(criteria),
        fanout,
        clock,
        idgen,
    );

    Ok(AppState {
        executor,
        store,
        config,
    })
}
