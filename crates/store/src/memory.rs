//! In-process persistence gateway, journaled to an append-only JSONL file
//! and compacted to a snapshot on [`MemoryStore::flush`] — the only
//! persistence this crate owns. Adapted from a load-or-create +
//! full-file-flush pattern, generalized from a single flat map to two maps
//! (tasks, interactions) plus a per-mutation append log for crash
//! forensics.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use engine_domain::model::{Interaction, Task};
use engine_domain::{Error, Result};

use crate::traits::{MutateFn, Store};

#[derive(Serialize, Deserialize)]
#[serde(tag = "op")]
enum JournalEntry {
    TaskUpsert { task: Task },
    TaskDelete { task_id: String },
    InteractionAppend { interaction: Interaction },
}

struct Inner {
    tasks: HashMap<String, Task>,
    names: HashMap<String, String>, // name -> task_id
    interactions: HashMap<String, Vec<Interaction>>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    journal_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Construct a purely in-memory store with no durable journal —
    /// used by tests.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tasks: HashMap::new(),
                names: HashMap::new(),
                interactions: HashMap::new(),
            }),
            journal_path: None,
        }
    }

    /// Load (or create) a journaled store rooted at `journal_path`.
    /// Replays any existing journal entries to rebuild state.
    pub fn open(journal_path: &Path) -> Result<Self> {
        if let Some(parent) = journal_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut tasks = HashMap::new();
        let mut names = HashMap::new();
        let mut interactions: HashMap<String, Vec<Interaction>> = HashMap::new();

        if journal_path.exists() {
            let raw = std::fs::read_to_string(journal_path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: JournalEntry = match serde_json::from_str(line) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unparseable journal line");
                        continue;
                    }
                };
                match entry {
                    JournalEntry::TaskUpsert { task } => {
                        names.insert(task.name.clone(), task.id.clone());
                        tasks.insert(task.id.clone(), task);
                    }
                    JournalEntry::TaskDelete { task_id } => {
                        if let Some(task) = tasks.remove(&task_id) {
                            names.remove(&task.name);
                        }
                        interactions.remove(&task_id);
                    }
                    JournalEntry::InteractionAppend { interaction } => {
                        interactions
                            .entry(interaction.task_id.clone())
                            .or_default()
                            .push(interaction);
                    }
                }
            }
        }

        tracing::info!(
            tasks = tasks.len(),
            path = %journal_path.display(),
            "store journal replayed"
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                tasks,
                names,
                interactions,
            }),
            journal_path: Some(journal_path.to_path_buf()),
        })
    }

    fn append_journal(&self, entry: &JournalEntry) -> Result<()> {
        let Some(path) = &self.journal_path else {
            return Ok(());
        };
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl Store for MemoryStore {
    fn create_task(&self, task: Task) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(&task.name) {
            return Err(Error::Validation(format!(
                "task name already exists: {}",
                task.name
            )));
        }
        self.append_journal(&JournalEntry::TaskUpsert { task: task.clone() })?;
        inner.names.insert(task.name.clone(), task.id.clone());
        inner.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> Result<Task> {
        self.inner
            .read()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(task_id.to_string()))
    }

    fn get_task_by_name(&self, name: &str) -> Result<Task> {
        let inner = self.inner.read();
        let id = inner
            .names
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        inner
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn list_tasks(&self) -> Vec<Task> {
        self.inner.read().tasks.values().cloned().collect()
    }

    fn list_active_on(&self, root_path: &str, branch: &str) -> Vec<Task> {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|t| t.status.is_active() && t.root_path == root_path && t.branch == branch)
            .cloned()
            .collect()
    }

    fn mutate(&self, task_id: &str, f: MutateFn<'_>) -> Result<Task> {
        // Held for the whole read-modify-write: this in-process store can
        // never observe a concurrent writer racing the same row, so
        // `Conflict` is not produced here. A networked backing store would
        // use a compare-and-swap on `Task::version` instead; callers are
        // written against that contract regardless.
        let mut inner = self.inner.write();
        let mut task = inner
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(task_id.to_string()))?;

        f(&mut task)?;
        task.recompute_pending();
        task.version += 1;
        task.updated_at = Utc::now();

        self.append_journal(&JournalEntry::TaskUpsert { task: task.clone() })?;
        inner.tasks.insert(task_id.to_string(), task.clone());
        Ok(task)
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .remove(task_id)
            .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
        inner.names.remove(&task.name);
        inner.interactions.remove(task_id);
        self.append_journal(&JournalEntry::TaskDelete {
            task_id: task_id.to_string(),
        })?;
        Ok(())
    }

    fn append_interaction(&self, interaction: Interaction) -> Result<String> {
        // Write-only: `interaction_count` lives on the task row and is
        // bumped by the executor via `mutate`, so this never conflicts
        // with a concurrent task mutation.
        let mut inner = self.inner.write();
        let id = interaction.id.clone();
        self.append_journal(&JournalEntry::InteractionAppend {
            interaction: interaction.clone(),
        })?;
        inner
            .interactions
            .entry(interaction.task_id.clone())
            .or_default()
            .push(interaction);
        Ok(id)
    }

    fn list_interactions(&self, task_id: &str) -> Vec<Interaction> {
        self.inner
            .read()
            .interactions
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    fn delete_interactions(&self, task_id: &str) -> Result<()> {
        self.inner.write().interactions.remove(task_id);
        Ok(())
    }

    fn increment_tokens(&self, task_id: &str, delta: u64) -> Result<u64> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::NotFound(task_id.to_string()))?;
        task.total_tokens_used += delta;
        let total = task.total_tokens_used;
        let snapshot = task.clone();
        drop(inner);
        self.append_journal(&JournalEntry::TaskUpsert { task: snapshot })?;
        Ok(total)
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.journal_path else {
            return Ok(());
        };
        let inner = self.inner.read();
        let snapshot_path = path.with_extension("snapshot.json");
        let tasks: Vec<&Task> = inner.tasks.values().collect();
        let json = serde_json::to_string_pretty(&tasks)?;
        std::fs::write(&snapshot_path, json)?;
        // Truncate the journal now that a full snapshot covers history.
        std::fs::write(path, "")?;
        Ok(())
    }
}
