use engine_domain::model::{Interaction, Task};
use engine_domain::Result;

/// Boxed mutation closure passed to [`Store::mutate`]. Owned rather than
/// borrowed so it can cross an internal retry boundary if a backing store
/// needs one.
pub type MutateFn<'a> = Box<dyn FnOnce(&mut Task) -> Result<()> + Send + 'a>;

/// The persistence gateway contract (component B).
///
/// Implementations must guarantee that `mutate` is the *only* way JSON-typed
/// task columns (`user_input_queue`, `criteria_config`, `projects`) are
/// written — never a partial-field patch — so `user_input_pending` can never
/// be observed out of sync with the queue it summarizes.
pub trait Store: Send + Sync {
    fn create_task(&self, task: Task) -> Result<()>;

    fn get_task(&self, task_id: &str) -> Result<Task>;

    fn get_task_by_name(&self, name: &str) -> Result<Task>;

    fn list_tasks(&self) -> Vec<Task>;

    /// Tasks currently active on the given `(root_path, branch)` pair —
    /// the invariant `list_active_on(root, branch).len() <= 1` must hold
    /// at every observable instant.
    fn list_active_on(&self, root_path: &str, branch: &str) -> Vec<Task>;

    /// Read-modify-write a single task row. Returns the task as it stood
    /// after `f` ran. Implementations may return `Error::Conflict` if the
    /// row was concurrently modified; callers retry up to
    /// `StoreConfig::max_mutate_retries` times.
    fn mutate(&self, task_id: &str, f: MutateFn<'_>) -> Result<Task>;

    fn delete_task(&self, task_id: &str) -> Result<()>;

    /// Write-only append; never conflicts with a concurrent `mutate` on
    /// the same task. Returns the stored interaction id.
    fn append_interaction(&self, interaction: Interaction) -> Result<String>;

    fn list_interactions(&self, task_id: &str) -> Vec<Interaction>;

    fn delete_interactions(&self, task_id: &str) -> Result<()>;

    /// Additive counter bump — commutative, so it never conflicts with a
    /// concurrent `mutate`.
    fn increment_tokens(&self, task_id: &str, delta: u64) -> Result<u64>;

    /// Persist the current in-memory state to the durable journal/snapshot.
    fn flush(&self) -> Result<()>;
}
