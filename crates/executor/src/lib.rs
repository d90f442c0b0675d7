//! Task executor (component J) — the per-task main loop, its state
//! machine, initial prompt construction, and the live-loop registry.

pub mod executor;
pub mod handles;
pub mod prompt;
pub mod state_machine;

pub use executor::{CreateTaskRequest, Executor};
