//! Persistence gateway (component B).
//!
//! Exposes CRUD for [`Task`](engine_domain::model::Task) and
//! [`Interaction`](engine_domain::model::Interaction) plus the atomic
//! `mutate` sub-transaction primitive that is the single invariant
//! enforcement point for the `user_input_pending` summary field. All
//! JSON-valued columns move through `mutate`; there is no
//! partial-field patch API.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{MutateFn, Store};
