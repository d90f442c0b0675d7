//! Assistant subprocess runner and streaming client, plus the pure
//! NDJSON-to-interaction mapping.

pub mod cancel;
pub mod client;
pub mod mapping;
pub mod process;
pub mod records;

pub use cancel::CancelToken;
pub use client::{AssistantClient, AssistantTurnResult, EventSink, StreamingAssistantClient};
pub use process::{AssistantProcess, SpawnRequest};
