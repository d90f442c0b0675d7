//! Streaming assistant client (component E) — spawns one assistant
//! subprocess per turn, decodes its NDJSON stdout, maps each record
//! through [`crate::mapping::RecordMapper`], and invokes `on_event`
//! synchronously as interactions are produced — a direct callback since
//! the caller already owns the async context the callback runs in.

use std::time::Duration;

use engine_domain::clock::{Clock, IdGenerator};
use engine_domain::config::AssistantConfig;
use engine_domain::model::{Interaction, Usage};
use engine_domain::{Error, Result};
use tokio::io::AsyncBufReadExt;

use crate::cancel::CancelToken;
use crate::mapping::RecordMapper;
use crate::process::{AssistantProcess, SpawnRequest};
use crate::records::parse_line;

/// What a completed turn leaves behind for the caller.
#[derive(Debug)]
pub struct AssistantTurnResult {
    pub full_text: String,
    pub subprocess_id: Option<String>,
    pub session_id: Option<String>,
    pub usage: Usage,
}

/// A callback invoked once per interaction as it is produced, in stream
/// order. Boxed so callers don't need a generic parameter threaded
/// through the executor.
pub type EventSink<'a> = dyn FnMut(&Interaction) + Send + 'a;

#[async_trait::async_trait]
pub trait AssistantClient: Send + Sync {
    async fn send(
        &self,
        task_id: &str,
        req: SpawnRequest,
        cancel: &CancelToken,
        clock: &dyn Clock,
        idgen: &dyn IdGenerator,
        on_event: &mut EventSink<'_>,
    ) -> Result<AssistantTurnResult>;
}

pub struct StreamingAssistantClient {
    config: AssistantConfig,
}

impl StreamingAssistantClient {
    pub fn new(config: AssistantConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl AssistantClient for StreamingAssistantClient {
    async fn send(
        &self,
        task_id: &str,
        req: SpawnRequest,
        cancel: &CancelToken,
        clock: &dyn Clock,
        idgen: &dyn IdGenerator,
        on_event: &mut EventSink<'_>,
    ) -> Result<AssistantTurnResult> {
        let mut process = AssistantProcess::spawn(&self.config, &req)?;
        let subprocess_id = process.id().map(|id| id.to_string());
        process.send_prompt(&req.prompt).await?;

        let mut mapper = RecordMapper::new();
        let idle = Duration::from_secs(self.config.idle_timeout_secs);
        let mut line_buf = String::new();

        loop {
            if cancel.is_cancelled() {
                terminate_then_kill(&mut process, self.config.cancel_drain_secs).await;
                return Err(Error::Assistant("cancelled by caller".into()));
            }

            line_buf.clear();
            let read = tokio::time::timeout(idle, process.stdout.read_line(&mut line_buf)).await;
            let bytes_read = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(Error::Assistant(format!("stdout read error: {e}"))),
                Err(_) => {
                    terminate_then_kill(&mut process, self.config.cancel_drain_secs).await;
                    return Err(Error::AssistantTimeout);
                }
            };
            if bytes_read == 0 {
                break; // EOF: assistant exited.
            }

            let line = line_buf.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }
            if line.len() > self.config.max_line_bytes {
                tracing::warn!(task_id, bytes = line.len(), "assistant line exceeds cap, skipping");
                continue;
            }

            let record = match parse_line(line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(task_id, error = %e, "unparseable assistant record, skipping");
                    continue;
                }
            };

            for interaction in mapper.feed(task_id, record, clock, idgen) {
                on_event(&interaction);
            }
        }

        for interaction in mapper.finish(task_id, clock, idgen) {
            on_event(&interaction);
        }

        process.wait().await?;

        Ok(AssistantTurnResult {
            full_text: mapper.full_text().to_string(),
            subprocess_id,
            session_id: mapper.session_id().map(|s| s.to_string()),
            usage: mapper.final_usage().clone(),
        })
    }
}

/// SIGTERM, drain for `drain_secs`, then SIGKILL if still alive, checking
/// a shared [`CancelToken`] rather than a dedicated kill channel.
async fn terminate_then_kill(process: &mut AssistantProcess, drain_secs: u64) {
    let _ = process.terminate();
    let drained = tokio::time::timeout(Duration::from_secs(drain_secs), process.wait()).await;
    if drained.is_err() {
        let _ = process.kill();
        let _ = process.wait().await;
    }
}
