//! Criteria analyzer (component H) — two meta-invocations of the same
//! assistant client used to run tasks: *extract* a success criterion
//! from a free-text description, and *judge* whether a transcript meets
//! one. Exposed as a trait so a rule-based stub can stand in during
//! tests without spawning a subprocess.

pub mod json_scan;

use std::sync::Arc;

use engine_assistant::{AssistantClient, CancelToken, SpawnRequest};
use engine_domain::clock::{Clock, IdGenerator};
use engine_domain::model::Interaction;
use engine_domain::Result;
use serde::Deserialize;

use json_scan::extract_json_object;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractResult {
    pub criteria: Option<String>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JudgeResult {
    pub is_complete: bool,
    pub confidence: f64,
    pub reasoning: String,
}

impl JudgeResult {
    /// Only `is_complete ∧ confidence ≥ 0.7` counts as completion;
    /// everything else is "not yet."
    pub fn counts_as_complete(&self) -> bool {
        self.is_complete && self.confidence >= 0.7
    }
}

#[async_trait::async_trait]
pub trait CriteriaAnalyzer: Send + Sync {
    async fn extract(&self, description: &str) -> Result<ExtractResult>;

    async fn judge(
        &self,
        criteria: &str,
        transcript_tail: &[Interaction],
        latest_assistant_text: &str,
    ) -> Result<JudgeResult>;
}

#[derive(Deserialize)]
struct ExtractWire {
    #[serde(default)]
    criteria: Option<String>,
    #[serde(default)]
    warning: Option<String>,
}

#[derive(Deserialize)]
struct JudgeWire {
    is_complete: bool,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// The assistant-backed implementation: each call is a fresh,
/// non-resuming invocation of the same binary the task executor drives,
/// so H never touches the task's own `assistant_session_id`. Holds its
/// collaborators by `Arc` rather than borrowing them, so it can be
/// shared behind `Arc<dyn CriteriaAnalyzer>` across the executor's
/// per-task loop tasks.
pub struct AssistantBackedAnalyzer {
    client: Arc<dyn AssistantClient>,
    workdir: String,
    clock: Arc<dyn Clock>,
    idgen: Arc<dyn IdGenerator>,
}

impl AssistantBackedAnalyzer {
    pub fn new(
        client: Arc<dyn AssistantClient>,
        workdir: String,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            client,
            workdir,
            clock,
            idgen,
        }
    }

    async fn send(&self, prompt: String) -> Result<String> {
        let req = SpawnRequest {
            prompt,
            workdir: self.workdir.clone(),
            resume_session_id: None,
        };
        let cancel = CancelToken::new();
        let mut sink: Box<dyn FnMut(&Interaction) + Send> = Box::new(|_: &Interaction| {});
        let result = self
            .client
            .send("criteria-meta", req, &cancel, self.clock.as_ref(), self.idgen.as_ref(), &mut *sink)
            .await?;
        Ok(result.full_text)
    }
}

#[async_trait::async_trait]
impl CriteriaAnalyzer for AssistantBackedAnalyzer {
    async fn extract(&self, description: &str) -> Result<ExtractResult> {
        let prompt = format!(
            "Restate the success condition of the following task in one \
             sentence. Reply with a single JSON object of the shape \
             {{\"criteria\": string}} if the task has a measurable \
             completion condition, or {{\"warning\": string}} if it does \
             not. Task description:\n\n{description}"
        );
        let text = self.send(prompt).await?;
        let wire: ExtractWire = extract_json_object(&text).unwrap_or(ExtractWire {
            criteria: None,
            warning: Some("could not determine a measurable completion condition".to_string()),
        });
        Ok(ExtractResult {
            criteria: wire.criteria,
            warning: wire.warning,
        })
    }

    async fn judge(
        &self,
        criteria: &str,
        transcript_tail: &[Interaction],
        latest_assistant_text: &str,
    ) -> Result<JudgeResult> {
        let tail = transcript_tail
            .iter()
            .map(|i| format!("- [{:?}] {}", i.kind, i.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Success criteria: {criteria}\n\nRecent transcript:\n{tail}\n\n\
             Latest assistant message:\n{latest_assistant_text}\n\n\
             Reply with a single JSON object of the shape \
             {{\"is_complete\": bool, \"confidence\": number between 0 and 1, \
             \"reasoning\": string}} judging whether the criteria are met."
        );
        let text = self.send(prompt).await?;
        let wire: JudgeWire = extract_json_object(&text).unwrap_or(JudgeWire {
            is_complete: false,
            confidence: 0.0,
            reasoning: "no parseable verdict returned".to_string(),
        });
        Ok(JudgeResult {
            is_complete: wire.is_complete,
            confidence: wire.confidence,
            reasoning: wire.reasoning,
        })
    }
}
