//! Event mapping & tool grouping — a pure function over the
//! ordered NDJSON record stream. Emits incrementally: each call to
//! [`RecordMapper::feed`] may return zero or more [`Interaction`]s for
//! the record just read, so subscribers can see partial progress before
//! the turn ends (either incremental or end-of-turn emission is fine
//! as long as the final transcript is identical).

use engine_domain::clock::{Clock, IdGenerator};
use engine_domain::model::{Interaction, InteractionKind, ToolInvocation, Usage};

use crate::records::AssistantRecord;

#[derive(Default)]
pub struct RecordMapper {
    pending_tools: Vec<ToolInvocation>,
    full_text: String,
    session_id: Option<String>,
    final_usage: Usage,
}

impl RecordMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn final_usage(&self) -> &Usage {
        &self.final_usage
    }

    /// Feed one parsed record, returning the interactions it (or a
    /// contiguous tool run it closed out) produced.
    pub fn feed(
        &mut self,
        task_id: &str,
        record: AssistantRecord,
        clock: &dyn Clock,
        idgen: &dyn IdGenerator,
    ) -> Vec<Interaction> {
        match record.kind.as_str() {
            "system" if record.subtype.as_deref() == Some("init") => {
                // Extracted once; never overwritten by a later record —
                // the "exactly once" half of the invariant is enforced
                // by the caller (E), which only calls feed on the first
                // record of a fresh, non-resumed invocation.
                if self.session_id.is_none() {
                    self.session_id = record.session_id;
                }
                Vec::new()
            }
            "assistant" => {
                let mut out = self.flush_tools(task_id, clock, idgen);
                if let Some(text) = record.text {
                    let usage: Usage = record.usage.clone().map(Into::into).unwrap_or_default();
                    self.final_usage.add(&usage);
                    self.full_text.push_str(&text);
                    out.push(Interaction {
                        id: idgen.new_id(),
                        task_id: task_id.to_string(),
                        kind: InteractionKind::AssistantResponse,
                        content: text,
                        timestamp: clock.now(),
                        usage,
                        duration_ms: record.duration_ms,
                        attachments: vec![],
                        tools: vec![],
                    });
                }
                out
            }
            "user" => {
                // Tool-result echo — already covered by `tool_result`
                // records; drop, but a non-tool record still breaks a
                // contiguous tool run.
                self.flush_tools(task_id, clock, idgen)
            }
            "tool_use" => {
                self.pending_tools.push(ToolInvocation {
                    call_id: record.tool_use_id.unwrap_or_default(),
                    tool_name: record.tool_name.unwrap_or_default(),
                    input: record.tool_input.unwrap_or(serde_json::Value::Null),
                    result: None,
                    is_error: false,
                });
                Vec::new()
            }
            "tool_result" => {
                let call_id = record.tool_use_id.clone().unwrap_or_default();
                let matched = self
                    .pending_tools
                    .iter_mut()
                    .find(|t| t.call_id == call_id && t.result.is_none());

                if let Some(slot) = matched {
                    slot.result = record.tool_result;
                    slot.is_error = record.is_error.unwrap_or(false);
                    Vec::new()
                } else {
                    // No matching tool_use — a standalone result.
                    // Flush any already-open group first so
                    // ordering stays correct, then emit it directly.
                    let mut out = self.flush_tools(task_id, clock, idgen);
                    out.push(Interaction {
                        id: idgen.new_id(),
                        task_id: task_id.to_string(),
                        kind: InteractionKind::ToolResult,
                        content: record.tool_result.clone().unwrap_or_default(),
                        timestamp: clock.now(),
                        usage: Usage::default(),
                        duration_ms: None,
                        attachments: vec![],
                        tools: vec![ToolInvocation {
                            call_id,
                            tool_name: record.tool_name.unwrap_or_default(),
                            input: record.tool_input.unwrap_or(serde_json::Value::Null),
                            result: record.tool_result,
                            is_error: record.is_error.unwrap_or(false),
                        }],
                    });
                    out
                }
            }
            "result" => {
                // Final tally — not persisted as an Interaction; folded
                // into the usage the caller returns from `send`.
                if let Some(usage) = record.usage {
                    self.final_usage.add(&usage.into());
                }
                if let Some(cost) = record.cost {
                    self.final_usage.cost += cost;
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Flush any pending contiguous tool run as a single `TOOL_GROUP`
    /// interaction. Called when a non-tool record breaks the run, and
    /// again at end-of-stream via [`RecordMapper::finish`].
    pub fn flush_tools(
        &mut self,
        task_id: &str,
        clock: &dyn Clock,
        idgen: &dyn IdGenerator,
    ) -> Vec<Interaction> {
        if self.pending_tools.is_empty() {
            return Vec::new();
        }
        let tools = std::mem::take(&mut self.pending_tools);
        let content = tools
            .iter()
            .map(|t| t.tool_name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        vec![Interaction {
            id: idgen.new_id(),
            task_id: task_id.to_string(),
            kind: InteractionKind::ToolGroup,
            content,
            timestamp: clock.now(),
            usage: Usage::default(),
            duration_ms: None,
            attachments: vec![],
            tools,
        }]
    }

    pub fn finish(&mut self, task_id: &str, clock: &dyn Clock, idgen: &dyn IdGenerator) -> Vec<Interaction> {
        self.flush_tools(task_id, clock, idgen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_domain::clock::testing::{CountingIdGenerator, StepClock};
    use crate::records::parse_line;

    fn harness() -> (StepClock, CountingIdGenerator) {
        (StepClock::new(chrono::Utc::now(), 10), CountingIdGenerator::default())
    }

    #[test]
    fn system_init_extracts_session_id_and_emits_nothing() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();
        let record = parse_line(r#"{"type":"system","subtype":"init","session_id":"sid-1"}"#).unwrap();
        let out = mapper.feed("t1", record, &clock, &idgen);
        assert!(out.is_empty());
        assert_eq!(mapper.session_id(), Some("sid-1"));
    }

    #[test]
    fn session_id_is_never_overwritten() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();
        mapper.feed(
            "t1",
            parse_line(r#"{"type":"system","subtype":"init","session_id":"first"}"#).unwrap(),
            &clock,
            &idgen,
        );
        mapper.feed(
            "t1",
            parse_line(r#"{"type":"system","subtype":"init","session_id":"second"}"#).unwrap(),
            &clock,
            &idgen,
        );
        assert_eq!(mapper.session_id(), Some("first"));
    }

    #[test]
    fn assistant_text_becomes_assistant_response() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();
        let record = parse_line(
            r#"{"type":"assistant","text":"Done.","usage":{"output_tokens":40}}"#,
        )
        .unwrap();
        let out = mapper.feed("t1", record, &clock, &idgen);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, InteractionKind::AssistantResponse);
        assert_eq!(out[0].usage.output_tokens, 40);
        assert_eq!(mapper.full_text(), "Done.");
    }

    #[test]
    fn contiguous_tool_use_and_result_become_one_tool_group() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();

        let mut emitted = Vec::new();
        emitted.extend(mapper.feed(
            "t1",
            parse_line(r#"{"type":"tool_use","tool_use_id":"c1","tool_name":"bash","tool_input":{}}"#).unwrap(),
            &clock,
            &idgen,
        ));
        emitted.extend(mapper.feed(
            "t1",
            parse_line(r#"{"type":"tool_use","tool_use_id":"c2","tool_name":"write","tool_input":{}}"#).unwrap(),
            &clock,
            &idgen,
        ));
        emitted.extend(mapper.feed(
            "t1",
            parse_line(r#"{"type":"tool_result","tool_use_id":"c1","tool_result":"ok"}"#).unwrap(),
            &clock,
            &idgen,
        ));
        emitted.extend(mapper.feed(
            "t1",
            parse_line(r#"{"type":"tool_result","tool_use_id":"c2","tool_result":"ok2"}"#).unwrap(),
            &clock,
            &idgen,
        ));
        assert!(emitted.is_empty(), "tool events stay pending until flushed");

        emitted.extend(mapper.feed(
            "t1",
            parse_line(r#"{"type":"assistant","text":"done"}"#).unwrap(),
            &clock,
            &idgen,
        ));

        // First emitted interaction is the flushed tool group, second is
        // the assistant text.
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].kind, InteractionKind::ToolGroup);
        assert_eq!(emitted[0].tools.len(), 2);
        assert_eq!(emitted[0].tools[0].result.as_deref(), Some("ok"));
        assert_eq!(emitted[1].kind, InteractionKind::AssistantResponse);
    }

    #[test]
    fn standalone_tool_result_with_no_matching_tool_use_becomes_tool_result() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();
        let out = mapper.feed(
            "t1",
            parse_line(r#"{"type":"tool_result","tool_use_id":"orphan","tool_result":"stray"}"#).unwrap(),
            &clock,
            &idgen,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, InteractionKind::ToolResult);
        assert_eq!(out[0].content, "stray");
    }

    #[test]
    fn result_record_folds_into_final_usage_without_emitting() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();
        let out = mapper.feed(
            "t1",
            parse_line(r#"{"type":"result","usage":{"output_tokens":5},"cost":0.01}"#).unwrap(),
            &clock,
            &idgen,
        );
        assert!(out.is_empty());
        assert_eq!(mapper.final_usage().output_tokens, 5);
        assert!((mapper.final_usage().cost - 0.01).abs() < 1e-9);
    }

    #[test]
    fn unfinished_tool_group_flushes_on_finish() {
        let (clock, idgen) = harness();
        let mut mapper = RecordMapper::new();
        mapper.feed(
            "t1",
            parse_line(r#"{"type":"tool_use","tool_use_id":"c1","tool_name":"bash"}"#).unwrap(),
            &clock,
            &idgen,
        );
        let out = mapper.finish("t1", &clock, &idgen);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, InteractionKind::ToolGroup);
    }
}
