//! The NDJSON wire contract emitted by the external assistant process.
//! Unknown fields and unknown `type` values are tolerated —
//! the core is forward-compatible with assistant versions it doesn't
//! fully understand yet.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_result: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl From<RawUsage> for engine_domain::model::Usage {
    fn from(raw: RawUsage) -> Self {
        engine_domain::model::Usage {
            input_tokens: raw.input_tokens,
            output_tokens: raw.output_tokens,
            cache_creation_tokens: raw.cache_creation_input_tokens,
            cache_read_tokens: raw.cache_read_input_tokens,
            cost: 0.0,
        }
    }
}

/// Parse one NDJSON line. Malformed lines are the caller's problem to
/// decide how to handle (skip with a warning) — this function only
/// distinguishes "valid JSON, recognizable shape" from "not".
pub fn parse_line(line: &str) -> Result<AssistantRecord, serde_json::Error> {
    serde_json::from_str(line)
}
