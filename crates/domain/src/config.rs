//! Top-level configuration tree, loaded from `ENGINE_CONFIG` (default
//! `config.toml`) with environment-variable overrides for the handful of
//! values callers commonly need to set without a config file on disk.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assistant subprocess
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "d_assistant_command")]
    pub command: String,
    #[serde(default = "d_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "d_drain_secs")]
    pub cancel_drain_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: d_assistant_command(),
            max_line_bytes: d_max_line_bytes(),
            idle_timeout_secs: d_idle_timeout_secs(),
            cancel_drain_secs: d_drain_secs(),
        }
    }
}

fn d_assistant_command() -> String {
    std::env::var("ASSISTANT_COMMAND").unwrap_or_else(|_| "assistant".to_string())
}
fn d_max_line_bytes() -> usize {
    256 * 1024
}
fn d_idle_timeout_secs() -> u64 {
    300
}
fn d_drain_secs() -> u64 {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace isolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_default_root")]
    pub default_root: String,
    #[serde(default = "d_isolated_subdir")]
    pub isolated_subdir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            default_root: d_default_root(),
            isolated_subdir: d_isolated_subdir(),
        }
    }
}

fn d_default_root() -> String {
    std::env::var("DEFAULT_WORKSPACE_ROOT").unwrap_or_else(|_| ".".to_string())
}
fn d_isolated_subdir() -> String {
    std::env::var("ISOLATED_SUBDIR").unwrap_or_else(|_| ".isolated".to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Journal file location. `DATABASE_URL` is passed through verbatim
    /// and used as a filesystem path when set; it is never parsed as a
    /// connection string.
    #[serde(default = "d_journal_path")]
    pub journal_path: String,
    #[serde(default = "d_max_retries")]
    pub max_mutate_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_path: d_journal_path(),
            max_mutate_retries: d_max_retries(),
        }
    }
}

fn d_journal_path() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "engine-state/journal.jsonl".to_string())
}
fn d_max_retries() -> u32 {
    3
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event fan-out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default = "d_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: d_subscriber_buffer(),
        }
    }
}

fn d_subscriber_buffer() -> usize {
    64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control surface server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: d_bind_addr(),
        }
    }
}

fn d_bind_addr() -> String {
    "127.0.0.1:8088".to_string()
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.assistant.command.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "assistant.command".into(),
                message: "must not be empty".into(),
            });
        }
        if self.assistant.max_line_bytes == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "assistant.max_line_bytes".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.assistant.idle_timeout_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "assistant.idle_timeout_secs".into(),
                message: "0 disables the idle timeout entirely".into(),
            });
        }

        if self.workspace.default_root.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "workspace.default_root".into(),
                message: "must not be empty".into(),
            });
        }
        if self.workspace.isolated_subdir.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "workspace.isolated_subdir".into(),
                message: "must not be empty".into(),
            });
        }

        if self.store.journal_path.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "store.journal_path".into(),
                message: "must not be empty".into(),
            });
        }

        if self.fanout.subscriber_buffer == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "fanout.subscriber_buffer".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.bind_addr".into(),
                message: format!("\"{}\" is not a valid host:port", self.server.bind_addr),
            });
        }

        issues
    }
}
