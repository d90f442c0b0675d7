//! Subprocess runner (component D) — a thin wrapper around
//! `tokio::process::Command` exposing spawn/kill/wait for exactly one
//! assistant invocation. No named-session registry: this crate needs one
//! child per `send` call, never a table of background sessions.

use std::process::Stdio;

use engine_domain::config::AssistantConfig;
use engine_domain::{Error, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

/// Arguments for one invocation of the external assistant binary.
pub struct SpawnRequest {
    pub prompt: String,
    pub workdir: String,
    /// Set when resuming a session captured from a prior turn — every
    /// invocation after the first carries the resume id.
    pub resume_session_id: Option<String>,
}

/// A spawned assistant child process with its stdout reader and stdin
/// handle split out for the caller to drive independently.
#[derive(Debug)]
pub struct AssistantProcess {
    child: Child,
    pub stdout: BufReader<tokio::process::ChildStdout>,
}

impl AssistantProcess {
    pub fn spawn(config: &AssistantConfig, req: &SpawnRequest) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.arg("--output-format").arg("stream-json");
        cmd.arg("--print");
        if let Some(session_id) = &req.resume_session_id {
            cmd.arg("-r").arg(session_id);
        }
        cmd.current_dir(&req.workdir);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // New process group so `terminate` can signal any grandchild the
        // assistant binary spawns, not just the binary itself.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::SubprocessSpawnFailed(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Assistant("assistant child had no stdout".into()))?;

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
        })
    }

    /// Write the prompt to stdin and close it, signalling end of input —
    /// the assistant binary is invoked once per turn, never streamed to
    /// interactively.
    pub async fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        let mut stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| Error::Assistant("assistant child had no stdin".into()))?;
        stdin
            .write_all(prompt.as_bytes())
            .await
            .map_err(|e| Error::Assistant(format!("failed to write prompt: {e}")))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| Error::Assistant(format!("failed to close stdin: {e}")))?;
        Ok(())
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// SIGTERM to the whole process group on unix (the child was spawned
    /// into its own group in [`Self::spawn`], so this also reaches any
    /// grandchild the assistant binary itself spawned), best-effort
    /// `start_kill` elsewhere; the caller (E) is responsible for the
    /// drain-then-SIGKILL escalation.
    pub fn terminate(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: `kill(-pid, SIGTERM)` signals every process in the
                // group identified by `pid`. The pid comes from a live
                // child handle, so it names a real process group.
                unsafe {
                    libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
                }
                return Ok(());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|e| Error::Assistant(format!("failed to terminate assistant: {e}")))
        }
    }

    /// SIGKILL to the whole process group on unix, matching [`Self::terminate`]'s
    /// reach; `start_kill` elsewhere.
    pub fn kill(&mut self) -> Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: same rationale as `terminate`.
                unsafe {
                    libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
                }
                return Ok(());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.child
                .start_kill()
                .map_err(|e| Error::Assistant(format!("failed to kill assistant: {e}")))
        }
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| Error::Assistant(format!("failed waiting on assistant: {e}")))
    }
}
