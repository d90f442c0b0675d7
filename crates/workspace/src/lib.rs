//! Workspace isolation manager (component C).
//!
//! Provisions and reclaims per-task isolated checkouts of a
//! version-controlled repository so concurrent tasks on the same repo
//! never see each other's in-progress changes. Shells out to the `git`
//! binary via `tokio::process::Command` — the same subprocess idiom the
//! engine uses for the assistant (component D), so there is exactly one
//! subprocess-execution primitive in the codebase, reused for both roles.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::process::Command;

use engine_domain::model::{ProjectAccess, ProjectRef};
use engine_domain::trace::TraceEvent;
use engine_domain::{Error, Result};

#[derive(Debug, Clone)]
pub struct ProvisionResult {
    pub worktree_path: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct ProvisionedProject {
    pub name: String,
    /// The path the task should address this project by: the isolated
    /// worktree path for write access, the original path for read-only.
    pub effective_path: String,
    pub worktree_path: Option<String>,
}

pub struct WorkspaceManager {
    isolated_subdir: String,
    /// Roots currently held exclusively because the local `git` does not
    /// support multiple independent working trees (fallback mode).
    /// Tracked here because "no concurrent writable checkout per
    /// root" is a fact about this process's provisioning activity, not
    /// about git state.
    fallback_roots: Mutex<HashSet<String>>,
}

impl WorkspaceManager {
    pub fn new(isolated_subdir: impl Into<String>) -> Self {
        Self {
            isolated_subdir: isolated_subdir.into(),
            fallback_roots: Mutex::new(HashSet::new()),
        }
    }

    /// Provision an isolated working tree for `task_name` inside
    /// `root_path`, anchored to `branch` (or an auto-generated
    /// `task/<slug>` name), created from `base_branch` if it doesn't
    /// already exist.
    pub async fn provision(
        &self,
        task_name: &str,
        root_path: &str,
        base_branch: &str,
        branch: Option<&str>,
    ) -> Result<ProvisionResult> {
        let root = Path::new(root_path);
        let branch = branch
            .map(str::to_string)
            .unwrap_or_else(|| format!("task/{}", slugify(task_name)));

        if !self.worktrees_supported(root).await {
            return self.provision_fallback(root_path, &branch);
        }

        if self.branch_checked_out_elsewhere(root, &branch).await? {
            return Err(Error::BranchInUse(branch));
        }

        let worktree_path = root.join(&self.isolated_subdir).join(slugify(task_name));
        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::Io)?;
        }

        let branch_exists = self.run_git_ok(root, &["rev-parse", "--verify", &branch]).await;

        let args: Vec<String> = if branch_exists {
            vec![
                "worktree".into(),
                "add".into(),
                worktree_path.display().to_string(),
                branch.clone(),
            ]
        } else {
            vec![
                "worktree".into(),
                "add".into(),
                "-b".into(),
                branch.clone(),
                worktree_path.display().to_string(),
                base_branch.to_string(),
            ]
        };

        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        self.run_git_retrying(root, &arg_refs).await?;

        TraceEvent::WorkspaceProvisioned {
            task_id: task_name.to_string(),
            branch: branch.clone(),
            worktree_path: worktree_path.display().to_string(),
        }
        .emit();

        Ok(ProvisionResult {
            worktree_path: worktree_path.display().to_string(),
            branch,
        })
    }

    fn provision_fallback(&self, root_path: &str, branch: &str) -> Result<ProvisionResult> {
        let mut roots = self.fallback_roots.lock();
        if roots.contains(root_path) {
            return Err(Error::BranchInUse(format!(
                "{root_path} already has an active writable checkout (worktrees unsupported)"
            )));
        }
        roots.insert(root_path.to_string());
        Ok(ProvisionResult {
            worktree_path: root_path.to_string(),
            branch: branch.to_string(),
        })
    }

    /// Commit any pending changes on the task branch, then remove the
    /// working tree and delete the branch (unless it is the default
    /// branch). A failed commit leaves the workspace intact and returns
    /// `ReclaimBlocked`.
    pub async fn reclaim(
        &self,
        worktree_path: &str,
        branch: &str,
        base_branch: &str,
        root_path: &str,
    ) -> Result<bool> {
        if worktree_path == root_path {
            // Fallback mode: nothing to remove, just release the claim.
            let committed = self.commit_if_dirty(Path::new(worktree_path), "task checkpoint").await?;
            self.fallback_roots.lock().remove(root_path);
            TraceEvent::WorkspaceReclaimed {
                task_id: root_path.to_string(),
                committed,
            }
            .emit();
            return Ok(committed);
        }

        let committed = self
            .commit_if_dirty(Path::new(worktree_path), "task checkpoint")
            .await
            .map_err(|e| {
                TraceEvent::WorkspaceReclaimBlocked {
                    task_id: worktree_path.to_string(),
                    reason: e.to_string(),
                }
                .emit();
                e
            })?;

        self.run_git_retrying(
            Path::new(root_path),
            &["worktree", "remove", worktree_path, "--force"],
        )
        .await?;

        if branch != base_branch {
            // Task branches are disposable automation artifacts, not
            // meant to be reviewed for merge — force-delete regardless
            // of merge status.
            let _ = self
                .run_git_retrying(Path::new(root_path), &["branch", "-D", branch])
                .await;
        }

        TraceEvent::WorkspaceReclaimed {
            task_id: worktree_path.to_string(),
            committed,
        }
        .emit();

        Ok(committed)
    }

    /// Provision only the `write`-access projects; `read`-access projects
    /// are referenced in place.
    pub async fn multi_provision(
        &self,
        task_name: &str,
        projects: &[ProjectRef],
    ) -> Result<Vec<ProvisionedProject>> {
        let mut out = Vec::with_capacity(projects.len());
        for project in projects {
            match project.access {
                ProjectAccess::Read => out.push(ProvisionedProject {
                    name: project.name.clone(),
                    effective_path: project.path.clone(),
                    worktree_path: None,
                }),
                ProjectAccess::Write => {
                    let result = self
                        .provision(
                            &format!("{task_name}-{}", project.name),
                            &project.path,
                            "main",
                            None,
                        )
                        .await?;
                    out.push(ProvisionedProject {
                        name: project.name.clone(),
                        effective_path: result.worktree_path.clone(),
                        worktree_path: Some(result.worktree_path),
                    });
                }
            }
        }
        Ok(out)
    }

    // ── git plumbing ───────────────────────────────────────────────

    async fn worktrees_supported(&self, repo_dir: &Path) -> bool {
        self.run_git_ok(repo_dir, &["worktree", "list"]).await
    }

    async fn branch_checked_out_elsewhere(&self, repo_dir: &Path, branch: &str) -> Result<bool> {
        let output = self
            .run_git_retrying(repo_dir, &["worktree", "list", "--porcelain"])
            .await?;
        let marker = format!("refs/heads/{branch}");
        Ok(output.lines().any(|line| line.trim_end() == format!("branch {marker}")))
    }

    async fn commit_if_dirty(&self, dir: &Path, message: &str) -> Result<bool> {
        let status = self
            .run_git_retrying(dir, &["status", "--porcelain"])
            .await?;
        if status.trim().is_empty() {
            return Ok(false);
        }

        self.run_git_retrying(dir, &["add", "-A"]).await?;
        let commit = self.run_git(dir, &["commit", "-m", message]).await;
        match commit {
            Ok(out) if out.status.success() => Ok(true),
            Ok(out) => Err(Error::ReclaimBlocked(String::from_utf8_lossy(&out.stderr).into_owned())),
            Err(e) => Err(Error::ReclaimBlocked(e.to_string())),
        }
    }

    async fn run_git(&self, dir: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
        Command::new("git").current_dir(dir).args(args).output().await
    }

    /// Run a git command, retrying once on a spawn/IO error. A non-zero
    /// git exit remains a real failure and is
    /// not retried.
    async fn run_git_retrying(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..2 {
            match self.run_git(dir, args).await {
                Ok(out) if out.status.success() => {
                    return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
                }
                Ok(out) => {
                    return Err(Error::Other(format!(
                        "git {:?} failed: {}",
                        args,
                        String::from_utf8_lossy(&out.stderr)
                    )));
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt == 0 {
                        tracing::warn!(?args, "git spawn failed, retrying once");
                    }
                }
            }
        }
        Err(Error::Io(last_err.expect("loop always sets err on failure path")))
    }

    async fn run_git_ok(&self, dir: &Path, args: &[&str]) -> bool {
        matches!(self.run_git(dir, args).await, Ok(out) if out.status.success())
    }
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
