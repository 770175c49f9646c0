//! Repository workspaces: host-side clones and container-side git state.
//!
//! Each instance gets up to two independent host clones — the "pre"
//! workspace (base commit + test patch) and a fresh "post" workspace for the
//! solution run — so build side effects from one phase can never contaminate
//! the other. Workspaces live under a run-scoped directory beneath the
//! system temp dir and are removed unconditionally at instance completion.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GitConfig;
use crate::container::{ContainerHandle, ContainerManager};
use crate::errors::{CloneError, ContainerError};
use crate::proc::{self, WaitOutcome};

/// A directory tree holding a checked-out repository state.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
}

pub struct RepositoryManager {
    config: GitConfig,
    work_root: PathBuf,
}

impl RepositoryManager {
    pub fn new(config: GitConfig, run_id: &str) -> Self {
        Self {
            config,
            work_root: std::env::temp_dir().join(format!("patchbench-{run_id}")),
        }
    }

    /// Clone `repo` into a fresh workspace. Network failures are retried
    /// once with an extended deadline before surfacing as fatal for the
    /// instance.
    pub fn clone_repo(
        &self,
        repo: &str,
        instance_id: &str,
        label: &str,
    ) -> Result<Workspace, CloneError> {
        let target = self.workspace_dir(instance_id, label);
        self.reset_target(&target)?;

        let first = self.try_clone(repo, &target, self.config.clone_timeout_secs);
        match first {
            Ok(()) => {}
            Err(err) => {
                warn!(%repo, %err, "clone failed, retrying once with extended timeout");
                self.reset_target(&target)?;
                self.try_clone(repo, &target, self.config.clone_retry_timeout_secs)?;
            }
        }

        info!(%repo, workspace = %target.display(), "repository cloned");
        Ok(Workspace { path: target })
    }

    /// Fresh, independent clone checked out at `commit` on the host — used
    /// for the post-patch phase. A shallow clone that cannot reach the
    /// commit is deepened by fetching full history.
    pub fn clone_at_commit(
        &self,
        repo: &str,
        instance_id: &str,
        commit: &str,
        label: &str,
    ) -> Result<Workspace, CloneError> {
        let workspace = self.clone_repo(repo, instance_id, label)?;
        let checkout_timeout = Duration::from_secs(self.config.checkout_timeout_secs);

        let checked_out = self.git_in(&workspace.path, &["checkout", "--force", commit], checkout_timeout)?;
        if !checked_out {
            debug!(%commit, "commit unreachable in shallow clone, fetching full history");
            let deepened = self.git_in(
                &workspace.path,
                &["fetch", "--unshallow"],
                Duration::from_secs(self.config.clone_retry_timeout_secs),
            )?;
            let retried = deepened
                && self.git_in(&workspace.path, &["checkout", "--force", commit], checkout_timeout)?;
            if !retried {
                self.cleanup(&workspace);
                return Err(CloneError::CheckoutFailed {
                    commit: commit.to_string(),
                    detail: "commit not reachable even after unshallow fetch".to_string(),
                });
            }
        }

        Ok(workspace)
    }

    /// Recursive, idempotent, permission-tolerant workspace removal. Build
    /// tools routinely drop read-only files; permissions are widened first
    /// and any residual failure is logged, not raised.
    pub fn cleanup(&self, workspace: &Workspace) {
        let path = &workspace.path;
        if !path.exists() {
            return;
        }

        widen_permissions(path);
        match std::fs::remove_dir_all(path) {
            Ok(()) => debug!(workspace = %path.display(), "workspace removed"),
            Err(err) => warn!(workspace = %path.display(), %err, "failed to remove workspace"),
        }
    }

    /// Remove the run-scoped root after the batch completes.
    pub fn cleanup_all(&self) {
        if !self.work_root.exists() {
            return;
        }
        widen_permissions(&self.work_root);
        if let Err(err) = std::fs::remove_dir_all(&self.work_root) {
            warn!(root = %self.work_root.display(), %err, "failed to remove workspace root");
        }
    }

    fn workspace_dir(&self, instance_id: &str, label: &str) -> PathBuf {
        self.work_root.join(format!("{instance_id}-{label}"))
    }

    fn reset_target(&self, target: &Path) -> Result<(), CloneError> {
        if target.exists() {
            widen_permissions(target);
            std::fs::remove_dir_all(target)?;
        }
        std::fs::create_dir_all(self.work_root.as_path())?;
        Ok(())
    }

    fn try_clone(&self, repo: &str, target: &Path, timeout_secs: u64) -> Result<(), CloneError> {
        let url = format!("https://github.com/{repo}.git");
        let depth = self.config.clone_depth.to_string();
        let target_str = target.display().to_string();

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--recursive", "--depth", &depth, &url, &target_str]);

        match proc::run_with_timeout(&mut cmd, Duration::from_secs(timeout_secs))
            .map_err(|err| CloneError::CloneFailed {
                repo: repo.to_string(),
                detail: format!("{err:#}"),
            })? {
            WaitOutcome::Finished(output) if output.success() => Ok(()),
            WaitOutcome::Finished(output) => Err(CloneError::CloneFailed {
                repo: repo.to_string(),
                detail: output.stderr.trim().to_string(),
            }),
            WaitOutcome::TimedOut { limit } => Err(CloneError::Timeout {
                repo: repo.to_string(),
                limit_secs: limit.as_secs(),
            }),
        }
    }

    /// Run git in a host workspace; Ok(true) on exit 0.
    fn git_in(&self, dir: &Path, args: &[&str], timeout: Duration) -> Result<bool, CloneError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(dir).args(args);

        match proc::run_with_timeout(&mut cmd, timeout).map_err(|err| CloneError::CloneFailed {
            repo: dir.display().to_string(),
            detail: format!("{err:#}"),
        })? {
            WaitOutcome::Finished(output) => Ok(output.success()),
            WaitOutcome::TimedOut { .. } => Ok(false),
        }
    }
}

/// Check out the base commit inside the container workspace, resetting any
/// prior state. Submodules are handled best-effort: a project without them
/// must not fail on the submodule steps.
pub fn checkout_base_commit(
    containers: &ContainerManager,
    handle: &ContainerHandle,
    commit: &str,
    workdir: &str,
) -> Result<(), ContainerError> {
    let script = format!(
        "git config --global user.email 'validator@patchbench.local' &&\n\
         git config --global user.name 'Patchbench Validator' &&\n\
         git submodule foreach --recursive 'git reset --hard' 2>/dev/null || true &&\n\
         git reset --hard HEAD 2>/dev/null || true &&\n\
         git clean -fdx 2>/dev/null || true &&\n\
         git fetch origin --unshallow 2>/dev/null || git fetch origin 2>/dev/null || true &&\n\
         git checkout --force {commit} &&\n\
         git submodule update --init --recursive --force 2>/dev/null || true &&\n\
         CURRENT=$(git rev-parse HEAD) &&\n\
         case \"$CURRENT\" in\n\
             {commit}*) exit 0 ;;\n\
             *) echo \"checked out $CURRENT instead of {commit}\"; exit 1 ;;\n\
         esac"
    );

    let result = containers.exec_default(handle, &script, workdir)?;
    if result.success() {
        info!(%commit, container = %handle.name, "base commit checked out");
        Ok(())
    } else {
        Err(ContainerError::Docker(format!(
            "failed to check out {commit}: {}",
            tail_of(&result.output, 20)
        )))
    }
}

/// Drop every uncommitted change and untracked file in the container
/// workspace. Used to rewind after a failed stub attempt.
pub fn reset_to_clean_state(
    containers: &ContainerManager,
    handle: &ContainerHandle,
    workdir: &str,
) -> Result<(), ContainerError> {
    let script = "git submodule foreach --recursive 'git reset --hard' 2>/dev/null || true &&\n\
                  git reset --hard HEAD &&\n\
                  git clean -fdx";

    let result = containers.exec_default(handle, script, workdir)?;
    if result.success() {
        Ok(())
    } else {
        Err(ContainerError::Docker(format!(
            "git reset failed: {}",
            tail_of(&result.output, 20)
        )))
    }
}

fn tail_of(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

fn widen_permissions(root: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755));
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && !path.is_symlink() {
                    stack.push(path);
                } else {
                    let _ = std::fs::set_permissions(
                        &path,
                        std::fs::Permissions::from_mode(0o644),
                    );
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = root;
    }
}
