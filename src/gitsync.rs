//! Git synchronization for a single working copy.
//!
//! `SyncEngine` wraps the git2 operations a deployment needs: reading the
//! remote and checked-out branch, detecting local conflicts, and performing
//! a fetch + fast-forward pull. No failure propagates past this boundary as
//! a panic or an unhandled error; everything collapses into [`SyncOutcome`].

use std::path::PathBuf;

use git2::build::CheckoutBuilder;
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository, Status, StatusOptions};
use tracing::{error, info, warn};

/// Result of a fetch-and-pull attempt.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
}

impl SyncOutcome {
    fn success(message: String) -> Self {
        Self {
            success: true,
            message,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
        }
    }
}

/// Git operations for one repository path.
pub struct SyncEngine {
    repo_path: PathBuf,
}

// Tracked changes that block a pull. Untracked files (WT_NEW) are excluded
// on purpose; they are logged but do not block.
const DIRTY_STATUSES: Status = Status::INDEX_NEW
    .union(Status::INDEX_MODIFIED)
    .union(Status::INDEX_DELETED)
    .union(Status::INDEX_RENAMED)
    .union(Status::INDEX_TYPECHANGE)
    .union(Status::WT_MODIFIED)
    .union(Status::WT_DELETED)
    .union(Status::WT_RENAMED)
    .union(Status::WT_TYPECHANGE)
    .union(Status::CONFLICTED);

impl SyncEngine {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn open(&self) -> Result<Repository, git2::Error> {
        Repository::open(&self.repo_path)
    }

    /// The `origin` remote URL, or an empty string if unset or unreadable.
    pub fn remote_url(&self) -> String {
        let url = self
            .open()
            .and_then(|repo| repo.find_remote("origin").map(|r| r.url().map(String::from)));
        match url {
            Ok(Some(url)) => url,
            Ok(None) => String::new(),
            Err(e) => {
                error!(path = %self.repo_path.display(), error = %e, "Failed to read remote URL");
                String::new()
            }
        }
    }

    /// The currently checked-out branch name, or `"unknown"` when HEAD is
    /// detached, unborn, or unreadable.
    pub fn current_branch(&self) -> String {
        let branch = self.open().and_then(|repo| {
            let head = repo.head()?;
            Ok(head.shorthand().map(String::from))
        });
        match branch {
            Ok(Some(name)) => name,
            _ => "unknown".to_string(),
        }
    }

    /// Check the working tree for changes that would block a pull.
    ///
    /// Returns `(true, description)` when tracked files have uncommitted
    /// modifications (or the status cannot be read at all). Untracked files
    /// are logged as a warning but do not block.
    pub fn has_conflicts(&self) -> (bool, String) {
        let statuses = self.open().and_then(|repo| {
            let mut opts = StatusOptions::new();
            opts.include_untracked(true);
            let statuses = repo.statuses(Some(&mut opts))?;

            let mut dirty = Vec::new();
            let mut untracked = Vec::new();
            for entry in statuses.iter() {
                let path = entry.path().unwrap_or("<non-utf8 path>").to_string();
                if entry.status().intersects(DIRTY_STATUSES) {
                    dirty.push(path);
                } else if entry.status().contains(Status::WT_NEW) {
                    untracked.push(path);
                }
            }
            Ok((dirty, untracked))
        });

        match statuses {
            Ok((dirty, untracked)) => {
                if !untracked.is_empty() {
                    warn!(
                        path = %self.repo_path.display(),
                        files = ?untracked,
                        "Repository has untracked files"
                    );
                }
                if dirty.is_empty() {
                    (false, "Working tree is clean".to_string())
                } else {
                    (
                        true,
                        format!(
                            "Working tree has uncommitted changes:\n{}",
                            dirty.join("\n")
                        ),
                    )
                }
            }
            Err(e) => (true, format!("Failed to read repository status: {e}")),
        }
    }

    /// Fetch `branch` from origin and fast-forward the local branch to it.
    ///
    /// Aborts without fetching when [`has_conflicts`](Self::has_conflicts)
    /// reports a dirty tree. On success the message contains the fetch
    /// result, the pull result and the resulting HEAD commit.
    pub fn fetch_and_pull(&self, branch: &str) -> SyncOutcome {
        let (conflicted, status) = self.has_conflicts();
        if conflicted {
            error!(path = %self.repo_path.display(), "Cannot pull - {status}");
            return SyncOutcome::failure(status);
        }

        match self.pull_inner(branch) {
            Ok(message) => {
                info!(path = %self.repo_path.display(), branch, "Pulled changes");
                SyncOutcome::success(message)
            }
            Err(e) => {
                let message = format!("Git operation failed: {}", e.message());
                error!(path = %self.repo_path.display(), branch, "{message}");
                SyncOutcome::failure(message)
            }
        }
    }

    fn pull_inner(&self, branch: &str) -> Result<String, git2::Error> {
        let repo = self.open()?;
        let mut lines = Vec::new();

        let mut remote = repo.find_remote("origin")?;
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_, username_from_url, _| {
            Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
        });
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        remote.fetch(&[branch], Some(&mut fetch_options), None)?;

        let fetch_head = repo.find_reference("FETCH_HEAD")?;
        let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
        lines.push(format!(
            "Fetched origin/{}: {}",
            branch,
            short_id(&fetched.id())
        ));

        let current = self.current_branch();
        if current != branch {
            warn!(
                path = %self.repo_path.display(),
                "Current branch '{current}' doesn't match target branch '{branch}'"
            );
            lines.push(format!(
                "Warning: on branch '{current}', expected '{branch}'"
            ));
        }

        let (analysis, _) = repo.merge_analysis(&[&fetched])?;
        if analysis.is_up_to_date() {
            lines.push("Already up to date".to_string());
        } else if analysis.is_fast_forward() {
            let refname = format!("refs/heads/{branch}");
            let mut reference = repo.find_reference(&refname)?;
            reference.set_target(fetched.id(), "deployer: fast-forward")?;
            repo.set_head(&refname)?;
            repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
            lines.push(format!(
                "Fast-forwarded '{}' to {}",
                branch,
                short_id(&fetched.id())
            ));
        } else {
            return Err(git2::Error::from_str(
                "cannot fast-forward, local and remote histories have diverged",
            ));
        }

        let head = repo.head()?.peel_to_commit()?;
        lines.push(format!(
            "Latest commit: {} - {}",
            short_id(&head.id()),
            head.summary().unwrap_or("")
        ));

        Ok(lines.join("\n"))
    }
}

fn short_id(oid: &git2::Oid) -> String {
    let id = oid.to_string();
    id[..7.min(id.len())].to_string()
}
