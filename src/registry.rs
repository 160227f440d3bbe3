//! Live registry of deployable working copies.
//!
//! Repositories are discovered by walking a root directory, keyed by their
//! absolute path, and looked up by normalized remote identity + branch. All
//! mutations are driven by one logical owner (the startup scan, then the
//! config watcher thread); reads take point-in-time snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::{self, CONFIG_FILENAME};
use crate::errors::RegistryError;
use crate::gitsync::SyncEngine;
use crate::models::WatchedRepository;
use crate::remote::normalize_remote_url;

pub struct RepositoryRegistry {
    default_email: String,
    repos: RwLock<HashMap<PathBuf, WatchedRepository>>,
}

impl RepositoryRegistry {
    pub fn new(default_email: impl Into<String>) -> Self {
        Self {
            default_email: default_email.into(),
            repos: RwLock::new(HashMap::new()),
        }
    }

    /// Walk `root` and register every repository boundary that carries a
    /// config file. Returns the number of registered repositories.
    ///
    /// Iterative work-list traversal: a directory containing a `.git`
    /// marker is a boundary and is never descended into, so nested clones
    /// are not discovered independently. Dot-prefixed directories are
    /// skipped.
    pub fn discover(&self, root: &Path) -> usize {
        info!(root = %root.display(), "Starting repository scan");
        let started = Instant::now();
        let mut registered = 0;

        let mut work_list = vec![root.to_path_buf()];
        while let Some(dir) = work_list.pop() {
            if dir.join(".git").exists() {
                if config::find_config(&dir).is_some() && self.register(&dir) {
                    registered += 1;
                }
                continue;
            }

            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
                if path.is_dir() && !hidden {
                    work_list.push(path);
                }
            }
        }

        info!(
            count = registered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Repository scan complete"
        );
        registered
    }

    /// Register (or re-register) the repository at `path`.
    ///
    /// Returns false and logs when the config cannot be parsed or the
    /// repository has no remote; no entry is created in that case. An
    /// existing entry for the same path is overwritten.
    pub fn register(&self, path: &Path) -> bool {
        match self.build_entry(path) {
            Ok(entry) => {
                info!(
                    path = %path.display(),
                    remote = %entry.remote_url,
                    branch = %entry.branch,
                    "Registered repository"
                );
                self.write().insert(entry.path.clone(), entry);
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to register repository");
                false
            }
        }
    }

    fn build_entry(&self, path: &Path) -> Result<WatchedRepository, RegistryError> {
        let config_path = path.join(CONFIG_FILENAME);
        let mut config = config::parse_config(&config_path)?;

        let engine = SyncEngine::new(path);
        let remote_url = engine.remote_url();
        if remote_url.is_empty() {
            return Err(RegistryError::MissingRemote {
                path: path.to_path_buf(),
            });
        }

        // Resolve optional fields and persist them back into the record.
        let branch = match config.branch.clone() {
            Some(branch) => branch,
            None => engine.current_branch(),
        };
        config.branch = Some(branch.clone());
        if config.notification_email.is_none() {
            config.notification_email = Some(self.default_email.clone());
        }

        Ok(WatchedRepository {
            path: path.to_path_buf(),
            remote_url,
            branch,
            config,
        })
    }

    /// Remove the entry for `path`. No-op when absent.
    pub fn unregister(&self, path: &Path) {
        if self.write().remove(path).is_some() {
            info!(path = %path.display(), "Unregistered repository");
        }
    }

    /// Find the first entry whose normalized remote equals the normalized
    /// query and whose branch matches exactly.
    ///
    /// Linear scan over a snapshot; the registry is small and correctness
    /// matters more than asymptotics here.
    pub fn lookup(&self, remote_url: &str, branch: &str) -> Option<WatchedRepository> {
        if remote_url.is_empty() {
            return None;
        }
        let wanted = normalize_remote_url(remote_url);
        self.read()
            .values()
            .find(|repo| normalize_remote_url(&repo.remote_url) == wanted && repo.branch == branch)
            .cloned()
    }

    /// Point-in-time copy of all entries.
    pub fn snapshot(&self) -> Vec<WatchedRepository> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // Lock poisoning only happens if a holder panicked; the map itself is
    // still coherent, so recover the guard rather than cascade the panic.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, WatchedRepository>> {
        self.repos.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, WatchedRepository>> {
        self.repos.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, RepositoryInitOptions};
    use std::fs;
    use tempfile::tempdir;

    fn make_repo(path: &Path, remote: Option<&str>, config: Option<&str>) {
        fs::create_dir_all(path).unwrap();
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).unwrap();
        if let Some(url) = remote {
            repo.remote("origin", url).unwrap();
        }
        if let Some(text) = config {
            fs::write(path.join(CONFIG_FILENAME), text).unwrap();
        }
    }

    #[test]
    fn register_resolves_branch_and_email() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(
            &repo_dir,
            Some("https://github.com/org/app.git"),
            Some("command: make deploy\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        assert!(registry.register(&repo_dir));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = &snapshot[0];
        assert_eq!(entry.remote_url, "https://github.com/org/app.git");
        // Unborn HEAD resolves to "unknown"; an explicit branch would win.
        assert_eq!(entry.branch, "unknown");
        assert_eq!(entry.config.branch.as_deref(), Some("unknown"));
        assert_eq!(
            entry.config.notification_email.as_deref(),
            Some("ops@example.com")
        );
    }

    #[test]
    fn register_prefers_configured_branch_and_email() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(
            &repo_dir,
            Some("https://github.com/org/app.git"),
            Some("command: make deploy\nbranch: production\nnotification_email: dev@example.com\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        assert!(registry.register(&repo_dir));
        let entry = &registry.snapshot()[0];
        assert_eq!(entry.branch, "production");
        assert_eq!(
            entry.config.notification_email.as_deref(),
            Some("dev@example.com")
        );
    }

    #[test]
    fn register_fails_without_remote() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(&repo_dir, None, Some("command: make deploy\n"));

        let registry = RepositoryRegistry::new("ops@example.com");
        assert!(!registry.register(&repo_dir));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_fails_on_broken_config() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(
            &repo_dir,
            Some("https://github.com/org/app.git"),
            Some("branch: main\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        assert!(!registry.register(&repo_dir));
        assert!(registry.is_empty());
    }

    #[test]
    fn register_overwrites_existing_entry() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(
            &repo_dir,
            Some("https://github.com/org/app.git"),
            Some("command: make deploy\nbranch: main\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        assert!(registry.register(&repo_dir));
        fs::write(
            repo_dir.join(CONFIG_FILENAME),
            "command: make redeploy\nbranch: main\n",
        )
        .unwrap();
        assert!(registry.register(&repo_dir));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].config.command, "make redeploy");
    }

    #[test]
    fn unregister_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(
            &repo_dir,
            Some("https://github.com/org/app.git"),
            Some("command: make deploy\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        registry.register(&repo_dir);
        registry.unregister(&repo_dir);
        assert!(registry.is_empty());
        registry.unregister(&repo_dir);
        assert!(registry.is_empty());
    }

    #[test]
    fn discover_finds_repos_and_stops_at_boundaries() {
        let dir = tempdir().unwrap();
        // repo with config, nested two levels down
        make_repo(
            &dir.path().join("team/app"),
            Some("https://github.com/org/app.git"),
            Some("command: make deploy\nbranch: main\n"),
        );
        // repo without config: boundary, but not registered
        make_repo(
            &dir.path().join("team/tool"),
            Some("https://github.com/org/tool.git"),
            None,
        );
        // nested repo inside a boundary must not be discovered
        make_repo(
            &dir.path().join("team/app/vendor/dep"),
            Some("https://github.com/org/dep.git"),
            Some("command: make deploy\n"),
        );
        // hidden directories are skipped
        make_repo(
            &dir.path().join(".archive/old"),
            Some("https://github.com/org/old.git"),
            Some("command: make deploy\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        let count = registry.discover(dir.path());
        assert_eq!(count, 1);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].path.ends_with("team/app"));
    }

    #[test]
    fn discover_handles_root_that_is_a_repo() {
        let dir = tempdir().unwrap();
        make_repo(
            dir.path(),
            Some("https://github.com/org/root.git"),
            Some("command: make deploy\n"),
        );
        let registry = RepositoryRegistry::new("ops@example.com");
        assert_eq!(registry.discover(dir.path()), 1);
    }

    #[test]
    fn lookup_matches_normalized_remote_and_exact_branch() {
        let dir = tempdir().unwrap();
        let repo_dir = dir.path().join("app");
        make_repo(
            &repo_dir,
            Some("git@github.com:Org/App.git"),
            Some("command: make deploy\nbranch: main\n"),
        );

        let registry = RepositoryRegistry::new("ops@example.com");
        registry.register(&repo_dir);

        let hit = registry.lookup("https://github.com/org/app", "main");
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().path, repo_dir);

        // Branch must match exactly.
        assert!(registry.lookup("https://github.com/org/app", "dev").is_none());
        // Different remote never matches.
        assert!(registry.lookup("https://github.com/org/other", "main").is_none());
        // Empty query never matches.
        assert!(registry.lookup("", "main").is_none());
    }
}
