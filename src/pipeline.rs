//! The deployment pipeline: match, pull, execute, notify.
//!
//! One accepted push event becomes one deployment task. Tasks run on a
//! bounded worker pool and are tracked so shutdown can drain in-flight
//! work. Overlapping deliveries for the same repository path are serialized
//! by a per-path advisory lock around the pull+execute sequence, so two
//! pushes cannot corrupt one working tree or double-run its deploy command.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::executor::BoundedExecutor;
use crate::gitsync::SyncEngine;
use crate::models::{DeploymentResult, PushEvent, WatchedRepository};
use crate::notifier::{Notification, Notifier};
use crate::registry::RepositoryRegistry;

pub struct DeploymentPipeline {
    registry: Arc<RepositoryRegistry>,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
    repo_locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DeploymentPipeline {
    pub fn new(
        registry: Arc<RepositoryRegistry>,
        notifier: Arc<dyn Notifier>,
        max_concurrent: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            notifier,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
            repo_locks: StdMutex::new(HashMap::new()),
        })
    }

    /// Spawn a tracked deployment task for `event` and return immediately.
    ///
    /// The caller (the webhook endpoint) responds before the deployment
    /// runs; the task outcome is logged and notified, never returned.
    pub fn dispatch(self: &Arc<Self>, event: PushEvent) {
        if self.tracker.is_closed() {
            warn!("Pipeline is shutting down, dropping push event");
            return;
        }
        let pipeline = Arc::clone(self);
        self.tracker.spawn(async move {
            let Ok(_permit) = pipeline.limiter.acquire().await else {
                return;
            };
            if let Some(result) = pipeline.process_event(&event).await {
                if result.success {
                    info!(path = %result.repository_path.display(), "Deployment successful");
                } else {
                    error!(
                        path = %result.repository_path.display(),
                        "Deployment failed: {}",
                        result.message
                    );
                }
            }
        });
    }

    /// Run one deployment attempt for `event`.
    ///
    /// `None` when no watched repository matches (terminal and silent: there
    /// is nothing this agent is responsible for). Otherwise the attempt runs
    /// to a [`DeploymentResult`], failed stages included.
    pub async fn process_event(&self, event: &PushEvent) -> Option<DeploymentResult> {
        let branch = event.branch_name();
        info!(
            repository = %event.repository.full_name,
            branch,
            "Processing push event"
        );

        // Primary clone-URL form first, SSH form only if that fails.
        let repo = self
            .registry
            .lookup(&event.repository.clone_url, branch)
            .or_else(|| self.registry.lookup(&event.repository.ssh_url, branch));

        let Some(repo) = repo else {
            info!(
                clone_url = %event.repository.clone_url,
                branch,
                "No matching repository"
            );
            return None;
        };

        info!(path = %repo.path.display(), "Found matching repository");
        let lock = self.lock_for(&repo.path);
        let _guard = lock.lock().await;
        Some(self.deploy(&repo, event).await)
    }

    /// Advisory per-path lock; entries live for the process lifetime, which
    /// is fine for a registry of tens of repositories.
    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .repo_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn deploy(&self, repo: &WatchedRepository, event: &PushEvent) -> DeploymentResult {
        match self.run_stages(repo, event).await {
            Ok(result) => result,
            Err(e) => {
                // The pipeline boundary: nothing below may take the task
                // down. Report best-effort and return a failed result.
                let message = format!("Unexpected error during deployment: {e:#}");
                error!(path = %repo.path.display(), "{message}");
                self.notify(Notification::pull_failure(
                    self.recipient(repo),
                    &repo.path,
                    &repo.branch,
                    &message,
                ))
                .await;
                DeploymentResult::failure(&repo.path, &repo.branch, message)
            }
        }
    }

    async fn run_stages(
        &self,
        repo: &WatchedRepository,
        event: &PushEvent,
    ) -> Result<DeploymentResult> {
        // Pull. git2 is blocking; keep it off the async workers.
        let engine = SyncEngine::new(&repo.path);
        let branch = repo.branch.clone();
        let sync = tokio::task::spawn_blocking(move || engine.fetch_and_pull(&branch))
            .await
            .context("Pull task panicked")?;

        if !sync.success {
            self.notify(Notification::pull_failure(
                self.recipient(repo),
                &repo.path,
                &repo.branch,
                &sync.message,
            ))
            .await;
            return Ok(DeploymentResult {
                success: false,
                repository_path: repo.path.clone(),
                branch: repo.branch.clone(),
                message: "Git pull failed".to_string(),
                git_output: Some(sync.message),
                command_output: None,
                command_exit_code: None,
            });
        }

        // Execute the deploy command in the repository directory.
        let executor = BoundedExecutor::new(&repo.path);
        let exec = executor
            .execute_safe(&repo.config.command, repo.config.command_timeout)
            .await;

        if !exec.success {
            self.notify(Notification::command_failure(
                self.recipient(repo),
                &repo.path,
                &repo.branch,
                &repo.config.command,
                exec.exit_code,
                &exec.output,
            ))
            .await;
            return Ok(DeploymentResult {
                success: false,
                repository_path: repo.path.clone(),
                branch: repo.branch.clone(),
                message: "Command execution failed".to_string(),
                git_output: Some(sync.message),
                command_output: Some(exec.output),
                command_exit_code: Some(exec.exit_code),
            });
        }

        if repo.config.send_success_email {
            let commit_info = event.latest_commit_info();
            self.notify(Notification::deploy_success(
                self.recipient(repo),
                &repo.path,
                &repo.branch,
                &repo.config.command,
                commit_info.as_deref(),
            ))
            .await;
        }

        Ok(DeploymentResult {
            success: true,
            repository_path: repo.path.clone(),
            branch: repo.branch.clone(),
            message: "Deployment successful".to_string(),
            git_output: Some(sync.message),
            command_output: Some(exec.output),
            command_exit_code: Some(exec.exit_code),
        })
    }

    fn recipient<'a>(&self, repo: &'a WatchedRepository) -> &'a str {
        repo.config.notification_email.as_deref().unwrap_or("")
    }

    async fn notify(&self, notification: Notification) {
        self.notifier.send(notification).await;
    }

    /// Stop accepting events and wait for in-flight deployments to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
