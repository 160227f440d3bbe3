//! Outcome notifications.
//!
//! The pipeline reports through the [`Notifier`] trait and never waits on,
//! retries, or inspects delivery: failures are logged and dropped. The
//! actual transport (an SMTP relay or similar) sits behind this interface;
//! [`HttpNotifier`] hands messages to it as JSON, [`LogNotifier`] keeps
//! them in the process log.

use std::path::Path;

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

/// A notification addressed to a recipient. `to` is the resolved
/// notification email of the repository the message concerns.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl Notification {
    pub fn pull_failure(to: &str, repo_path: &Path, branch: &str, error_message: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("Git pull failed - {}", repo_path.display()),
            body: format!(
                "Deployment agent - pull failure\n\n\
                 Repository: {}\n\
                 Branch: {}\n\
                 Time: {}\n\n\
                 Failed to pull the latest changes from the remote repository.\n\n\
                 Error:\n{}\n\n\
                 Action required: check the repository and resolve whatever is\n\
                 preventing the pull. The next push will trigger deployment again.\n",
                repo_path.display(),
                branch,
                timestamp(),
                error_message
            ),
        }
    }

    pub fn command_failure(
        to: &str,
        repo_path: &Path,
        branch: &str,
        command: &str,
        exit_code: i32,
        output: &str,
    ) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("Deploy command failed - {}", repo_path.display()),
            body: format!(
                "Deployment agent - command failure\n\n\
                 Repository: {}\n\
                 Branch: {}\n\
                 Time: {}\n\n\
                 The deploy command failed after the latest changes were pulled.\n\n\
                 Command: {}\n\
                 Exit code: {}\n\n\
                 Output:\n{}\n\n\
                 Action required: check the command configuration and the\n\
                 repository state.\n",
                repo_path.display(),
                branch,
                timestamp(),
                command,
                exit_code,
                output
            ),
        }
    }

    pub fn deploy_success(
        to: &str,
        repo_path: &Path,
        branch: &str,
        command: &str,
        commit_info: Option<&str>,
    ) -> Self {
        let commit_section = match commit_info {
            Some(info) => format!("\nCommit:\n{info}\n"),
            None => String::new(),
        };
        Self {
            to: to.to_string(),
            subject: format!("Deployment successful - {}", repo_path.display()),
            body: format!(
                "Deployment agent - success\n\n\
                 Repository: {}\n\
                 Branch: {}\n\
                 Time: {}\n\n\
                 Pulled the latest changes and executed the deploy command.\n\
                 {}\n\
                 Command: {}\n",
                repo_path.display(),
                branch,
                timestamp(),
                commit_section,
                command
            ),
        }
    }
}

/// Fire-and-forget notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification);
}

/// Writes notifications to the process log. The default sink when no relay
/// endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "Notification:\n{}",
            notification.body
        );
    }
}

/// POSTs notifications as JSON to a relay endpoint. Delivery failures are
/// logged only; they are never retried or surfaced to the pipeline.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, notification: Notification) {
        let result = self
            .client
            .post(&self.endpoint)
            .json(&notification)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                info!(to = %notification.to, subject = %notification.subject, "Notification sent");
            }
            Ok(response) => {
                warn!(
                    to = %notification.to,
                    status = %response.status(),
                    "Notification relay rejected message"
                );
            }
            Err(e) => {
                warn!(to = %notification.to, error = %e, "Failed to send notification");
            }
        }
    }
}
