//! Service settings, supplied as CLI flags or environment variables.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;

use crate::notifier::{HttpNotifier, LogNotifier, Notifier};

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Shared secret for webhook signature verification
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: String,

    /// Root directory scanned for deployable repositories
    #[arg(long, env = "REPOS_PATH", default_value = "/repos")]
    pub repos_path: PathBuf,

    /// Port for the webhook server
    #[arg(long, env = "WEBHOOK_PORT", default_value = "8080")]
    pub port: u16,

    /// Recipient for repositories that set no notification_email
    #[arg(long, env = "DEFAULT_NOTIFICATION_EMAIL")]
    pub default_notification_email: String,

    /// Notification relay endpoint; notifications go to the log when unset
    #[arg(long, env = "NOTIFY_ENDPOINT")]
    pub notify_endpoint: Option<String>,

    /// Maximum deployments running at once
    #[arg(long, env = "MAX_CONCURRENT_DEPLOYS", default_value = "4")]
    pub max_concurrent_deploys: usize,

    /// Enable permissive CORS for local development
    #[arg(long)]
    pub dev: bool,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.webhook_secret.trim().is_empty() {
            bail!("Webhook secret must not be empty");
        }
        if self.default_notification_email.trim().is_empty() {
            bail!("Default notification email must not be empty");
        }
        if !self.repos_path.is_dir() {
            bail!(
                "Repository root {} is not a directory",
                self.repos_path.display()
            );
        }
        if self.max_concurrent_deploys == 0 {
            bail!("Max concurrent deploys must be at least 1");
        }
        Ok(())
    }

    /// Build the notification sink this configuration asks for.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.notify_endpoint {
            Some(endpoint) => Arc::new(HttpNotifier::new(endpoint.clone())),
            None => Arc::new(LogNotifier),
        }
    }
}
