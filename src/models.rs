//! Core data types shared across the deployment agent.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_command_timeout() -> u64 {
    300
}

/// Per-repository deployment configuration, read from `.deployer.yml` at the
/// repository root.
///
/// `branch` and `notification_email` may be omitted in the file; they are
/// resolved at registration time (checked-out branch / process default) and
/// the resolved values are written back into the stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployerConfig {
    /// Command to execute after a successful pull.
    pub command: String,
    /// Branch to watch. Auto-detected from the checkout if not specified.
    #[serde(default)]
    pub branch: Option<String>,
    /// Recipient for notifications. Falls back to the process default.
    #[serde(default)]
    pub notification_email: Option<String>,
    /// Deploy command timeout in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    /// Also notify on successful deployments.
    #[serde(default)]
    pub send_success_email: bool,
}

/// A registered working copy. Owned exclusively by the registry: created on
/// discovery, overwritten on config reload, removed on config deletion.
#[derive(Debug, Clone, Serialize)]
pub struct WatchedRepository {
    pub path: PathBuf,
    pub remote_url: String,
    pub branch: String,
    pub config: DeployerConfig,
}

/// A validated GitHub push event, as delivered by the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    /// Git ref that was pushed, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repository: RepositoryInfo,
    #[serde(default)]
    pub pusher: Pusher,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

impl PushEvent {
    /// Branch name with a leading `refs/heads/` stripped; any other ref is
    /// returned unchanged.
    pub fn branch_name(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }

    /// Short identifier and message of the most recent commit in the event.
    pub fn latest_commit_info(&self) -> Option<String> {
        self.commits.last().map(|commit| {
            let short_id = commit.id.get(..7).unwrap_or(&commit.id);
            format!("{} - {}", short_id, commit.message.trim())
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub clone_url: String,
    #[serde(default)]
    pub ssh_url: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// Outcome of one deployment attempt. Returned and logged, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub success: bool,
    pub repository_path: PathBuf,
    pub branch: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_exit_code: Option<i32>,
}

impl DeploymentResult {
    pub fn failure(
        path: impl Into<PathBuf>,
        branch: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            repository_path: path.into(),
            branch: branch.into(),
            message: message.into(),
            git_output: None,
            command_output: None,
            command_exit_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_strips_heads_prefix() {
        let event: PushEvent = serde_json::from_value(serde_json::json!({
            "ref": "refs/heads/main",
            "repository": {"clone_url": "https://github.com/org/repo.git"}
        }))
        .unwrap();
        assert_eq!(event.branch_name(), "main");
    }

    #[test]
    fn branch_name_keeps_other_refs_unchanged() {
        let event: PushEvent = serde_json::from_value(serde_json::json!({
            "ref": "refs/tags/v1.0.0",
            "repository": {}
        }))
        .unwrap();
        assert_eq!(event.branch_name(), "refs/tags/v1.0.0");
    }

    #[test]
    fn latest_commit_info_uses_last_commit() {
        let event: PushEvent = serde_json::from_value(serde_json::json!({
            "ref": "refs/heads/main",
            "repository": {},
            "commits": [
                {"id": "1111111deadbeef", "message": "first"},
                {"id": "2222222deadbeef", "message": "second\n"}
            ]
        }))
        .unwrap();
        assert_eq!(
            event.latest_commit_info().unwrap(),
            "2222222 - second".to_string()
        );
    }

    #[test]
    fn latest_commit_info_none_without_commits() {
        let event: PushEvent = serde_json::from_value(serde_json::json!({
            "ref": "refs/heads/main",
            "repository": {}
        }))
        .unwrap();
        assert!(event.latest_commit_info().is_none());
    }

    #[test]
    fn deployer_config_defaults() {
        let config: DeployerConfig = serde_yaml::from_str("command: make deploy").unwrap();
        assert_eq!(config.command, "make deploy");
        assert_eq!(config.branch, None);
        assert_eq!(config.notification_email, None);
        assert_eq!(config.command_timeout, 300);
        assert!(!config.send_success_email);
    }
}
