//! End-to-end deployment flow: a signed webhook against a real git remote
//! pulls the working copy forward and runs its deploy command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use git2::{Repository, RepositoryInitOptions, Signature};
use http_body_util::BodyExt;
use tempfile::{TempDir, tempdir};
use tower::ServiceExt;

use deployer::models::PushEvent;
use deployer::notifier::LogNotifier;
use deployer::pipeline::DeploymentPipeline;
use deployer::registry::RepositoryRegistry;
use deployer::server::{self, AppState};
use deployer::signature;

const SECRET: &str = "integration-secret";

fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(path, &opts).unwrap();
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "test").unwrap();
    config.set_str("user.email", "test@test.com").unwrap();
    drop(config);
    repo
}

fn commit_file(repo_dir: &Path, name: &str, content: &str, msg: &str) {
    let repo = Repository::open(repo_dir).unwrap();
    fs::write(repo_dir.join(name), content).unwrap();
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    if let Ok(head) = repo.head() {
        let parent = head.peel_to_commit().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[&parent])
            .unwrap();
    } else {
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
            .unwrap();
    }
}

/// Upstream repo, bare origin, and a deployable clone with a config file.
fn setup_deployment(command: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let upstream_dir = dir.path().join("upstream");
    init_repo(&upstream_dir);
    commit_file(&upstream_dir, "README.md", "hello\n", "initial commit");

    let origin_dir = dir.path().join("origin.git");
    // Bare origin needs an explicit initial head too; the host's
    // init.defaultBranch must not leak into the fixture.
    let mut bare_opts = RepositoryInitOptions::new();
    bare_opts.bare(true).initial_head("main");
    Repository::init_opts(&origin_dir, &bare_opts).unwrap();
    let upstream = Repository::open(&upstream_dir).unwrap();
    let mut remote = upstream
        .remote("origin", origin_dir.to_str().unwrap())
        .unwrap();
    remote
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();

    let clone_dir = dir.path().join("repos").join("app");
    fs::create_dir_all(clone_dir.parent().unwrap()).unwrap();
    let clone = Repository::clone(origin_dir.to_str().unwrap(), &clone_dir).unwrap();
    // A clone with an unborn HEAD would make every deployment a no-op;
    // fail the fixture, not the assertions downstream.
    assert_eq!(clone.head().unwrap().shorthand(), Some("main"));
    fs::write(
        clone_dir.join(".deployer.yml"),
        format!("command: {command}\nbranch: main\n"),
    )
    .unwrap();
    (dir, origin_dir, clone_dir)
}

fn push_new_commit(dir: &TempDir) {
    let upstream_dir = dir.path().join("upstream");
    commit_file(&upstream_dir, "CHANGES.md", "v2\n", "second commit");
    let upstream = Repository::open(&upstream_dir).unwrap();
    let mut remote = upstream.find_remote("origin").unwrap();
    remote
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();
}

fn push_event_json(origin_dir: &Path, git_ref: &str) -> serde_json::Value {
    serde_json::json!({
        "ref": git_ref,
        "repository": {
            "full_name": "org/app",
            "clone_url": origin_dir.to_str().unwrap(),
            "ssh_url": "",
        },
        "commits": [{"id": "2222222deadbeef", "message": "second commit"}],
    })
}

#[tokio::test]
async fn push_event_pulls_and_runs_deploy_command() {
    let (dir, origin_dir, clone_dir) = setup_deployment("echo deployed > deployed.txt");
    push_new_commit(&dir);

    let registry = Arc::new(RepositoryRegistry::new("ops@example.com"));
    assert_eq!(registry.discover(dir.path().join("repos").as_path()), 1);
    let pipeline = DeploymentPipeline::new(Arc::clone(&registry), Arc::new(LogNotifier), 2);

    let event: PushEvent =
        serde_json::from_value(push_event_json(&origin_dir, "refs/heads/main")).unwrap();
    let result = pipeline.process_event(&event).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert!(result.git_output.unwrap().contains("Fast-forwarded"));
    assert_eq!(result.command_exit_code, Some(0));
    assert!(clone_dir.join("CHANGES.md").exists(), "pull did not land");
    assert!(
        clone_dir.join("deployed.txt").exists(),
        "deploy command did not run"
    );
}

#[tokio::test]
async fn push_to_other_branch_does_nothing() {
    let (dir, origin_dir, clone_dir) = setup_deployment("echo deployed > deployed.txt");
    push_new_commit(&dir);

    let registry = Arc::new(RepositoryRegistry::new("ops@example.com"));
    registry.discover(dir.path().join("repos").as_path());
    let pipeline = DeploymentPipeline::new(registry, Arc::new(LogNotifier), 2);

    let event: PushEvent =
        serde_json::from_value(push_event_json(&origin_dir, "refs/heads/dev")).unwrap();
    assert!(pipeline.process_event(&event).await.is_none());
    assert!(!clone_dir.join("CHANGES.md").exists());
    assert!(!clone_dir.join("deployed.txt").exists());
}

#[tokio::test]
async fn failing_deploy_command_reports_failure() {
    let (dir, origin_dir, _clone_dir) = setup_deployment("echo boom >&2; exit 7");
    push_new_commit(&dir);

    let registry = Arc::new(RepositoryRegistry::new("ops@example.com"));
    registry.discover(dir.path().join("repos").as_path());
    let pipeline = DeploymentPipeline::new(registry, Arc::new(LogNotifier), 2);

    let event: PushEvent =
        serde_json::from_value(push_event_json(&origin_dir, "refs/heads/main")).unwrap();
    let result = pipeline.process_event(&event).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.message, "Command execution failed");
    assert_eq!(result.command_exit_code, Some(7));
    assert!(result.command_output.unwrap().contains("boom"));
    // The pull itself succeeded.
    assert!(result.git_output.unwrap().contains("Fast-forwarded"));
}

#[tokio::test]
async fn signed_webhook_drives_deployment_through_the_server() {
    let (dir, origin_dir, clone_dir) = setup_deployment("echo deployed > deployed.txt");
    push_new_commit(&dir);

    let registry = Arc::new(RepositoryRegistry::new("ops@example.com"));
    registry.discover(dir.path().join("repos").as_path());
    let pipeline = DeploymentPipeline::new(Arc::clone(&registry), Arc::new(LogNotifier), 2);
    let app = server::build_router(Arc::new(AppState {
        registry,
        pipeline: Arc::clone(&pipeline),
        webhook_secret: SECRET.to_string(),
    }));

    let body = push_event_json(&origin_dir, "refs/heads/main")
        .to_string()
        .into_bytes();
    let sig = signature::sign(&body, SECRET);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .header("x-hub-signature-256", sig)
                .header("x-github-event", "push")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["status"], "accepted");

    // The 202 races the deployment; draining the pipeline settles it.
    pipeline.shutdown().await;
    assert!(clone_dir.join("deployed.txt").exists());
}
