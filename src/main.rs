use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deployer::pipeline::DeploymentPipeline;
use deployer::registry::RepositoryRegistry;
use deployer::server::{self, AppState, ServerConfig};
use deployer::settings::Settings;
use deployer::watcher::ConfigWatcher;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(version, about = "Webhook-driven git deployment agent")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the deployment agent
    Serve {
        #[command(flatten)]
        settings: Settings,
    },
    /// Scan a directory and print the repositories that would be watched
    Scan {
        /// Root directory to scan
        #[arg(default_value = "/repos")]
        root: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve { settings } => serve(settings).await,
        Commands::Scan { root } => scan(&root),
    }
}

async fn serve(settings: Settings) -> Result<()> {
    settings.validate()?;

    let registry = Arc::new(RepositoryRegistry::new(
        settings.default_notification_email.clone(),
    ));
    registry.discover(&settings.repos_path);

    let watcher = ConfigWatcher::start(&settings.repos_path, Arc::clone(&registry))?;
    let pipeline = DeploymentPipeline::new(
        Arc::clone(&registry),
        settings.notifier(),
        settings.max_concurrent_deploys,
    );

    let state = Arc::new(AppState {
        registry,
        pipeline: Arc::clone(&pipeline),
        webhook_secret: settings.webhook_secret.clone(),
    });
    server::start_server(
        state,
        ServerConfig {
            port: settings.port,
            dev_mode: settings.dev,
        },
    )
    .await?;

    info!("Draining in-flight deployments");
    pipeline.shutdown().await;
    watcher.stop();
    Ok(())
}

fn scan(root: &std::path::Path) -> Result<()> {
    let registry = RepositoryRegistry::new("");
    let count = registry.discover(root);
    for repo in registry.snapshot() {
        println!(
            "{}  remote={}  branch={}  command={}",
            repo.path.display(),
            repo.remote_url,
            repo.branch,
            repo.config.command
        );
    }
    println!("{count} deployable repositories under {}", root.display());
    Ok(())
}
