//! Typed error hierarchy for the deployment agent.
//!
//! Two enums cover the fallible subsystems with structured causes:
//! - `ConfigError` — reading and parsing per-repository config files
//! - `RegistryError` — repository registration failures

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading or parsing a `.deployer.yml` file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Config file at {path} is empty")]
    Empty { path: PathBuf },

    #[error("Config file at {path} has an empty command")]
    EmptyCommand { path: PathBuf },
}

/// Errors from registering a repository in the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Repository at {path} has no remote URL configured")]
    MissingRemote { path: PathBuf },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
