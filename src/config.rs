//! Discovery and parsing of per-repository `.deployer.yml` files.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::ConfigError;
use crate::models::DeployerConfig;

/// Config filename recognized at a repository root.
pub const CONFIG_FILENAME: &str = ".deployer.yml";

/// Locate the config file in `directory`, if present.
pub fn find_config(directory: &Path) -> Option<PathBuf> {
    let candidate = directory.join(CONFIG_FILENAME);
    candidate.is_file().then_some(candidate)
}

/// Parse a `.deployer.yml` file into a [`DeployerConfig`].
///
/// `command` is required and must be non-empty; all other fields take their
/// serde defaults.
pub fn parse_config(path: &Path) -> Result<DeployerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;

    if text.trim().is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }

    let config: DeployerConfig =
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;

    if config.command.trim().is_empty() {
        return Err(ConfigError::EmptyCommand {
            path: path.to_path_buf(),
        });
    }

    debug!(path = %path.display(), "Parsed deployer config");
    Ok(config)
}
