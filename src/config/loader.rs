//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config_with, ValidationError};
use crate::filtering::registry::FilterRegistry;

/// Path tried when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/filter-proxy/proxy.toml";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    load_config_with(path, &FilterRegistry::with_builtins())
}

/// Load and validate, resolving filter kinds through `registry`.
pub fn load_config_with(path: &Path, registry: &FilterRegistry) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, registry)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str, registry: &FilterRegistry) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content)?;
    validate_config_with(&config, registry).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Pick the config file: the explicit path, else the default path if it
/// exists, else none (built-in defaults).
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            default.exists().then(|| default.to_path_buf())
        }
    }
}
