//! CLI configuration handling.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use ejournal_core::ClientConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Logging level used when `RUST_LOG` is not set.
    pub log_level: String,

    /// API client settings (`[api]` table).
    pub api: ClientConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            log_level: "warn".to_string(),
            api: ClientConfig::default(),
        }
    }
}

/// Load configuration from `path`, or the default location, falling back to
/// defaults when the file does not exist. Environment overrides are applied
/// last.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };

    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        parse_config(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        CliConfig::default()
    };

    config.config_path = config_path;
    config.api = config
        .api
        .with_env_overrides()
        .context("Invalid API URL in environment")?;

    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<CliConfig> {
    Ok(toml::from_str(contents)?)
}

fn default_config_path() -> PathBuf {
    ProjectDirs::from("nl", "ejournal", "ejournal")
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("ejournal.toml"))
}
