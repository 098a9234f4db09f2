// Configuration loading
//
// TOML file, then LEPIPELINE_* environment overrides, then validation.

use anyhow::{Context, Result};
use lepipeline::OrchestratorConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "leorchestre.toml";

/// Load the effective configuration.
///
/// With an explicit `path` the file must exist. Without one,
/// `./leorchestre.toml` is used if present, defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            read_file(path)?
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_file(&default_path)?
            } else {
                OrchestratorConfig::default()
            }
        }
    };

    let config = config.with_env_overrides(|key| std::env::var(key).ok());
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid orchestrator configuration")?;
    Ok(config)
}

/// Parse a TOML config file without env overrides or validation
pub fn read_file(path: &Path) -> Result<OrchestratorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: OrchestratorConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Render a configuration as TOML
pub fn to_toml(config: &OrchestratorConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration")
}
