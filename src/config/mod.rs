mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./chunkstream.toml",
        "~/.config/chunkstream/config.toml",
        "/etc/chunkstream/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

fn expand_paths(config: &mut Config) {
    if let Some(dir) = config.store.media_dir.to_str() {
        let expanded = shellexpand::tilde(dir).into_owned();
        config.store.media_dir = expanded.into();
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    config
        .engine
        .to_engine_config()
        .context("Invalid engine settings")?;

    if config.sessions.is_empty() {
        anyhow::bail!("At least one session must be configured");
    }

    let mut seen = HashSet::new();
    for session in &config.sessions {
        if session.identity.trim().is_empty() {
            anyhow::bail!("Session identity cannot be empty");
        }
        if !seen.insert(session.identity.as_str()) {
            anyhow::bail!("Duplicate session identity '{}'", session.identity);
        }
    }

    if config.store.chunk_size == 0 {
        anyhow::bail!("Store chunk size cannot be 0");
    }

    if config.store.requests_per_second == Some(0) {
        anyhow::bail!("Store requests_per_second cannot be 0, omit it to disable limiting");
    }

    if !config.store.media_dir.exists() {
        tracing::warn!("Media directory does not exist: {:?}", config.store.media_dir);
    }

    if config.stats.cleanup_interval_secs == 0 {
        anyhow::bail!("Stats cleanup interval cannot be 0");
    }

    Ok(())
}
