use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vault_core::session::DEFAULT_SESSION_TIMEOUT_MINUTES;

use crate::constants::CONFIG_ENV;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub vault: VaultSection,
    #[serde(default)]
    pub security: SecuritySection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VaultSection {
    /// Vault root directory; the XDG data dir when unset
    pub root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecuritySection {
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: i64,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            session_timeout_minutes: default_session_timeout(),
        }
    }
}

fn default_session_timeout() -> i64 {
    DEFAULT_SESSION_TIMEOUT_MINUTES
}

impl VaultConfig {
    pub fn new(root: &Path) -> Self {
        Self {
            vault: VaultSection {
                root: Some(root.to_string_lossy().to_string()),
            },
            security: SecuritySection::default(),
        }
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var(CONFIG_ENV) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn default_vault_root() -> anyhow::Result<PathBuf> {
    xdg_data_dir()
}

/// Read the config file, or defaults when it does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<VaultConfig> {
    if !path.exists() {
        return Ok(VaultConfig::default());
    }
    read_config(path)
}

pub fn read_config(path: &Path) -> anyhow::Result<VaultConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

pub fn write_config(path: &Path, config: &VaultConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create config directory {}: {}",
                parent.display(),
                e
            )
        })?;
    }
    let contents =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {}", e))?;
    std::fs::write(path, contents)
        .map_err(|e| anyhow::anyhow!("Failed to write config {}: {}", path.display(), e))?;
    Ok(())
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("vault"));
        }
    }
    Ok(home_dir()?.join(".config").join("vault"))
}

pub fn xdg_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_DATA_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("vault"));
        }
    }
    Ok(home_dir()?.join(".local").join("share").join("vault"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}
