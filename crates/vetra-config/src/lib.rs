//! # vetra-config
//!
//! Configuration management for Vetra.
//!
//! Loads configuration from:
//! 1. `~/.vetra/config.toml` (global)
//! 2. `.vetra/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub images: ImageConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        let project_path = Path::new(".vetra/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.vetra/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vetra/config.toml"))
    }

    /// Merge a project-local config over this one
    fn merge(&mut self, other: Config) {
        if other.storage.media_root != StorageConfig::default().media_root {
            self.storage.media_root = other.storage.media_root;
        }
        if other.storage.legacy_root.is_some() {
            self.storage.legacy_root = other.storage.legacy_root;
        }
        if other.images.max_width != ImageConfig::default().max_width {
            self.images.max_width = other.images.max_width;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("VETRA_MEDIA_ROOT") {
            self.storage.media_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("VETRA_LEGACY_ROOT") {
            self.storage.legacy_root = Some(PathBuf::from(path));
        }
        if let Ok(width) = std::env::var("VETRA_MAX_IMAGE_WIDTH") {
            if let Ok(w) = width.parse() {
                self.images.max_width = w;
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Media root directory holding base_images/, base_videos/, overlays/
    pub media_root: PathBuf,
    /// Legacy per-project root tried as the last resolution fallback
    pub legacy_root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("GlobalMedia"),
            legacy_root: None,
        }
    }
}

/// Image normalization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Width cap applied when attaching images (0 disables downscaling)
    pub max_width: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { max_width: 1800 }
    }
}
