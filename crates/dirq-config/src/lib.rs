//! # dirq-config
//!
//! Configuration management for the dirq attribute scheduler.
//!
//! Loads configuration from:
//! 1. `~/.dirq/config.toml` (global)
//! 2. `.dirq/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
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
    pub scheduler: SchedulerSection,
    pub visibility: VisibilityConfig,
    pub links: LinkConfig,
    pub preview: PreviewConfig,
    pub thumbnails: ThumbnailConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        Self::load_from(global.as_deref(), Some(Path::new(".dirq/config.toml")))
    }

    /// Load config from explicit global and project paths, then apply
    /// environment overrides. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        if let Some(project_path) = project {
            if project_path.exists() {
                debug!("Loading project config from {:?}", project_path);
                let contents = std::fs::read_to_string(project_path)?;
                let project_config: Config = toml::from_str(&contents)?;
                config.merge(project_config);
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.dirq/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".dirq/config.toml"))
    }

    /// Merge another config (project overrides)
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.scheduler.max_jobs != defaults.scheduler.max_jobs {
            self.scheduler.max_jobs = other.scheduler.max_jobs;
        }
        if other.scheduler.load_batch_size != defaults.scheduler.load_batch_size {
            self.scheduler.load_batch_size = other.scheduler.load_batch_size;
        }
        if other.visibility.show_hidden_files {
            self.visibility.show_hidden_files = true;
        }
        if other.visibility.kde_trash_dir.is_some() {
            self.visibility.kde_trash_dir = other.visibility.kde_trash_dir;
        }
        if other.visibility.desktop_dir.is_some() {
            self.visibility.desktop_dir = other.visibility.desktop_dir;
        }
        if other.links.trusted_dirs != defaults.links.trusted_dirs {
            self.links.trusted_dirs = other.links.trusted_dirs;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(jobs) = std::env::var("DIRQ_MAX_JOBS") {
            if let Ok(n) = jobs.parse::<usize>() {
                if n > 0 {
                    self.scheduler.max_jobs = n;
                }
            }
        }
        if let Ok(show) = std::env::var("DIRQ_SHOW_HIDDEN") {
            self.visibility.show_hidden_files = matches!(show.as_str(), "1" | "true" | "yes");
        }
        if let Ok(name) = std::env::var("DIRQ_KDE_TRASH_DIR") {
            self.visibility.kde_trash_dir = Some(name);
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Concurrency and batching limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Ceiling on in-flight attribute jobs across all directories
    pub max_jobs: usize,
    /// Entries requested per enumeration callback
    pub load_batch_size: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_jobs: 10,
            load_batch_size: 100,
        }
    }
}

/// Hidden-file policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// Count and list hidden/backup entries
    pub show_hidden_files: bool,
    /// Name of the KDE trash directory hidden on the desktop
    pub kde_trash_dir: Option<String>,
    /// Location treated as the desktop directory
    pub desktop_dir: Option<PathBuf>,
}

/// Launcher trust policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Launchers below these directories may override name and icon
    pub trusted_dirs: Vec<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let mut trusted_dirs = vec![
            PathBuf::from("/usr/share"),
            PathBuf::from("/usr/local/share"),
        ];
        if let Some(home) = dirs::home_dir() {
            trusted_dirs.push(home.join(".gnome2"));
        }
        Self { trusted_dirs }
    }
}

/// Byte/line/column caps for one preview tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCaps {
    pub max_bytes: usize,
    pub max_lines: usize,
    pub max_columns: usize,
}

/// Top-left text preview caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub normal: TextCaps,
    pub large: TextCaps,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            normal: TextCaps {
                max_bytes: 1024,
                max_lines: 5,
                max_columns: 10,
            },
            large: TextCaps {
                max_bytes: 10000,
                max_lines: 24,
                max_columns: 80,
            },
        }
    }
}

/// Thumbnail lookup and decoding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Freedesktop thumbnail cache directory
    pub cache_dir: PathBuf,
    /// Originals larger than this are never decoded directly
    pub max_file_size: u64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("thumbnails")
                .join("normal"),
            max_file_size: 16 * 1024 * 1024,
        }
    }
}
