//! Scheduler settings, derived from the loaded [`dirq_config::Config`].

use std::path::{Path, PathBuf};

use dirq_config::{Config, TextCaps};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global ceiling on in-flight jobs.
    pub max_jobs: usize,
    /// Entries per enumeration batch.
    pub load_batch_size: usize,
    pub show_hidden_files: bool,
    /// Extra name to hide when listing the desktop directory.
    pub kde_trash_dir: Option<String>,
    pub desktop_dir: Option<PathBuf>,
    /// Launchers under these directories are trusted.
    pub trusted_dirs: Vec<PathBuf>,
    /// Current desktop session name, matched against `OnlyShowIn`/`NotShowIn`.
    pub desktop_session: Option<String>,
    pub preview: TextCaps,
    pub large_preview: TextCaps,
    pub max_thumbnail_file_size: u64,
}

impl SchedulerConfig {
    pub fn preview_caps(&self, large: bool) -> TextCaps {
        if large {
            self.large_preview
        } else {
            self.preview
        }
    }

    pub fn is_trusted_location(&self, location: &Path) -> bool {
        self.trusted_dirs.iter().any(|dir| location.starts_with(dir))
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_jobs: config.scheduler.max_jobs.max(1),
            load_batch_size: config.scheduler.load_batch_size.max(1),
            show_hidden_files: config.visibility.show_hidden_files,
            kde_trash_dir: config.visibility.kde_trash_dir.clone(),
            desktop_dir: config.visibility.desktop_dir.clone(),
            trusted_dirs: config.links.trusted_dirs.clone(),
            desktop_session: std::env::var("XDG_CURRENT_DESKTOP")
                .ok()
                .and_then(|v| v.split(':').next().map(str::to_string))
                .filter(|v| !v.is_empty()),
            preview: config.preview.normal,
            large_preview: config.preview.large,
            max_thumbnail_file_size: config.thumbnails.max_file_size,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_clamps_zero_ceiling() {
        let mut config = Config::default();
        config.scheduler.max_jobs = 0;
        let settings = SchedulerConfig::from(&config);
        assert_eq!(settings.max_jobs, 1);
    }

    #[test]
    fn test_trusted_location_prefix() {
        let settings = SchedulerConfig {
            trusted_dirs: vec![PathBuf::from("/usr/share")],
            ..SchedulerConfig::default()
        };
        assert!(settings.is_trusted_location(Path::new("/usr/share/applications/a.desktop")));
        assert!(!settings.is_trusted_location(Path::new("/home/u/a.desktop")));
    }
}
