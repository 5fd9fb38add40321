use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::model::KmeansOptions;

/// Application configuration loaded from TOML config file.
/// Every field is optional; a missing file means all defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory to fingerprint when `extract` has no CLI argument.
    pub music_dir: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Where the fingerprint table and fitted artifacts live.
    pub artifacts: ArtifactPaths,
    /// k-means settings used by `fit` unless overridden on the command line.
    pub clustering: KmeansOptions,
}

/// Artifact path overrides. Unset paths fall back to the data directory.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ArtifactPaths {
    pub table: Option<PathBuf>,
    pub normalizer: Option<PathBuf>,
    pub model: Option<PathBuf>,
}

impl AppConfig {
    /// Load config from `~/.config/soundgroups/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.artifacts
            .table
            .clone()
            .unwrap_or_else(|| default_data_path("fingerprints.csv"))
    }

    pub fn normalizer_path(&self) -> PathBuf {
        self.artifacts
            .normalizer
            .clone()
            .unwrap_or_else(|| default_data_path("normalizer.json"))
    }

    pub fn model_path(&self) -> PathBuf {
        self.artifacts
            .model
            .clone()
            .unwrap_or_else(|| default_data_path("model.json"))
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve a file name inside the XDG data directory.
pub fn default_data_path(file_name: &str) -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join(file_name)
    } else {
        // Fallback: current directory
        PathBuf::from(file_name)
    }
}
