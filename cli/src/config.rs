use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rollin_core::scheduler::SyncConfig;

pub struct Config {
    pub db_path: PathBuf,
    /// Base URL of a `rollin serve` instance; `None` means the local database.
    pub remote: Option<String>,
    pub sync: SyncConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    remote: Option<String>,
    sync: SyncSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SyncSection {
    debounce_ms: u64,
    request_timeout_secs: u64,
    max_attempts: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            debounce_ms: u64::try_from(defaults.debounce.as_millis()).unwrap_or(400),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            max_attempts: defaults.max_attempts,
        }
    }
}

impl From<SyncSection> for SyncConfig {
    fn from(section: SyncSection) -> Self {
        Self {
            debounce: Duration::from_millis(section.debounce_ms),
            request_timeout: Duration::from_secs(section.request_timeout_secs.max(1)),
            max_attempts: section.max_attempts.max(1),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "rollin").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::in_dir(&data_dir)
    }

    /// Build the config for a data directory, reading `config.toml` from it
    /// when present.
    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("rollin.db");
        let file = read_config_file(&data_dir.join("config.toml"))?;

        Ok(Config {
            db_path,
            remote: file.remote.filter(|r| !r.trim().is_empty()),
            sync: file.sync.into(),
        })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config file: {}", path.display()))
}
