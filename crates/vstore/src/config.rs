//! Store-wide configuration, loaded from a TOML file: read, fall back to
//! defaults on a missing or malformed file, log a warning either way.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub cache_clean_interval_secs: u64,
    pub log_level: String,
    pub data_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            cache_clean_interval_secs: 30,
            log_level: "info".to_string(),
            data_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded store config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vstore")
            .join("config.toml")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("vstore"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = StoreConfig::load_from(Path::new("/nonexistent/vstore/config.toml"));
        assert_eq!(config.cache_clean_interval_secs, 30);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml {{{").unwrap();
        let config = StoreConfig::load_from(&path);
        assert_eq!(config.cache_clean_interval_secs, 30);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = StoreConfig::default();
        config.cache_clean_interval_secs = 10;
        config.save_to(&path).unwrap();

        let loaded = StoreConfig::load_from(&path);
        assert_eq!(loaded.cache_clean_interval_secs, 10);
    }
}
