//! Mount-list configuration for the demo CLI, following the shape of the
//! reference daemon's own `Config` (serde + toml, `#[serde(default)]`
//! sections, falling back to an empty mount list on a missing file).

use std::path::{Path as FsPath, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CliConfig {
    pub mounts: Vec<MountSpec>,
}

/// One backend to mount at startup: its kind, source (filesystem root for
/// `dir`/`zip`, ignored for `memory`), mount path under `/storage/`, and
/// optional overlay projection into the root namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSpec {
    pub id: String,
    pub kind: BackendSpecKind,
    pub source: Option<String>,
    pub mount_path: String,
    pub read_write: bool,
    pub cached: bool,
    pub overlay_path: Option<String>,
    pub overlay_priority: i32,
}

impl Default for MountSpec {
    fn default() -> Self {
        MountSpec {
            id: "unnamed".to_string(),
            kind: BackendSpecKind::Memory,
            source: None,
            mount_path: "/storage/unnamed/".to_string(),
            read_write: false,
            cached: false,
            overlay_path: None,
            overlay_priority: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendSpecKind {
    Dir,
    Zip,
    Memory,
}

impl CliConfig {
    pub fn load_from(path: &FsPath) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid mount config, starting with no mounts");
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
            .join("mounts.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_no_mounts() {
        let config = CliConfig::load_from(FsPath::new("/nonexistent/vstore/mounts.toml"));
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn parses_a_mount_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mounts.toml");
        std::fs::write(
            &path,
            r#"
            [[mounts]]
            id = "local"
            kind = "dir"
            source = "/tmp/vstore-demo"
            mount_path = "/storage/local/"
            read_write = true
            cached = true
            overlay_path = "/"
            overlay_priority = 10
            "#,
        )
        .unwrap();

        let config = CliConfig::load_from(&path);
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].id, "local");
        assert_eq!(config.mounts[0].kind, BackendSpecKind::Dir);
        assert_eq!(config.mounts[0].overlay_priority, 10);
    }
}
