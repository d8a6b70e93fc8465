use crate::error::Result;
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the data directory created inside a project.
pub const DATA_DIR_NAME: &str = "databased";

/// Where a store keeps its data. Passed explicitly to `Store::new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub project_dir: PathBuf,
}

impl StoreConfig {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            project_dir: project_dir.into(),
        }
    }

    /// Capture the process working directory once, at construction time.
    pub fn current_dir() -> Result<Self> {
        Ok(StoreConfig::new(std::env::current_dir()?))
    }

    /// The `databased` directory that holds databases, indexes and settings.
    pub fn data_root(&self) -> PathBuf {
        self.project_dir.join(DATA_DIR_NAME)
    }
}

/// Contents of `databased/settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory that `backup-database` copies into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings for a data root. A missing file yields the defaults.
    pub fn load(layout: &Layout) -> Result<Self> {
        Self::load_from(&layout.settings_path())
    }

    /// Load settings from an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_data_root_is_inside_project() {
        let config = StoreConfig::new("/srv/app");
        assert_eq!(config.data_root(), PathBuf::from("/srv/app/databased"));
    }

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().join("databased"));
        let settings = Settings::load(&layout).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_backup_path_and_unknown_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "backup_path": "/var/backups/db", "theme": "dark" }"#,
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.backup_path, Some(PathBuf::from("/var/backups/db")));
    }

    #[test]
    fn test_malformed_settings_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{ backup_path: ").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
