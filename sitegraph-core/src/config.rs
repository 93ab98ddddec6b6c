use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/sitegraph/";
const CONFIG_FILE: &str = "config.json";
const DATABASE_FILE: &str = "sitegraph.db";

/// Runtime settings. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Fire one last crawl when a recurring record is deactivated
    pub crawl_on_deactivate: bool,
    /// How often `serve` polls the database for record changes
    pub watch_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: format!("{}{}", DEFAULT_CONFIG_DIR, DATABASE_FILE),
            request_timeout_secs: 10,
            user_agent: "Sitegraph/0.1 (https://github.com/trapdoorsec/sitegraph)".to_string(),
            crawl_on_deactivate: false,
            watch_interval_secs: 5,
        }
    }
}

impl Settings {
    /// Reads `path`, or the default config file when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => expand(&format!("{}{}", DEFAULT_CONFIG_DIR, CONFIG_FILE)),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn database_path(&self) -> PathBuf {
        expand(&self.database_path)
    }
}

pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"request_timeout_secs": 3, "crawl_on_deactivate": true}"#).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.request_timeout_secs, 3);
        assert!(settings.crawl_on_deactivate);
        assert_eq!(settings.watch_interval_secs, 5);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }
}
