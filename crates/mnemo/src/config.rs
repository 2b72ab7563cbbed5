//! Configuration management for mnemo.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (`MNEMO_DB`)
//! 2. Config file (`$MNEMO_CONFIG`, else `config.toml` in the data directory)
//! 3. Default values

use anyhow::{Context, Result};
use directories::ProjectDirs;
use mnemo_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project used when a command does not name one
    pub default_project: Option<String>,

    /// Paths
    pub paths: PathsConfig,

    /// Vector similarity service
    pub vector: VectorConfig,

    /// Engine tuning (supersession, cycles, search, drift)
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base directory for mnemo data
    pub data_dir: PathBuf,

    /// SQLite database file; defaults to `mnemo.db` in the data directory
    pub database: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Base URL of the vector service; unset disables vector search
    pub url: Option<String>,
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "mnemo", "mnemo") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemo")
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(db) = std::env::var("MNEMO_DB") {
            config.paths.database = Some(PathBuf::from(db));
        }
        Ok(config)
    }

    /// Parse a config file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Config::default()
        };

        config.engine.validate().context("Invalid engine configuration")?;
        Ok(config)
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MNEMO_CONFIG") {
            return PathBuf::from(path);
        }
        default_data_dir().join("config.toml")
    }

    /// Database file path.
    pub fn database_path(&self) -> PathBuf {
        self.paths
            .database
            .clone()
            .unwrap_or_else(|| self.paths.data_dir.join("mnemo.db"))
    }

    /// Explicit project, else the configured default, else the name of the
    /// current directory.
    pub fn resolve_project(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.default_project.clone())
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().to_string()))
            })
            .unwrap_or_else(|| "default".to_string())
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        let db_path = self.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/mnemo/config.toml")).unwrap();
        assert!(config.vector.url.is_none());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_project = "alpha"

[paths]
database = "/tmp/mnemo-test.db"

[vector]
url = "http://127.0.0.1:8765"

[engine.search]
vector_weight = 0.7
keyword_weight = 0.3

[engine.idle]
light_sleep_after_ms = 1000
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.default_project.as_deref(), Some("alpha"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/mnemo-test.db"));
        assert_eq!(config.vector.url.as_deref(), Some("http://127.0.0.1:8765"));
        assert_eq!(config.engine.search.vector_weight, 0.7);
        assert_eq!(config.engine.search.default_limit, 20);
        assert_eq!(config.engine.idle.light_sleep_after_ms, 1000);
        assert_eq!(config.engine.idle.deep_sleep_after_ms, 30 * 60 * 1000);
        assert_eq!(config.resolve_project(Some("beta")), "beta");
        assert_eq!(config.resolve_project(None), "alpha");
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine\nbroken").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }
}
