//! Configuration module
//!
//! Handles loading and managing configuration. Values are layered: command
//! line flags over `TESTCOORD_*` environment variables over the config file
//! over built-in defaults.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig, ENV_PREFIX};
pub use file::DEFAULT_INIT_PATH;

use file::{expand_path, find_config, is_yaml_file};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::output::OutputFormat;

/// Default timeout for catalog registry requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Application configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Run timing and topic
    pub coordinator: CoordinatorConfig,

    /// Where tests are looked up
    pub catalog: CatalogConfig,

    /// Report output settings
    pub output: OutputConfig,
}

/// Catalog settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog file path or http(s) registry URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Registry request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Headers sent with every registry query
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

/// Resolved catalog location
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogSource {
    File(PathBuf),
    Http(String),
}

impl CatalogSource {
    pub fn parse(source: &str) -> Self {
        let trimmed = source.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            CatalogSource::Http(trimmed.to_string())
        } else {
            CatalogSource::File(expand_path(trimmed))
        }
    }
}

impl CatalogConfig {
    pub fn source(&self) -> Option<CatalogSource> {
        self.source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(CatalogSource::parse)
    }
}

/// Output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Report format (table, json, json-pretty, csv, summary)
    pub format: String,

    /// Log level
    pub log_level: String,

    /// Disable colored table output
    pub no_color: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "table".to_string(),
            log_level: "info".to_string(),
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file (YAML or JSON by extension)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Load from the given path, else the first standard location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = path {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        match find_config() {
            Some(found) => Ok((Self::load(&found)?, Some(found))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Save configuration to file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Apply `TESTCOORD_*` overrides
    pub fn apply_env(&mut self, env: &EnvConfig) -> Result<()> {
        if let Some(value) = &env.timeout {
            self.coordinator.test_timeout = parse_duration("TIMEOUT", value)?;
        }
        if let Some(value) = &env.completion_wait {
            self.coordinator.completion_wait = parse_duration("COMPLETION_WAIT", value)?;
        }
        if let Some(value) = &env.drain_timeout {
            self.coordinator.drain_timeout = parse_duration("DRAIN_TIMEOUT", value)?;
        }
        if let Some(catalog) = &env.catalog {
            self.catalog.source = Some(catalog.clone());
        }
        if let Some(format) = &env.format {
            self.output.format = format.clone();
        }
        if let Some(level) = &env.log_level {
            self.output.log_level = level.clone();
        }
        Ok(())
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        match OutputFormat::from_str(&self.output.format) {
            Some(format) => Ok(format),
            None => bail!("Unknown output format: {}", self.output.format),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.test_timeout.is_zero() {
            bail!("test_timeout must be greater than zero");
        }
        if self.coordinator.drain_timeout.is_zero() {
            bail!("drain_timeout must be greater than zero");
        }
        if self.coordinator.topic.trim().is_empty() {
            bail!("topic must not be empty");
        }
        if self.catalog.request_timeout.is_zero() {
            bail!("catalog request_timeout must be greater than zero");
        }
        self.output_format()?;
        Ok(())
    }

    /// Example configuration written by `config init`
    pub fn example() -> Self {
        Self {
            catalog: CatalogConfig {
                source: Some("./catalog.yaml".to_string()),
                ..CatalogConfig::default()
            },
            ..Self::default()
        }
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("Invalid {ENV_PREFIX}_{name} value: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.coordinator.test_timeout, Duration::from_secs(300));
        assert_eq!(config.catalog.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.output.format, "table");
        assert!(config.catalog.source().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("testcoord.yaml");

        let config = AppConfig::example();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.catalog.source.as_deref(), Some("./catalog.yaml"));
        assert_eq!(loaded.coordinator.completion_wait, config.coordinator.completion_wait);
    }

    #[test]
    fn test_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("testcoord.json");
        std::fs::write(
            &path,
            r#"{"coordinator": {"test_timeout": "45s"}, "output": {"format": "csv"}}"#,
        )
        .unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.coordinator.test_timeout, Duration::from_secs(45));
        assert_eq!(loaded.output_format().unwrap(), OutputFormat::Csv);
        assert_eq!(loaded.output.log_level, "info");
    }

    #[test]
    fn test_load_partial_yaml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.yml");
        std::fs::write(&path, "catalog:\n  source: https://registry.local/api\n").unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(
            loaded.catalog.source(),
            Some(CatalogSource::Http("https://registry.local/api".into()))
        );
        assert_eq!(loaded.coordinator, CoordinatorConfig::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_apply_env() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            timeout: Some("90s".into()),
            drain_timeout: Some("500ms".into()),
            catalog: Some("./tests.json".into()),
            format: Some("json".into()),
            ..Default::default()
        };

        config.apply_env(&env).unwrap();
        assert_eq!(config.coordinator.test_timeout, Duration::from_secs(90));
        assert_eq!(config.coordinator.drain_timeout, Duration::from_millis(500));
        assert_eq!(
            config.catalog.source(),
            Some(CatalogSource::File(PathBuf::from("./tests.json")))
        );
        assert_eq!(config.output_format().unwrap(), OutputFormat::Json);
    }

    #[test]
    fn test_apply_env_rejects_bad_duration() {
        let mut config = AppConfig::default();
        let env = EnvConfig {
            completion_wait: Some("soon".into()),
            ..Default::default()
        };
        let err = config.apply_env(&env).unwrap_err();
        assert!(err.to_string().contains("TESTCOORD_COMPLETION_WAIT"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.coordinator.test_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.output.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_catalog_source_parse() {
        assert_eq!(
            CatalogSource::parse("http://localhost:8080"),
            CatalogSource::Http("http://localhost:8080".into())
        );
        assert_eq!(
            CatalogSource::parse(" catalog.yaml "),
            CatalogSource::File(PathBuf::from("catalog.yaml"))
        );
    }
}
