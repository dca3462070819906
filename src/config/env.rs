//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TESTCOORD";

/// Environment configuration from environment variables
///
/// Durations are kept as raw strings and parsed when applied, so a bad
/// value is reported rather than silently ignored.
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Per-test timeout from TESTCOORD_TIMEOUT
    pub timeout: Option<String>,
    /// Completion wait from TESTCOORD_COMPLETION_WAIT
    pub completion_wait: Option<String>,
    /// Listener drain timeout from TESTCOORD_DRAIN_TIMEOUT
    pub drain_timeout: Option<String>,
    /// Catalog file or URL from TESTCOORD_CATALOG
    pub catalog: Option<String>,
    /// Output format from TESTCOORD_FORMAT
    pub format: Option<String>,
    /// Log level from TESTCOORD_LOG
    pub log_level: Option<String>,
    /// Config file from TESTCOORD_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            timeout: get_env("TIMEOUT"),
            completion_wait: get_env("COMPLETION_WAIT"),
            drain_timeout: get_env("DRAIN_TIMEOUT"),
            catalog: get_env("CATALOG"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.timeout.is_some()
            || self.completion_wait.is_some()
            || self.drain_timeout.is_some()
            || self.catalog.is_some()
            || self.format.is_some()
            || self.log_level.is_some()
            || self.config_file.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_TIMEOUT:         {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_COMPLETION_WAIT: {:?}", ENV_PREFIX, self.completion_wait);
        println!("  {}_DRAIN_TIMEOUT:   {:?}", ENV_PREFIX, self.drain_timeout);
        println!("  {}_CATALOG:         {:?}", ENV_PREFIX, self.catalog);
        println!("  {}_FORMAT:          {:?}", ENV_PREFIX, self.format);
        println!("  {}_LOG:             {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_CONFIG:          {:?}", ENV_PREFIX, self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Print all TESTCOORD environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TIMEOUT          Per-test timeout (e.g. 5m, 90s)");
    println!("  {ENV_PREFIX}_COMPLETION_WAIT  Wait for a trailing completion event (e.g. 2s)");
    println!("  {ENV_PREFIX}_DRAIN_TIMEOUT    Event listener drain timeout (e.g. 3s)");
    println!("  {ENV_PREFIX}_CATALOG          Catalog file or http(s) registry URL");
    println!("  {ENV_PREFIX}_FORMAT           Output format (table, json, json-pretty, csv, summary)");
    println!("  {ENV_PREFIX}_LOG              Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_CONFIG           Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_CATALOG=./catalog.yaml");
    println!("  export {ENV_PREFIX}_TIMEOUT=90s");
    println!("  testcoord run --group smoke");
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    pub fn timeout(self, timeout: &str) -> Self {
        self.var("TIMEOUT", timeout)
    }

    pub fn completion_wait(self, wait: &str) -> Self {
        self.var("COMPLETION_WAIT", wait)
    }

    pub fn catalog(self, catalog: &str) -> Self {
        self.var("CATALOG", catalog)
    }

    pub fn format(self, format: &str) -> Self {
        self.var("FORMAT", format)
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.timeout.is_none());
        assert!(config.catalog.is_none());
    }

    #[test]
    fn test_env_builder() {
        let _guard = EnvBuilder::new()
            .timeout("90s")
            .completion_wait("250ms")
            .apply_scoped();

        let config = EnvConfig::load();
        assert_eq!(config.timeout.as_deref(), Some("90s"));
        assert_eq!(config.completion_wait.as_deref(), Some("250ms"));
        assert!(config.has_any());
    }

    #[test]
    fn test_blank_values_ignored() {
        let _guard = EnvBuilder::new().format("  ").apply_scoped();
        assert!(EnvConfig::load().format.is_none());
    }

    #[test]
    fn test_has_any() {
        let empty = EnvConfig::default();
        assert!(!empty.has_any());

        let with_catalog = EnvConfig {
            catalog: Some("./catalog.yaml".to_string()),
            ..Default::default()
        };
        assert!(with_catalog.has_any());
    }
}
