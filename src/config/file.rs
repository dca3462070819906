//! Configuration file discovery
//!
//! Finds the configuration file in the standard locations and decides the
//! serialization format by extension.

use std::path::{Path, PathBuf};

/// Configuration file locations (in order of precedence)
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./testcoord.yaml",
    "./testcoord.yml",
    "./.testcoord.yaml",
    "~/.config/testcoord/config.yaml",
    "~/.testcoord.yaml",
];

/// Path `config init` writes to when none is given
pub const DEFAULT_INIT_PATH: &str = "./testcoord.yaml";

/// First existing configuration file in the standard locations
pub fn find_config() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
