//! Configuration file loading.
//!
//! This module handles loading gpt-relay configuration from TOML files
//! at XDG-compliant locations.

use crate::config::types::RelayConfig;
use crate::error::RelayError;
use std::path::{Path, PathBuf};

/// Default configuration file name for project-local config.
const LOCAL_CONFIG_NAME: &str = "gpt-relay.toml";

/// Default configuration file name within XDG config directory.
const XDG_CONFIG_NAME: &str = "config.toml";

/// Application name for XDG directory lookup.
const APP_NAME: &str = "gpt-relay";

/// Loads configuration from the default search paths.
///
/// Search order:
/// 1. `./gpt-relay.toml` (project-local)
/// 2. `~/.config/gpt-relay/config.toml` (XDG config)
///
/// Returns the default configuration if no config file is found.
///
/// # Errors
///
/// Returns a `Config` error if a config file exists but cannot be parsed.
pub fn load() -> Result<RelayConfig, RelayError> {
    for path in search_paths() {
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading configuration");
            return from_path(&path);
        }
    }

    tracing::debug!("No configuration file found; using defaults");
    Ok(RelayConfig::default())
}

/// Loads configuration from a specific file path.
///
/// # Errors
///
/// Returns a `Config` error if:
/// - The file cannot be read
/// - The file contains invalid TOML
/// - The TOML doesn't match the expected schema
pub fn from_path(path: &Path) -> Result<RelayConfig, RelayError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RelayError::config(
            "config_file",
            format!("failed to read '{}': {}", path.display(), e),
        )
    })?;

    from_str(&contents).map_err(|e| {
        RelayError::config(
            "config_file",
            format!("failed to parse '{}': {}", path.display(), e),
        )
    })
}

/// Parses configuration from a TOML string.
///
/// # Errors
///
/// Returns a `Config` error if the TOML is invalid or doesn't match the schema.
pub fn from_str(toml_str: &str) -> Result<RelayConfig, RelayError> {
    toml::from_str(toml_str)
        .map_err(|e| RelayError::config("config", format!("invalid TOML: {e}")))
}

/// Returns the paths that would be searched for configuration files.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];

    if let Some(dir) = xdg_config_dir() {
        paths.push(dir.join(XDG_CONFIG_NAME));
    }

    paths
}

/// Returns the path to the XDG config directory for gpt-relay.
///
/// This is `~/.config/gpt-relay` on most systems.
#[must_use]
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Platform;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn from_str_parses_openai_config() {
        let toml = r#"
model = "gpt-4"
api_keys = ["sk-first", "sk-second"]
api_url = "http://localhost:8080"
http_proxy = "http://127.0.0.1:7890"
        "#;

        let config = from_str(toml).unwrap();

        assert_eq!(config.platform, Platform::OpenAi);
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.api_keys.len(), 2);
        assert_eq!(config.proxy_url(), Some("http://127.0.0.1:7890"));
    }

    #[test]
    fn from_str_parses_logging_section() {
        let toml = r#"
[logging]
enabled = false
level = "Debug"
        "#;

        let config = from_str(toml).unwrap();
        assert!(!config.logging.enabled);
        assert_eq!(config.logging.app_name, "gpt-relay");
    }

    #[test]
    fn from_str_error_on_invalid_toml() {
        let err = from_str("this is not valid toml [[[").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn from_str_error_on_unknown_platform() {
        let err = from_str(r#"platform = "bedrock""#).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn from_path_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "model = \"gpt-4-0613\"\nstream_max_tokens = 512").unwrap();

        let config = from_path(&config_path).unwrap();

        assert_eq!(config.model, "gpt-4-0613");
        assert_eq!(config.stream_max_tokens, 512);
    }

    #[test]
    fn from_path_error_on_missing_file() {
        let err = from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn search_paths_starts_with_local() {
        let paths = search_paths();
        assert_eq!(paths[0], PathBuf::from(LOCAL_CONFIG_NAME));
    }

    #[test]
    fn xdg_config_dir_ends_with_app_name() {
        if let Some(dir) = xdg_config_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }
}
