//! Configuration file resolution
//!
//! The service reads a single TOML file at startup. Its location is resolved in
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform configuration directory (`<config_dir>/sayq/config.toml`)
//! 4. None: caller falls back to built-in defaults

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SAYQ_CONFIG";

/// Resolve the configuration file path.
///
/// An explicitly requested file (argument or environment variable) must exist;
/// a missing file there is a configuration error. The platform default is only
/// used when it exists, otherwise `Ok(None)` is returned.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_existing(PathBuf::from(path));
        }
    }

    // Priority 3: platform default
    Ok(default_config_path().filter(|p| p.exists()))
}

/// Read the resolved configuration file into a string
pub fn read_config_file(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// Platform default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sayq").join("config.toml"))
}

fn require_existing(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_argument_takes_priority() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let resolved = resolve_config_path(Some(file.path()), "SAYQ_TEST_UNSET_VAR").unwrap();
        assert_eq!(resolved.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = resolve_config_path(
            Some(Path::new("/nonexistent/sayq/config.toml")),
            "SAYQ_TEST_UNSET_VAR",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_env_var_used_when_no_argument() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::env::set_var("SAYQ_TEST_CONFIG_ENV", file.path());
        let resolved = resolve_config_path(None, "SAYQ_TEST_CONFIG_ENV").unwrap();
        std::env::remove_var("SAYQ_TEST_CONFIG_ENV");
        assert_eq!(resolved.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_talker = \"de\"\n").unwrap();
        let content = read_config_file(&path).unwrap();
        assert!(content.contains("default_talker"));
    }
}
