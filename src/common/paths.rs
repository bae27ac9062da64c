//! Configuration and log file locations

use std::io;
use std::path::PathBuf;

/// Application name used for platform directories
const APP_NAME: &str = "logprobe";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/logprobe/`
/// - macOS: `~/Library/Application Support/logprobe/`
/// - Windows: `%APPDATA%\logprobe\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the default deployment inventory
pub fn default_inventory_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("deployment.yaml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Ensure the log directory exists
pub fn ensure_log_dir() -> io::Result<Option<PathBuf>> {
    if let Some(dir) = log_dir() {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_inventory_lives_next_to_config() {
        if let (Some(config), Some(inventory)) = (config_path(), default_inventory_path()) {
            assert_eq!(config.parent(), inventory.parent());
        }
    }
}
