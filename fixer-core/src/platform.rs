//! Platform-specific locations for the offline store and config

use std::path::PathBuf;

const APP_DIR: &str = "Fixer";

/// Get the platform-specific data directory for the offline store
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\Fixer
/// - macOS: ~/Library/Application Support/Fixer
/// - Linux/Other: ~/.local/share/Fixer
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Default path of the SQLite-backed offline store
pub fn get_default_store_path() -> PathBuf {
    get_data_dir().join("offline.db")
}

/// Default path of the TOML configuration file
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("fixer.toml")
}

/// Get current platform as a string
pub fn get_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "android") {
        "android"
    } else if cfg!(target_os = "ios") {
        "ios"
    } else {
        "unknown"
    }
}
