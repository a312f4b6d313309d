//! Filesystem locations used by nudge.
//!
//! Resolved with the [`dirs`] crate so each platform gets its conventional
//! location.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (database) | `~/Library/Application Support/nudge/` | `~/.local/share/nudge/` |
//! | Config | `~/Library/Application Support/nudge/` | `~/.config/nudge/` |
//! | Cache (fallback snapshot) | `~/Library/Caches/nudge/` | `~/.cache/nudge/` |
//!
//! `NUDGE_DATA_DIR`, `NUDGE_CONFIG_DIR` and `NUDGE_CACHE_DIR` override the
//! respective roots.

use std::path::PathBuf;

#[must_use]
pub fn data_dir() -> PathBuf {
    resolve("NUDGE_DATA_DIR", dirs::data_dir(), "/tmp/nudge-data")
}

#[must_use]
pub fn config_dir() -> PathBuf {
    resolve("NUDGE_CONFIG_DIR", dirs::config_dir(), "/tmp/nudge-config")
}

#[must_use]
pub fn cache_dir() -> PathBuf {
    resolve("NUDGE_CACHE_DIR", dirs::cache_dir(), "/tmp/nudge-cache")
}

/// Reminder database (`data_dir()/nudge.db`).
#[must_use]
pub fn database_file() -> PathBuf {
    data_dir().join("nudge.db")
}

/// Main config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn resolve(var: &str, platform: Option<PathBuf>, fallback: &str) -> PathBuf {
    if let Some(override_dir) = std::env::var_os(var) {
        return PathBuf::from(override_dir);
    }
    platform
        .map(|d| d.join("nudge"))
        .unwrap_or_else(|| PathBuf::from(fallback))
}
