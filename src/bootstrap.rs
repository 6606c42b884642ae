//! Bootstrap helpers for registry-sync.
//!
//! Env vars can live in `~/.registry-sync/.env` next to `config.toml`, so
//! operators can keep contract addresses out of their shell profile.

use std::path::PathBuf;

/// Base directory: `~/.registry-sync`.
pub fn registry_sync_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".registry-sync")
}

/// Path to the registry-sync `.env` file: `~/.registry-sync/.env`.
pub fn registry_sync_env_path() -> PathBuf {
    registry_sync_dir().join(".env")
}

/// Load env vars from `./.env` and then `~/.registry-sync/.env`.
///
/// dotenvy never overwrites existing vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.registry-sync/.env`
pub fn load_registry_sync_env() {
    let _ = dotenvy::dotenv();

    let path = registry_sync_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}
