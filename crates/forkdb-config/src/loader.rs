// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./forkdb.toml` > `~/.config/forkdb/forkdb.toml` > `/etc/forkdb/forkdb.toml`
//! with environment variable overrides via `FORKDB_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::ForkdbConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/forkdb/forkdb.toml";

/// Configuration file looked up in the working directory.
pub const LOCAL_CONFIG_PATH: &str = "forkdb.toml";

/// The user's XDG configuration file, if a config directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("forkdb/forkdb.toml"))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/forkdb/forkdb.toml` (system-wide)
/// 3. `~/.config/forkdb/forkdb.toml` (user XDG config)
/// 4. `./forkdb.toml` (local directory)
/// 5. `FORKDB_*` environment variables
pub fn load_config() -> Result<ForkdbConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and embedding.
pub fn load_config_from_str(toml_content: &str) -> Result<ForkdbConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ForkdbConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ForkdbConfig, figment::Error> {
    tracing::debug!(path = %path.display(), "loading explicit config file");
    Figment::new()
        .merge(Serialized::defaults(ForkdbConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ForkdbConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")`: `FORKDB_WORKER_SHARED_BUFFER_BYTES`
/// must map to `worker.shared_buffer_bytes`, not `worker.shared.buffer.bytes`.
fn env_provider() -> Env {
    Env::prefixed("FORKDB_").map(|key| map_env_key(key.as_str()).into())
}

/// Maps a lowercased, prefix-stripped env var name to a dotted config key.
pub fn map_env_key(key: &str) -> String {
    for section in ["cache", "worker", "engine_defaults", "engine", "log"] {
        if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
            return format!("{}.{rest}", section.replace('_', "."));
        }
    }
    key.to_string()
}
