// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for forkdb.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;

use forkdb_core::{EvictionPolicy, WorkerId};
use serde::{Deserialize, Serialize};

/// Bytes reserved at the start of every shared buffer for the protocol header.
pub const SHARED_HEADER_BYTES: usize = 64;

/// Smallest accepted shared-buffer payload capacity.
pub const MIN_SHARED_BUFFER_BYTES: usize = 64;

/// Top-level forkdb configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForkdbConfig {
    /// Handle cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Worker process and channel settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Engine session settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

impl ForkdbConfig {
    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Handle cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Fixed number of handle slots shared by every worker.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Which idle handle is recycled when no slot is free.
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            eviction: EvictionPolicy::default(),
        }
    }
}

fn default_capacity() -> usize {
    128
}

/// Worker process and channel configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Payload capacity of each worker's shared buffer, in bytes.
    #[serde(default = "default_shared_buffer_bytes")]
    pub shared_buffer_bytes: usize,

    /// Size of each worker's engine error-message buffer, in bytes.
    #[serde(default = "default_error_buffer_bytes")]
    pub error_buffer_bytes: usize,

    /// The single worker id allowed to call the engine in-process.
    #[serde(default = "default_in_process_worker")]
    pub in_process_worker: WorkerId,

    /// Route every worker, including `in_process_worker`, through a child process.
    #[serde(default)]
    pub fork_all: bool,

    /// Per-request timeout in milliseconds. 0 blocks indefinitely.
    #[serde(default)]
    pub request_timeout_ms: u64,

    /// Process name given to worker children.
    #[serde(default = "default_process_title")]
    pub process_title: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            shared_buffer_bytes: default_shared_buffer_bytes(),
            error_buffer_bytes: default_error_buffer_bytes(),
            in_process_worker: default_in_process_worker(),
            fork_all: false,
            request_timeout_ms: 0,
            process_title: default_process_title(),
        }
    }
}

impl WorkerConfig {
    /// Whether `worker` must be served by a child process.
    pub fn needs_fork(&self, worker: WorkerId) -> bool {
        self.fork_all || worker != self.in_process_worker
    }
}

fn default_shared_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_error_buffer_bytes() -> usize {
    4096
}

fn default_in_process_worker() -> WorkerId {
    0
}

fn default_process_title() -> String {
    "forkdb-worker".to_string()
}

/// Engine session configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// How long a session waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Properties applied to every session before per-database overrides.
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            defaults: BTreeMap::new(),
        }
    }
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
