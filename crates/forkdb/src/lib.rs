// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-isolated access to single-threaded embedded databases.
//!
//! Each worker id (typically one per host thread) gets its own engine
//! sessions. One worker may call the engine in-process; every other worker is
//! served by a forked child process reached over a pipe pair and a shared
//! memory buffer.
//!
//! ```no_run
//! use forkdb::{ForkDb, ForkdbConfig, QueryOptions};
//!
//! let db = ForkDb::sqlite(ForkdbConfig::default())?;
//! let orders = db.database("/var/lib/app/orders.db");
//! let result = orders.exec(1, "select * from orders", &[], &QueryOptions::default())?;
//! println!("{} rows", result.row_count);
//! # Ok::<(), forkdb::ForkDbError>(())
//! ```

pub mod cache;
pub mod database;
pub mod value;

use std::sync::Arc;

use forkdb_config::diagnostic::ConfigError;
use forkdb_config::validation::validate_config;
use forkdb_sqlite::SqliteEngine;

pub use cache::{Handle, HandleCache, HandleKey};
pub use database::{DEFAULT_MAX_ROWS, Database, QueryOptions, QueryResult};
pub use forkdb_config::ForkdbConfig;
pub use forkdb_core::{CountInfo, Engine, ErrorKind, ForkDbError, Settings, WorkerId};
pub use value::{Row, Value};

/// Entry point: owns the worker supervisor and the handle cache.
pub struct ForkDb<E: Engine> {
    cache: Arc<HandleCache<E>>,
    config: ForkdbConfig,
}

impl ForkDb<SqliteEngine> {
    /// A `ForkDb` over SQLite, configured from `config`.
    pub fn sqlite(config: ForkdbConfig) -> Result<Self, ForkDbError> {
        let engine = SqliteEngine::from_config(&config);
        Self::new(config, engine)
    }
}

impl<E: Engine> ForkDb<E> {
    pub fn new(config: ForkdbConfig, engine: E) -> Result<Self, ForkDbError> {
        validate_config(&config).map_err(|errors| ForkDbError::Config(join_errors(&errors)))?;
        let cache = Arc::new(HandleCache::new(Arc::new(engine), &config));
        tracing::debug!(
            capacity = config.cache.capacity,
            in_process_worker = config.worker.in_process_worker,
            "forkdb initialized"
        );
        Ok(Self { cache, config })
    }

    /// A database handle for `path` carrying the configured default settings.
    pub fn database(&self, path: impl Into<String>) -> Database<E> {
        Database::new(
            Arc::clone(&self.cache),
            path.into(),
            Arc::new(self.config.engine.defaults.clone()),
        )
    }

    /// Cancels whatever `worker` is running. Returns false when `worker` never
    /// had a process.
    pub fn cancel(&self, worker: WorkerId) -> Result<bool, ForkDbError> {
        self.cache.cancel(worker)
    }

    /// Pid serving `worker`: this process for the in-process worker, otherwise
    /// its child if one is running.
    pub fn worker_pid(&self, worker: WorkerId) -> Option<libc::pid_t> {
        if self.cache.needs_fork(worker) {
            self.cache.supervisor().child_pid(worker)
        } else {
            libc::pid_t::try_from(std::process::id()).ok()
        }
    }

    pub fn config(&self) -> &ForkdbConfig {
        &self.config
    }

    pub fn cache(&self) -> &HandleCache<E> {
        &self.cache
    }

    /// Terminates every worker process. Later calls respawn them on demand.
    pub fn shutdown(&self) {
        self.cache.supervisor().shutdown();
    }
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkdb_test_utils::MockEngine;

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ForkdbConfig::default();
        config.cache.capacity = 0;
        match ForkDb::new(config, MockEngine::new()) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::Config),
            Ok(_) => panic!("expected a config error"),
        }
    }

    #[test]
    fn in_process_worker_reports_own_pid() {
        let db = ForkDb::new(ForkdbConfig::default(), MockEngine::new()).expect("forkdb");
        assert_eq!(
            db.worker_pid(0),
            libc::pid_t::try_from(std::process::id()).ok()
        );
        assert_eq!(db.worker_pid(7), None);
    }

    #[test]
    fn databases_carry_configured_defaults() {
        let mut config = ForkdbConfig::default();
        config
            .engine
            .defaults
            .insert("cache_size".to_string(), "64".to_string());
        let db = ForkDb::new(config, MockEngine::new()).expect("forkdb");
        let mut orders = db.database("/db/orders");
        assert_eq!(orders.settings().get("cache_size"), Some("64"));

        orders.set(0, "cache_size", "128").expect("set");
        assert_eq!(orders.settings().get("cache_size"), Some("128"));
        // Other handles to the same path keep their own snapshot.
        assert_eq!(db.database("/db/orders").settings().get("cache_size"), Some("64"));
    }

    #[test]
    fn in_process_queries_run_without_forking() {
        let db = ForkDb::new(ForkdbConfig::default(), MockEngine::new()).expect("forkdb");
        let row = db
            .database("/db/a")
            .one(0, "select path", &[])
            .expect("query")
            .expect("row");
        assert_eq!(row.get("path").and_then(Value::as_str), Some("/db/a"));
        assert!(db.cancel(0).expect("cancel"));
        assert!(!db.cancel(9).expect("cancel"));
    }
}
