// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Statement execution against one database path.
//!
//! A [`Database`] binds a path to a settings snapshot. Every call acquires the
//! calling worker's handle, applies the snapshot if the session does not
//! already carry it, runs the statement and releases the handle.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use forkdb_config::validation::is_property_name;
use forkdb_core::{CountInfo, Engine, ForkDbError, Settings, WorkerId};
use serde::Serialize;

use crate::cache::{Handle, HandleCache};
use crate::value::{Row, Value};

/// Rows returned by [`Database::exec`] unless told otherwise.
pub const DEFAULT_MAX_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Rows discarded before the first one returned.
    pub skip: usize,
    pub max_rows: usize,
    /// Fetch row statistics after the rows.
    pub include_counts: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            max_rows: DEFAULT_MAX_ROWS,
            include_counts: false,
        }
    }
}

impl QueryOptions {
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_counts(mut self) -> Self {
        self.include_counts = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names, known even when no row was returned.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<CountInfo>,
}

pub struct Database<E: Engine> {
    cache: Arc<HandleCache<E>>,
    path: String,
    defaults: Arc<BTreeMap<String, String>>,
    overrides: Settings,
}

impl<E: Engine> Clone for Database<E> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            path: self.path.clone(),
            defaults: Arc::clone(&self.defaults),
            overrides: self.overrides.clone(),
        }
    }
}

impl<E: Engine> Database<E> {
    pub(crate) fn new(
        cache: Arc<HandleCache<E>>,
        path: String,
        defaults: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            cache,
            path,
            defaults,
            overrides: Settings::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Configured defaults overlaid with this database's overrides.
    pub fn settings(&self) -> Settings {
        Settings::merged(&self.defaults, &self.overrides)
    }

    fn acquire(&self, worker: WorkerId) -> Result<Handle<'_, E>, ForkDbError> {
        let mut handle = self.cache.acquire(&self.path, worker)?;
        handle.apply(&self.settings())?;
        Ok(handle)
    }

    /// Prepares, binds and executes `sql`, leaving the handle ready to fetch.
    fn start(
        &self,
        worker: WorkerId,
        sql: &str,
        params: &[Value],
        skip: usize,
    ) -> Result<Handle<'_, E>, ForkDbError> {
        let mut handle = self.acquire(worker)?;
        handle.prepare(sql)?;
        if params.is_empty() {
            handle.reset_params()?;
        } else {
            for (i, value) in params.iter().enumerate() {
                handle.bind(&value.to_parameter(i as i32)?)?;
            }
        }
        handle.execute()?;
        if skip > 0 {
            handle.skip(i32::try_from(skip).unwrap_or(i32::MAX))?;
        }
        Ok(handle)
    }

    /// Runs `sql` on `worker`, returning up to `options.max_rows` rows.
    pub fn exec(
        &self,
        worker: WorkerId,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> Result<QueryResult, ForkDbError> {
        let mut handle = self.start(worker, sql, params, options.skip)?;
        let mut result = QueryResult::default();

        if options.max_rows == 0 {
            // One row is still read so the caller learns the column names.
            if let Some(rs) = handle.fetch()? {
                result.columns = rs.names().map(str::to_string).collect();
                handle.flush()?;
            }
        } else {
            while result.rows.len() < options.max_rows {
                let Some(rs) = handle.fetch()? else { break };
                let row = Row::from_result_set(&rs)?;
                if result.columns.is_empty() {
                    result.columns = row.names().to_vec();
                }
                result.rows.push(row);
            }
            if result.rows.len() == options.max_rows {
                handle.flush()?;
            }
        }
        result.row_count = result.rows.len();

        if options.include_counts {
            result.counts = Some(handle.counts()?);
        }
        tracing::debug!(path = %self.path, worker, rows = result.row_count, "statement executed");
        Ok(result)
    }

    /// Runs `sql` on `worker`, handing each row to `f` until it breaks or
    /// `options.max_rows` rows were delivered. Returns the number delivered.
    pub fn exec_each(
        &self,
        worker: WorkerId,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
        mut f: impl FnMut(Row) -> ControlFlow<()>,
    ) -> Result<usize, ForkDbError> {
        let mut handle = self.start(worker, sql, params, options.skip)?;
        let mut delivered = 0;
        while delivered < options.max_rows {
            let Some(rs) = handle.fetch()? else {
                return Ok(delivered);
            };
            delivered += 1;
            if f(Row::from_result_set(&rs)?).is_break() {
                break;
            }
        }
        handle.flush()?;
        Ok(delivered)
    }

    /// First row of `sql`, if any.
    pub fn one(
        &self,
        worker: WorkerId,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, ForkDbError> {
        let options = QueryOptions::default().with_max_rows(1);
        Ok(self.exec(worker, sql, params, &options)?.rows.into_iter().next())
    }

    /// Evaluates `expr` as `select <expr>;` and returns its first row.
    pub fn eval(&self, worker: WorkerId, expr: &str) -> Result<Option<Row>, ForkDbError> {
        self.one(worker, &format!("select {expr};"), &[])
    }

    /// Overrides property `name` for this database and applies it on `worker`.
    ///
    /// Names are case-insensitive. Returns the value the engine reports.
    pub fn set(
        &mut self,
        worker: WorkerId,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, ForkDbError> {
        let name = name.to_ascii_lowercase();
        if !is_property_name(&name) {
            return Err(ForkDbError::engine(format!("invalid property name '{name}'")));
        }
        self.overrides.set(name.clone(), value);
        let mut handle = self.acquire(worker)?;
        let reported = match handle.apply(&self.settings())?.remove(&name) {
            Some(reported) => reported,
            None => handle.set_property(&name, value)?,
        };
        Ok(reported)
    }

    /// Drops every override and reapplies the configured defaults on `worker`.
    pub fn reset(&mut self, worker: WorkerId) -> Result<(), ForkDbError> {
        self.overrides.clear();
        self.acquire(worker).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkdb_config::ForkdbConfig;
    use forkdb_test_utils::{MockEngine, int_column, text_column};
    use forkdb_core::ResultSet;

    fn rows(n: i64) -> Vec<ResultSet> {
        (1..=n)
            .map(|i| ResultSet::new(vec![int_column("id", i), text_column("name", "x")]))
            .collect()
    }

    fn database(engine: MockEngine) -> Database<MockEngine> {
        let config = ForkdbConfig::default();
        let cache = Arc::new(HandleCache::new(Arc::new(engine), &config));
        Database::new(cache, "/db/a".to_string(), Arc::new(BTreeMap::new()))
    }

    #[test]
    fn exec_stops_at_max_rows() {
        let db = database(MockEngine::new().with_rows("select * from T", rows(25)));
        let result = db
            .exec(0, "select * from T", &[], &QueryOptions::default())
            .expect("exec");
        assert_eq!(result.row_count, DEFAULT_MAX_ROWS);
        assert_eq!(result.columns, ["id", "name"]);
    }

    #[test]
    fn zero_max_rows_still_reports_columns() {
        let db = database(MockEngine::new().with_rows("select * from T", rows(3)));
        let options = QueryOptions::default().with_max_rows(0);
        let result = db.exec(0, "select * from T", &[], &options).expect("exec");
        assert!(result.rows.is_empty());
        assert_eq!(result.columns, ["id", "name"]);
    }

    #[test]
    fn skip_and_counts() {
        let db = database(MockEngine::new().with_rows("select * from T", rows(5)));
        let options = QueryOptions::default().with_skip(3).with_counts();
        let result = db.exec(0, "select * from T", &[], &options).expect("exec");
        assert_eq!(result.rows[0].get("id"), Some(&Value::Integer(4)));
        assert_eq!(result.row_count, 2);
        let counts = result.counts.expect("counts");
        assert_eq!(counts.rows_matched_max, 5);
    }

    #[test]
    fn exec_each_honours_break() {
        let db = database(MockEngine::new().with_rows("select * from T", rows(5)));
        let mut seen = Vec::new();
        let delivered = db
            .exec_each(0, "select * from T", &[], &QueryOptions::default(), |row| {
                seen.push(row[0].as_i64());
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .expect("exec_each");
        assert_eq!(delivered, 2);
        assert_eq!(seen, [Some(1), Some(2)]);
    }

    #[test]
    fn params_are_bound_in_order() {
        let db = database(MockEngine::new());
        let row = db
            .one(0, "select params", &[Value::from(5), Value::from("five")])
            .expect("one")
            .expect("row");
        assert_eq!(row.get("p0"), Some(&Value::Integer(5)));
        assert_eq!(row.get("p1"), Some(&Value::Text("five".into())));
    }

    #[test]
    fn set_and_reset_track_overrides() {
        let mut db = database(MockEngine::new());
        let reported = db.set(0, "Cache_Size", "300").expect("set");
        assert_eq!(reported.as_deref(), Some("300"));
        assert_eq!(db.settings().get("cache_size"), Some("300"));

        let shown = db.one(0, "show cache_size", &[]).expect("one").expect("row");
        assert_eq!(shown.get("cache_size"), Some(&Value::Text("300".into())));

        db.reset(0).expect("reset");
        assert!(db.settings().is_empty());
        assert!(db.set(0, "bad name", "1").is_err());
    }

    #[test]
    fn engine_errors_carry_the_message() {
        let db = database(MockEngine::new());
        let err = db
            .exec(0, "select * from nowhere", &[], &QueryOptions::default())
            .expect_err("fails");
        assert!(err.to_string().contains("no such table"));
        // The handle is usable again afterwards.
        db.one(0, "select path", &[]).expect("one");
    }
}
