// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single SQLite connection behind the `Session` trait.
//!
//! `execute` binds the recorded parameters and steps the statement once:
//! DML runs to completion there, a query stops on its first row. Every
//! `fetch` or skipped row steps once more, so a caller that wants a few rows
//! never pays for the whole result.

use forkdb_config::validation::is_property_name;
use forkdb_core::{CountInfo, EngineError, Interrupt, Parameter, ResultSet, Session};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode};

use crate::convert::{parameter_value, value_text};
use crate::cursor::Cursor;

pub struct SqliteSession {
    // Declared before `conn` so the statement is finalized first.
    cursor: Option<Cursor>,
    conn: Connection,
    interrupt: Interrupt,
    params: Vec<Option<Value>>,
    /// Row stepped by `execute`, not yet handed out.
    first: Option<ResultSet>,
    counts: CountInfo,
}

impl SqliteSession {
    pub(crate) fn new(conn: Connection, interrupt: Interrupt) -> Self {
        Self {
            cursor: None,
            conn,
            interrupt,
            params: Vec::new(),
            first: None,
            counts: CountInfo::default(),
        }
    }

    /// Maps a SQLite error, reporting interrupts as cancellation.
    fn engine_error(&self, err: rusqlite::Error) -> EngineError {
        if self.interrupt.is_raised()
            || err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted)
        {
            EngineError::Interrupted
        } else {
            EngineError::Failed(err.to_string())
        }
    }

    /// Steps the cursor once, counting the row as matched.
    fn step(&mut self) -> Result<Option<ResultSet>, EngineError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match cursor.next_row() {
            Ok(row) => {
                if row.is_some() {
                    self.counts.rows_matched_min += 1;
                    self.counts.rows_matched_max += 1;
                }
                Ok(row)
            }
            Err(err) => Err(self.engine_error(err)),
        }
    }

    /// Hands out the row stepped by `execute`, or steps to the next one.
    fn next_row(&mut self) -> Result<Option<ResultSet>, EngineError> {
        if self.interrupt.is_raised() {
            return Err(EngineError::Interrupted);
        }
        match self.first.take() {
            Some(row) => Ok(Some(row)),
            None => self.step(),
        }
    }
}

impl Session for SqliteSession {
    fn prepare(&mut self, sql: &str) -> Result<(), EngineError> {
        self.cursor = None;
        self.first = None;
        self.counts = CountInfo::default();
        // SAFETY: the cursor only lives in `self.cursor`, which drops before
        // `self.conn`.
        let cursor =
            unsafe { Cursor::prepare(&self.conn, sql) }.map_err(|e| self.engine_error(e))?;
        self.params = vec![None; cursor.parameter_count()];
        self.cursor = Some(cursor);
        Ok(())
    }

    fn bind(&mut self, param: &Parameter) -> Result<(), EngineError> {
        let slot = usize::try_from(param.index)
            .ok()
            .and_then(|i| self.params.get_mut(i))
            .ok_or_else(|| {
                EngineError::failed(format!("parameter index {} out of range", param.index))
            })?;
        *slot = Some(parameter_value(param)?);
        Ok(())
    }

    fn reset_params(&mut self) -> Result<(), EngineError> {
        self.params.iter_mut().for_each(|p| *p = None);
        Ok(())
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        self.first = None;
        self.counts = CountInfo::default();
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(EngineError::failed("no statement prepared"));
        };
        if let Err(err) = cursor.start(&self.params) {
            return Err(self.engine_error(err));
        }
        if cursor.produces_rows() {
            self.first = self.step()?;
        } else {
            self.step()?;
            let changed = i64::try_from(self.conn.changes()).unwrap_or(i64::MAX);
            self.counts.rows_matched_min = changed;
            self.counts.rows_matched_max = changed;
        }
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<ResultSet>, EngineError> {
        let row = self.next_row()?;
        if row.is_some() {
            self.counts.rows_returned_min += 1;
            self.counts.rows_returned_max += 1;
        }
        Ok(row)
    }

    fn skip(&mut self, n: i32) -> Result<(), EngineError> {
        for _ in 0..n.max(0) {
            if self.next_row()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.first = None;
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.finish();
        }
        Ok(())
    }

    fn counts(&mut self) -> Result<CountInfo, EngineError> {
        Ok(self.counts)
    }

    /// Runs `PRAGMA name = value` and reads the pragma back.
    fn set_property(&mut self, name: &str, value: &str) -> Result<Option<String>, EngineError> {
        if !is_property_name(name) {
            return Err(EngineError::failed(format!("invalid property name '{name}'")));
        }
        let result = match value.trim().parse::<i64>() {
            Ok(n) => self.conn.pragma_update(None, name, n),
            Err(_) => self.conn.pragma_update(None, name, value),
        };
        result.map_err(|e| self.engine_error(e))?;

        match self
            .conn
            .pragma_query_value(None, name, |row| row.get::<_, Value>(0))
        {
            Ok(v) => Ok(value_text(&v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(self.engine_error(e)),
        }
    }

    fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

#[cfg(test)]
mod tests {
    use forkdb_core::{CancelEpoch, ColumnType, Engine};
    use forkdb_test_utils::{FIXTURE_COLUMNS, FIXTURE_ROWS, Fixture};

    use super::*;
    use crate::SqliteEngine;

    fn open(fixture: &Fixture) -> SqliteSession {
        SqliteEngine::default()
            .open(&fixture.path_str(), Interrupt::never())
            .expect("open")
    }

    fn drain(s: &mut SqliteSession) -> Vec<ResultSet> {
        let mut out = Vec::new();
        while let Some(row) = s.fetch().expect("fetch") {
            out.push(row);
        }
        out
    }

    #[test]
    fn select_returns_fixture_rows() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        s.prepare("select * from T").expect("prepare");
        s.execute().expect("execute");
        let rows = drain(&mut s);
        assert_eq!(rows.len(), FIXTURE_ROWS);
        assert_eq!(rows[0].names().collect::<Vec<_>>(), FIXTURE_COLUMNS);

        let first = &rows[0];
        assert_eq!(first.columns[0].column_type(), Some(ColumnType::Int64));
        assert_eq!(first.columns[1].column_type(), Some(ColumnType::Char));
        assert_eq!(first.columns[1].data, b"row-1");
        assert_eq!(first.columns[2].column_type(), Some(ColumnType::Float64));
        assert_eq!(first.columns[3].column_type(), Some(ColumnType::Byte));

        let last = &rows[FIXTURE_ROWS - 1];
        assert_eq!(last.columns[3].column_type(), Some(ColumnType::Null));
        assert_eq!(last.columns[3].count, 0);

        let counts = s.counts().expect("counts");
        assert_eq!(counts.rows_matched_max, FIXTURE_ROWS as i64);
        assert_eq!(counts.rows_returned_max, FIXTURE_ROWS as i64);
    }

    #[test]
    fn bound_parameters_filter_rows() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        s.prepare("select name from T where id > ? and name <> ?")
            .expect("prepare");
        s.bind(&Parameter::integer(0, 2)).expect("bind");
        s.bind(&Parameter::text(1, "row-4")).expect("bind");
        s.execute().expect("execute");
        let names: Vec<Vec<u8>> = drain(&mut s)
            .into_iter()
            .map(|r| r.columns[0].data.clone())
            .collect();
        assert_eq!(names, [b"row-3".to_vec(), b"row-5".to_vec()]);

        assert!(s.bind(&Parameter::integer(5, 1)).is_err());
    }

    #[test]
    fn reset_params_binds_null() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        s.prepare("select ? is null").expect("prepare");
        s.bind(&Parameter::integer(0, 1)).expect("bind");
        s.reset_params().expect("reset");
        s.execute().expect("execute");
        let row = s.fetch().expect("fetch").expect("row");
        assert_eq!(row.columns[0].data, 1i64.to_le_bytes());
    }

    #[test]
    fn dml_reports_changed_rows() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        s.prepare("update T set score = 0 where id <= 3").expect("prepare");
        s.execute().expect("execute");
        assert!(s.fetch().expect("fetch").is_none());
        assert_eq!(s.counts().expect("counts").rows_matched_max, 3);
    }

    #[test]
    fn skip_and_flush_drop_pending_rows() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        s.prepare("select id from T order by id").expect("prepare");
        s.execute().expect("execute");
        s.skip(3).expect("skip");
        let row = s.fetch().expect("fetch").expect("row");
        assert_eq!(row.columns[0].data, 4i64.to_le_bytes());
        s.flush().expect("flush");
        assert!(s.fetch().expect("fetch").is_none());
    }

    #[test]
    fn first_rows_arrive_without_running_the_whole_query() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        // Unbounded: only lazy stepping can return from this.
        s.prepare(
            "with recursive n(i) as (select 1 union all select i + 1 from n) select i from n",
        )
        .expect("prepare");
        s.execute().expect("execute");
        s.skip(2).expect("skip");
        let row = s.fetch().expect("fetch").expect("row");
        assert_eq!(row.columns[0].data, 3i64.to_le_bytes());

        let counts = s.counts().expect("counts");
        assert_eq!(counts.rows_matched_max, 3);
        assert_eq!(counts.rows_returned_max, 1);

        s.flush().expect("flush");
        assert!(s.fetch().expect("fetch").is_none());
    }

    #[test]
    fn row_error_surfaces_on_the_fetch_that_reaches_it() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        // Only the row with id = 2 reaches abs(i64::MIN).
        s.prepare("select id, abs(id - 2 - 9223372036854775807 - 1) from T order by id")
            .expect("prepare");
        s.execute().expect("execute");
        let first = s.fetch().expect("first row").expect("row");
        assert_eq!(first.columns[0].data, 1i64.to_le_bytes());

        match s.fetch() {
            Err(EngineError::Failed(message)) => assert!(message.contains("overflow"), "{message}"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(s.fetch().expect("fetch").is_none());

        // The statement runs again from the top.
        s.execute().expect("execute");
        assert!(s.fetch().expect("fetch").is_some());
    }

    #[test]
    fn raised_interrupt_stops_fetching() {
        let fixture = Fixture::new().expect("fixture");
        let epoch = CancelEpoch::new();
        let mut s = SqliteEngine::default()
            .open(&fixture.path_str(), Interrupt::new(epoch.clone()))
            .expect("open");
        s.prepare("select * from T").expect("prepare");
        s.execute().expect("execute");
        assert!(s.fetch().expect("fetch").is_some());

        epoch.bump();
        assert!(matches!(s.fetch(), Err(EngineError::Interrupted)));
        assert!(matches!(s.skip(1), Err(EngineError::Interrupted)));
    }

    #[test]
    fn multiple_statements_are_rejected() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        assert!(s.prepare("select 1; select 2").is_err());
        s.prepare("select 1;").expect("trailing separator");
    }

    #[test]
    fn bad_sql_fails_with_engine_message() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        match s.prepare("select * from missing") {
            Err(EngineError::Failed(message)) => assert!(message.contains("no such table")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(s.execute().is_err());
    }

    #[test]
    fn set_property_reads_back_pragma() {
        let fixture = Fixture::new().expect("fixture");
        let mut s = open(&fixture);
        let value = s.set_property("cache_size", "-4000").expect("pragma");
        assert_eq!(value.as_deref(), Some("-4000"));
        assert!(s.set_property("cache_size; drop table T", "1").is_err());
    }

    #[test]
    fn raised_interrupt_cancels_long_statement() {
        let fixture = Fixture::new().expect("fixture");
        let epoch = CancelEpoch::new();
        let mut s = SqliteEngine::default()
            .open(&fixture.path_str(), Interrupt::new(epoch.clone()))
            .expect("open");
        s.prepare(
            "with recursive n(i) as (select 1 union all select i + 1 from n) \
             select count(*) from n",
        )
        .expect("prepare");
        epoch.bump();
        assert!(matches!(s.execute(), Err(EngineError::Interrupted)));

        s.interrupt().refresh();
        s.prepare("select 1").expect("prepare");
        s.execute().expect("runs after refresh");
    }
}
