// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock database engine for deterministic testing.
//!
//! `MockEngine` implements `Engine` over statements registered up front,
//! enabling fast tests of the command loop and worker supervision without a
//! real database. A few built-in statements cover the cases every test needs:
//!
//! - `select path` returns one row holding the session's path
//! - `select pid` returns one row holding the serving process id
//! - `select params` echoes the bound parameters, one column each
//! - `show <name>` returns the last value set for property `<name>`
//! - `spin` blocks until the session is interrupted
//! - any statement starting with `fail` prepares fine and fails on execute
//!
//! Anything else fails to prepare with "no such table".

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use forkdb_core::{
    Column, ColumnType, CountInfo, Engine, EngineError, InputType, Interrupt, Parameter,
    ResultSet, Session,
};

/// Upper bound on how long `spin` waits for an interrupt.
const SPIN_LIMIT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct MockState {
    opened: AtomicUsize,
    failing_paths: Mutex<HashSet<String>>,
    statements: Mutex<HashMap<String, Vec<ResultSet>>>,
}

/// A mock engine whose sessions replay registered rows.
///
/// Clones share state, so a test can keep a clone to inspect what the
/// engine under test did.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    /// Create a mock engine with no registered statements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rows `sql` produces. Builder form of [`Self::add_rows`].
    pub fn with_rows(self, sql: &str, rows: Vec<ResultSet>) -> Self {
        self.add_rows(sql, rows);
        self
    }

    pub fn add_rows(&self, sql: &str, rows: Vec<ResultSet>) {
        if let Ok(mut statements) = self.state.statements.lock() {
            statements.insert(sql.to_string(), rows);
        }
    }

    /// Make every later open of `path` fail.
    pub fn fail_open(&self, path: &str) {
        if let Ok(mut paths) = self.state.failing_paths.lock() {
            paths.insert(path.to_string());
        }
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    fn registered(&self, sql: &str) -> Option<Vec<ResultSet>> {
        self.state.statements.lock().ok()?.get(sql).cloned()
    }
}

impl Engine for MockEngine {
    type Session = MockSession;

    fn name(&self) -> &str {
        "mock"
    }

    fn open(&self, path: &str, interrupt: Interrupt) -> Result<MockSession, EngineError> {
        let failing = self
            .state
            .failing_paths
            .lock()
            .map(|p| p.contains(path))
            .unwrap_or(false);
        if failing {
            return Err(EngineError::failed(format!("unable to open database: {path}")));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path, "mock session opened");
        Ok(MockSession {
            engine: self.clone(),
            path: path.to_string(),
            interrupt,
            statement: None,
            params: Vec::new(),
            pending: VecDeque::new(),
            counts: CountInfo::default(),
            properties: HashMap::new(),
        })
    }
}

/// Session produced by [`MockEngine`].
pub struct MockSession {
    engine: MockEngine,
    path: String,
    interrupt: Interrupt,
    statement: Option<String>,
    params: Vec<Parameter>,
    pending: VecDeque<ResultSet>,
    counts: CountInfo,
    properties: HashMap<String, String>,
}

impl MockSession {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    fn is_builtin(sql: &str) -> bool {
        matches!(sql, "select path" | "select pid" | "select params" | "spin")
            || sql.starts_with("show ")
            || sql.starts_with("fail")
    }

    fn run(&self, sql: &str) -> Result<Vec<ResultSet>, EngineError> {
        if let Some(rows) = self.engine.registered(sql) {
            return Ok(rows);
        }
        match sql {
            "select path" => Ok(vec![ResultSet::new(vec![text_column("path", &self.path)])]),
            "select pid" => Ok(vec![ResultSet::new(vec![int_column(
                "pid",
                i64::from(std::process::id()),
            )])]),
            "select params" => Ok(vec![ResultSet::new(
                self.params.iter().map(echo_column).collect(),
            )]),
            "spin" => {
                let start = Instant::now();
                while start.elapsed() < SPIN_LIMIT {
                    if self.interrupt.is_raised() {
                        return Err(EngineError::Interrupted);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(EngineError::failed("spin was never interrupted"))
            }
            _ if sql.starts_with("show ") => {
                let name = sql.trim_start_matches("show ").trim();
                let column = match self.properties.get(name) {
                    Some(value) => text_column(name, value),
                    None => Column::null(name),
                };
                Ok(vec![ResultSet::new(vec![column])])
            }
            _ => Err(EngineError::failed(format!("mock failure: {sql}"))),
        }
    }
}

impl Session for MockSession {
    fn prepare(&mut self, sql: &str) -> Result<(), EngineError> {
        self.pending.clear();
        self.counts = CountInfo::default();
        let sql = sql.trim();
        if !Self::is_builtin(sql) && self.engine.registered(sql).is_none() {
            self.statement = None;
            return Err(EngineError::failed(format!("no such table in: {sql}")));
        }
        self.statement = Some(sql.to_string());
        Ok(())
    }

    fn bind(&mut self, param: &Parameter) -> Result<(), EngineError> {
        if param.index < 0 {
            return Err(EngineError::failed(format!(
                "parameter index {} out of range",
                param.index
            )));
        }
        self.params.retain(|p| p.index != param.index);
        self.params.push(param.clone());
        self.params.sort_by_key(|p| p.index);
        Ok(())
    }

    fn reset_params(&mut self) -> Result<(), EngineError> {
        self.params.clear();
        Ok(())
    }

    fn execute(&mut self) -> Result<(), EngineError> {
        let Some(sql) = self.statement.clone() else {
            return Err(EngineError::failed("no statement prepared"));
        };
        let rows = self.run(&sql)?;
        let total = rows.len() as i64;
        self.counts = CountInfo {
            rows_matched_min: total,
            rows_matched_max: total,
            ..CountInfo::default()
        };
        self.pending = rows.into();
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<ResultSet>, EngineError> {
        if self.interrupt.is_raised() {
            return Err(EngineError::Interrupted);
        }
        let row = self.pending.pop_front();
        if row.is_some() {
            self.counts.rows_returned_min += 1;
            self.counts.rows_returned_max += 1;
        }
        Ok(row)
    }

    fn skip(&mut self, n: i32) -> Result<(), EngineError> {
        let n = usize::try_from(n).unwrap_or(0).min(self.pending.len());
        self.pending.drain(..n);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.pending.clear();
        Ok(())
    }

    fn counts(&mut self) -> Result<CountInfo, EngineError> {
        Ok(self.counts)
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<Option<String>, EngineError> {
        if name.is_empty() {
            return Err(EngineError::failed("empty property name"));
        }
        self.properties.insert(name.to_string(), value.to_string());
        Ok(Some(value.to_string()))
    }

    fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }
}

/// A one-element `Int64` column.
pub fn int_column(name: &str, value: i64) -> Column {
    Column::new(name, ColumnType::Int64, 1, value.to_le_bytes().to_vec())
}

/// A `Char` column holding `text`.
pub fn text_column(name: &str, text: &str) -> Column {
    Column::new(name, ColumnType::Char, text.len() as i32, text.as_bytes().to_vec())
}

/// A `Byte` column holding `bytes`.
pub fn blob_column(name: &str, bytes: &[u8]) -> Column {
    Column::new(name, ColumnType::Byte, bytes.len() as i32, bytes.to_vec())
}

fn echo_column(param: &Parameter) -> Column {
    let name = format!("p{}", param.index);
    match param.input_type {
        InputType::Null => Column::null(name),
        InputType::Char => Column::new(
            name,
            ColumnType::Char,
            param.data.len() as i32,
            param.data.clone(),
        ),
        InputType::Integer => Column::new(name, ColumnType::Int64, 1, param.data.clone()),
        InputType::Double => Column::new(name, ColumnType::Float64, 1, param.data.clone()),
        InputType::Binary => Column::new(
            name,
            ColumnType::Byte,
            param.data.len() as i32,
            param.data.clone(),
        ),
    }
}
