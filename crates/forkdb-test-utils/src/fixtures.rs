// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixture SQLite databases in temporary directories.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::TempDir;

/// Column names of table `T`, in declaration order.
pub const FIXTURE_COLUMNS: [&str; 4] = ["id", "name", "score", "payload"];

/// Number of rows in table `T`.
pub const FIXTURE_ROWS: usize = 5;

/// A database file holding table `T` with [`FIXTURE_ROWS`] known rows.
///
/// Row `i` (1-based) is `(i, "row-i", i * 1.5, x'00..i')`; the last row has
/// a NULL payload. The directory is removed when the fixture is dropped.
pub struct Fixture {
    _dir: TempDir,
    path: PathBuf,
}

impl Fixture {
    pub fn new() -> rusqlite::Result<Self> {
        Self::with_sql("")
    }

    /// Like [`Fixture::new`], then runs `extra` as a batch.
    pub fn with_sql(extra: &str) -> rusqlite::Result<Self> {
        let dir = tempfile::tempdir().map_err(|e| {
            rusqlite::Error::InvalidPath(PathBuf::from(format!("tempdir: {e}")))
        })?;
        let path = dir.path().join("fixture.db");
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE T (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, payload BLOB);",
        )?;
        for i in 1..=FIXTURE_ROWS as i64 {
            let payload: Option<Vec<u8>> =
                (i < FIXTURE_ROWS as i64).then(|| (0..i as u8).collect());
            conn.execute(
                "INSERT INTO T (id, name, score, payload) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![i, format!("row-{i}"), i as f64 * 1.5, payload],
            )?;
        }
        if !extra.is_empty() {
            conn.execute_batch(extra)?;
        }
        tracing::debug!(path = %path.display(), "fixture database created");
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as the string handed to `open`.
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// A sibling path in the same temporary directory.
    pub fn sibling(&self, name: &str) -> String {
        self.path
            .with_file_name(name)
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_has_known_rows() {
        let fixture = Fixture::new().expect("fixture");
        let conn = Connection::open(fixture.path()).expect("open");
        let count: i64 = conn
            .query_row("SELECT count(*) FROM T", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count as usize, FIXTURE_ROWS);

        let stmt = conn.prepare("SELECT * FROM T").expect("prepare");
        assert_eq!(stmt.column_names(), FIXTURE_COLUMNS);
    }

    #[test]
    fn extra_sql_runs_after_seed() {
        let fixture = Fixture::with_sql("CREATE TABLE U (v TEXT);").expect("fixture");
        let conn = Connection::open(fixture.path()).expect("open");
        conn.execute("INSERT INTO U VALUES ('x')", []).expect("insert");
    }
}
