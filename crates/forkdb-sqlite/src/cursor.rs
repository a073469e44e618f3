// SPDX-FileCopyrightText: 2026 Forkdb Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A prepared statement stepped one row per call.
//!
//! rusqlite rewinds a statement as soon as its row iterator is dropped, so a
//! statement that has to stay positioned between two `fetch` calls is driven
//! through the C API. The cursor uses its connection's handle without owning
//! it; the owner drops the cursor first.

use std::ffi::{CStr, c_int};
use std::ptr::{self, NonNull};
use std::slice;

use forkdb_core::ResultSet;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ffi};

use crate::convert::{bind_length, value_column};

pub(crate) struct Cursor {
    db: NonNull<ffi::sqlite3>,
    stmt: NonNull<ffi::sqlite3_stmt>,
    names: Vec<String>,
    exhausted: bool,
}

// SAFETY: the statement moves between threads together with its connection,
// inside one session, and is only used through `&mut`.
unsafe impl Send for Cursor {}

impl Cursor {
    /// Compiles the single statement in `sql`.
    ///
    /// # Safety
    ///
    /// The cursor must be dropped before `conn`.
    pub(crate) unsafe fn prepare(conn: &Connection, sql: &str) -> rusqlite::Result<Self> {
        // SAFETY: the handle is only used while the caller keeps `conn` open.
        let db = unsafe { conn.handle() };
        let db =
            NonNull::new(db).ok_or_else(|| failure(ffi::SQLITE_MISUSE, "connection is closed"))?;
        let len = c_int::try_from(sql.len())
            .map_err(|_| failure(ffi::SQLITE_TOOBIG, "statement text is too long"))?;

        let mut raw = ptr::null_mut();
        let mut tail = ptr::null();
        // SAFETY: `sql` is valid for `len` bytes for the duration of the call.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(db.as_ptr(), sql.as_ptr().cast(), len, &mut raw, &mut tail)
        };
        if rc != ffi::SQLITE_OK {
            return Err(last_error(db, rc));
        }
        let Some(stmt) = NonNull::new(raw) else {
            return Err(failure(ffi::SQLITE_MISUSE, "statement is empty"));
        };
        let mut cursor = Self {
            db,
            stmt,
            names: Vec::new(),
            exhausted: true,
        };

        let consumed = (tail as usize).saturating_sub(sql.as_ptr() as usize);
        let rest = sql.get(consumed..).unwrap_or_default();
        if !rest.trim_matches(|c: char| c == ';' || c.is_whitespace()).is_empty() {
            return Err(rusqlite::Error::MultipleStatement);
        }

        // SAFETY: `stmt` is live.
        let count = unsafe { ffi::sqlite3_column_count(stmt.as_ptr()) };
        for col in 0..count {
            // SAFETY: `col` is below the column count; the name is copied at once.
            let name = unsafe { ffi::sqlite3_column_name(stmt.as_ptr(), col) };
            if name.is_null() {
                return Err(failure(ffi::SQLITE_NOMEM, "out of memory reading column names"));
            }
            // SAFETY: non-null names are NUL-terminated.
            let name = unsafe { CStr::from_ptr(name) };
            cursor.names.push(name.to_string_lossy().into_owned());
        }
        Ok(cursor)
    }

    pub(crate) fn parameter_count(&self) -> usize {
        // SAFETY: `stmt` is live.
        let n = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt.as_ptr()) };
        usize::try_from(n).unwrap_or(0)
    }

    /// Whether the statement yields rows (a query, or DML with `RETURNING`).
    pub(crate) fn produces_rows(&self) -> bool {
        !self.names.is_empty()
    }

    /// Rewinds the statement and binds `params` in order; unset entries bind
    /// NULL.
    pub(crate) fn start(&mut self, params: &[Option<Value>]) -> rusqlite::Result<()> {
        let stmt = self.stmt.as_ptr();
        // SAFETY: `stmt` is live. The reset code only repeats the previous
        // step's outcome, which was already reported.
        unsafe {
            ffi::sqlite3_reset(stmt);
            ffi::sqlite3_clear_bindings(stmt);
        }
        self.exhausted = true;

        for (i, value) in params.iter().enumerate() {
            let index = c_int::try_from(i + 1)
                .map_err(|_| failure(ffi::SQLITE_RANGE, "too many parameters"))?;
            let rc = match value.as_ref().unwrap_or(&Value::Null) {
                // SAFETY (all arms): `stmt` is live and `index` is 1-based;
                // SQLITE_TRANSIENT makes SQLite copy text and blobs.
                Value::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },
                Value::Integer(v) => unsafe { ffi::sqlite3_bind_int64(stmt, index, *v) },
                Value::Real(v) => unsafe { ffi::sqlite3_bind_double(stmt, index, *v) },
                Value::Text(text) if text.is_empty() => unsafe {
                    ffi::sqlite3_bind_text(stmt, index, c"".as_ptr(), 0, ffi::SQLITE_TRANSIENT())
                },
                Value::Text(text) => {
                    let len = bind_length(i, text.len())?;
                    unsafe {
                        ffi::sqlite3_bind_text(
                            stmt,
                            index,
                            text.as_ptr().cast(),
                            len,
                            ffi::SQLITE_TRANSIENT(),
                        )
                    }
                }
                Value::Blob(bytes) if bytes.is_empty() => unsafe {
                    ffi::sqlite3_bind_zeroblob(stmt, index, 0)
                },
                Value::Blob(bytes) => {
                    let len = bind_length(i, bytes.len())?;
                    unsafe {
                        ffi::sqlite3_bind_blob(
                            stmt,
                            index,
                            bytes.as_ptr().cast(),
                            len,
                            ffi::SQLITE_TRANSIENT(),
                        )
                    }
                }
            };
            if rc != ffi::SQLITE_OK {
                return Err(last_error(self.db, rc));
            }
        }
        self.exhausted = false;
        Ok(())
    }

    /// Steps to the next row; `None` once the statement has run to completion.
    ///
    /// After an error the cursor reports no further rows until restarted.
    pub(crate) fn next_row(&mut self) -> rusqlite::Result<Option<ResultSet>> {
        if self.exhausted {
            return Ok(None);
        }
        // SAFETY: `stmt` is live and was started.
        let rc = unsafe { ffi::sqlite3_step(self.stmt.as_ptr()) };
        let row = match rc {
            ffi::SQLITE_ROW => self.read_row().map(Some),
            ffi::SQLITE_DONE => Ok(None),
            rc => Err(last_error(self.db, rc)),
        };
        if !matches!(row, Ok(Some(_))) {
            self.exhausted = true;
        }
        row
    }

    /// Drops the pending rows. The statement stays compiled for the next
    /// `start`.
    pub(crate) fn finish(&mut self) {
        // SAFETY: `stmt` is live.
        unsafe { ffi::sqlite3_reset(self.stmt.as_ptr()) };
        self.exhausted = true;
    }

    fn read_row(&self) -> rusqlite::Result<ResultSet> {
        let mut columns = Vec::with_capacity(self.names.len());
        for (col, name) in (0..).zip(&self.names) {
            // SAFETY: the statement sits on a row and `col` is below the
            // column count.
            let value = unsafe { self.column_ref(col)? };
            columns.push(value_column(name, value)?);
        }
        Ok(ResultSet::new(columns))
    }

    /// # Safety
    ///
    /// The statement must sit on a row and `col` must be below the column
    /// count.
    unsafe fn column_ref(&self, col: c_int) -> rusqlite::Result<ValueRef<'_>> {
        let stmt = self.stmt.as_ptr();
        // SAFETY: guaranteed by the caller. Text and blob pointers stay valid
        // until the next step, which needs `&mut self`.
        unsafe {
            match ffi::sqlite3_column_type(stmt, col) {
                ffi::SQLITE_NULL => Ok(ValueRef::Null),
                ffi::SQLITE_INTEGER => Ok(ValueRef::Integer(ffi::sqlite3_column_int64(stmt, col))),
                ffi::SQLITE_FLOAT => Ok(ValueRef::Real(ffi::sqlite3_column_double(stmt, col))),
                ffi::SQLITE_TEXT => {
                    let data = ffi::sqlite3_column_text(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col);
                    self.bytes(data, len).map(ValueRef::Text)
                }
                ffi::SQLITE_BLOB => {
                    let data = ffi::sqlite3_column_blob(stmt, col);
                    let len = ffi::sqlite3_column_bytes(stmt, col);
                    self.bytes(data.cast(), len).map(ValueRef::Blob)
                }
                other => Err(failure(
                    ffi::SQLITE_MISMATCH,
                    &format!("column {col} has unknown type {other}"),
                )),
            }
        }
    }

    /// # Safety
    ///
    /// `data` must be null or point at `len` bytes that stay valid while
    /// `self` is borrowed.
    unsafe fn bytes(&self, data: *const u8, len: c_int) -> rusqlite::Result<&[u8]> {
        let len = usize::try_from(len).unwrap_or(0);
        if len == 0 {
            return Ok(&[]);
        }
        if data.is_null() {
            return Err(last_error(self.db, ffi::SQLITE_NOMEM));
        }
        // SAFETY: guaranteed by the caller.
        Ok(unsafe { slice::from_raw_parts(data, len) })
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // SAFETY: `stmt` is live and never used again.
        unsafe { ffi::sqlite3_finalize(self.stmt.as_ptr()) };
    }
}

fn last_error(db: NonNull<ffi::sqlite3>, code: c_int) -> rusqlite::Error {
    // SAFETY: `db` is open; the message is copied before any other call.
    let message = unsafe {
        let raw = ffi::sqlite3_errmsg(db.as_ptr());
        (!raw.is_null()).then(|| CStr::from_ptr(raw).to_string_lossy().into_owned())
    };
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), message)
}

fn failure(code: c_int, message: &str) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some(message.to_string()))
}
