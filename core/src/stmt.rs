use crate::backoff;
use crate::classify::parse_named_parameters;
use crate::definitions::ColumnType;
use crate::error::{misuse, Result, SqliteError};
use crate::raw::RawConnection;
use crate::value::Value;
use libsqlite3_sys::{
    sqlite3_bind_blob64, sqlite3_bind_double, sqlite3_bind_int64, sqlite3_bind_null,
    sqlite3_bind_parameter_count, sqlite3_bind_text64, sqlite3_clear_bindings,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count, sqlite3_column_double,
    sqlite3_column_int64, sqlite3_column_name, sqlite3_column_text, sqlite3_column_type,
    sqlite3_db_handle, sqlite3_errmsg, sqlite3_extended_errcode, sqlite3_finalize,
    sqlite3_prepare_v3, sqlite3_reset, sqlite3_step, sqlite3_stmt, sqlite3_stmt_busy,
    sqlite3_stmt_readonly, SQLITE_BUSY, SQLITE_DONE, SQLITE_OK, SQLITE_PREPARE_PERSISTENT,
    SQLITE_ROW, SQLITE_TRANSIENT, SQLITE_UTF8,
};
use num_traits::FromPrimitive;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A row is available for reading.
    Row,
    /// The statement has run to completion.
    Done,
}

/// An owned prepared statement.
///
/// The wrapper caches the parameter count and read-only flag reported by the
/// engine at prepare time, and lazily derives the named-parameter map from the
/// statement text on the first bind by name. Finalization happens at most
/// once, on eviction from the cache, on connection close, or on drop.
#[derive(Debug)]
pub struct StatementHandle {
    stmt: *mut sqlite3_stmt,
    sql: String,
    parameter_count: usize,
    read_only: bool,
    named: Option<HashMap<String, usize>>,
}

unsafe impl Send for StatementHandle {}

impl StatementHandle {
    pub(crate) fn prepare(db: &RawConnection, sql: &str, persistent: bool) -> Result<Self> {
        let flags = if persistent {
            SQLITE_PREPARE_PERSISTENT
        } else {
            0
        };
        let mut stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        let byte_length = c_int::try_from(sql.len())
            .map_err(|_| misuse("statement text is too large to prepare"))?;
        let rc = unsafe {
            sqlite3_prepare_v3(
                db.as_ptr(),
                sql.as_ptr().cast::<c_char>(),
                byte_length,
                flags,
                &mut stmt,
                &mut tail,
            )
        };
        if rc != SQLITE_OK {
            return Err(db.last_error("unable to prepare statement").into());
        }
        if stmt.is_null() {
            // Comments and whitespace prepare successfully to nothing.
            return Err(misuse("statement text contains no statement"));
        }
        let parameter_count =
            usize::try_from(unsafe { sqlite3_bind_parameter_count(stmt) }).unwrap_or(0);
        let read_only = unsafe { sqlite3_stmt_readonly(stmt) } != 0;
        Ok(StatementHandle {
            stmt,
            sql: sql.to_owned(),
            parameter_count,
            read_only,
            named: None,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn is_busy(&self) -> bool {
        !self.stmt.is_null() && unsafe { sqlite3_stmt_busy(self.stmt) } != 0
    }

    pub fn column_count(&self) -> usize {
        usize::try_from(unsafe { sqlite3_column_count(self.stmt) }).unwrap_or(0)
    }

    pub fn column_name(&self, index: usize) -> Option<String> {
        if index >= self.column_count() {
            return None;
        }
        let name = unsafe { sqlite3_column_name(self.stmt, index_to_int(index)) };
        if name.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
    }

    /// Binds one value at a 1-based position.
    pub fn bind(&mut self, index: usize, value: &Value) -> Result<()> {
        if self.stmt.is_null() {
            return Err(misuse("statement has been finalized"));
        }
        if index == 0 || index > self.parameter_count {
            return Err(misuse(format!(
                "bind index {index} is out of range 1..={}",
                self.parameter_count
            )));
        }
        let position = index_to_int(index);
        let rc = unsafe {
            match value {
                Value::Null => sqlite3_bind_null(self.stmt, position),
                Value::Integer(value) => sqlite3_bind_int64(self.stmt, position, *value),
                Value::Real(value) => sqlite3_bind_double(self.stmt, position, *value),
                Value::Text(value) => sqlite3_bind_text64(
                    self.stmt,
                    position,
                    value.as_ptr().cast::<c_char>(),
                    value.len() as u64,
                    SQLITE_TRANSIENT(),
                    SQLITE_UTF8 as u8,
                ),
                Value::Blob(value) => sqlite3_bind_blob64(
                    self.stmt,
                    position,
                    value.as_ptr().cast(),
                    value.len() as u64,
                    SQLITE_TRANSIENT(),
                ),
            }
        };
        if rc != SQLITE_OK {
            return Err(self.last_error("unable to bind argument").into());
        }
        Ok(())
    }

    /// Binds by name, resolving the name (sigil included) through the
    /// named-parameter map derived from the statement text.
    pub fn bind_named(&mut self, name: &str, value: &Value) -> Result<()> {
        if self.named.is_none() {
            self.named = Some(parse_named_parameters(&self.sql));
        }
        let position = self
            .named
            .as_ref()
            .and_then(|map| map.get(name).copied())
            .ok_or_else(|| misuse(format!("no parameter named {name}")))?;
        self.bind(position, value)
    }

    pub fn bind_all(&mut self, args: &[Value]) -> Result<()> {
        for (offset, value) in args.iter().enumerate() {
            self.bind(offset + 1, value)?;
        }
        Ok(())
    }

    /// Drives the statement one step, retrying BUSY results until the
    /// absolute deadline.
    pub fn step(&mut self, deadline: Instant) -> Result<StepResult> {
        if self.stmt.is_null() {
            return Err(misuse("statement has been finalized"));
        }
        let stmt = self.stmt;
        match backoff::retry(deadline, || unsafe { sqlite3_step(stmt) }) {
            Ok(SQLITE_ROW) => Ok(StepResult::Row),
            Ok(SQLITE_DONE) => Ok(StepResult::Done),
            Ok(_) => Err(self.last_error("unable to step statement").into()),
            Err(()) => {
                let extended = unsafe { sqlite3_extended_errcode(sqlite3_db_handle(self.stmt)) };
                Err(SqliteError::new(SQLITE_BUSY, extended, "busy timeout expired").into())
            }
        }
    }

    /// Returns the statement to its pre-step state. Safe to call at any time;
    /// a failure here only replays the error the last step already reported.
    pub fn reset(&mut self) {
        if !self.stmt.is_null() {
            unsafe { sqlite3_reset(self.stmt) };
        }
    }

    pub fn clear_bindings(&mut self) {
        if !self.stmt.is_null() {
            unsafe { sqlite3_clear_bindings(self.stmt) };
        }
    }

    pub fn column_type(&self, index: usize) -> ColumnType {
        ColumnType::from_i32(unsafe { sqlite3_column_type(self.stmt, index_to_int(index)) })
            .unwrap_or(ColumnType::Null)
    }

    pub fn column_int64(&self, index: usize) -> i64 {
        unsafe { sqlite3_column_int64(self.stmt, index_to_int(index)) }
    }

    pub fn column_double(&self, index: usize) -> f64 {
        unsafe { sqlite3_column_double(self.stmt, index_to_int(index)) }
    }

    pub fn column_text(&self, index: usize) -> String {
        let position = index_to_int(index);
        unsafe {
            let text = sqlite3_column_text(self.stmt, position);
            if text.is_null() {
                return String::new();
            }
            let length = usize::try_from(sqlite3_column_bytes(self.stmt, position)).unwrap_or(0);
            let bytes = std::slice::from_raw_parts(text, length);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }

    pub fn column_blob(&self, index: usize) -> Vec<u8> {
        let position = index_to_int(index);
        unsafe {
            let blob = sqlite3_column_blob(self.stmt, position);
            if blob.is_null() {
                return Vec::new();
            }
            let length = usize::try_from(sqlite3_column_bytes(self.stmt, position)).unwrap_or(0);
            std::slice::from_raw_parts(blob.cast::<u8>(), length).to_vec()
        }
    }

    pub fn column_value(&self, index: usize) -> Value {
        match self.column_type(index) {
            ColumnType::Integer => Value::Integer(self.column_int64(index)),
            ColumnType::Float => Value::Real(self.column_double(index)),
            ColumnType::Text => Value::Text(self.column_text(index)),
            ColumnType::Blob => Value::Blob(self.column_blob(index)),
            ColumnType::Null => Value::Null,
        }
    }

    /// Finalizes the native statement. Idempotent.
    pub fn close(&mut self) {
        if self.stmt.is_null() {
            return;
        }
        let rc = unsafe { sqlite3_finalize(self.stmt) };
        self.stmt = ptr::null_mut();
        if rc != SQLITE_OK {
            // Finalize replays the last step error; the statement is freed
            // regardless.
            log::trace!("statement finalized with code {rc}: {}", self.sql);
        }
    }

    fn last_error(&self, fallback: &str) -> SqliteError {
        unsafe {
            let db = sqlite3_db_handle(self.stmt);
            let primary = libsqlite3_sys::sqlite3_errcode(db);
            let extended = sqlite3_extended_errcode(db);
            let message = sqlite3_errmsg(db);
            let message = if message.is_null() {
                fallback.to_owned()
            } else {
                CStr::from_ptr(message).to_string_lossy().into_owned()
            };
            SqliteError::new(primary, extended, message)
        }
    }
}

impl Drop for StatementHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn index_to_int(index: usize) -> c_int {
    c_int::try_from(index).unwrap_or(c_int::MAX)
}
