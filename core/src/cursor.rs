use crate::definitions::ColumnType;
use crate::error::{misuse, Error, Result};
use crate::stmt::{StatementHandle, StepResult};
use crate::value::Value;
use std::time::Instant;

/// A forward-only view over a statement's result rows.
///
/// The cursor borrows the cached statement it reads from, so the owning
/// connection cannot be used for anything else while the cursor is live.
/// Dropping the cursor resets the statement and clears its bindings, on every
/// exit path. Column indices are 0-based.
pub struct Cursor<'stmt> {
    stmt: &'stmt mut StatementHandle,
    poisoned: &'stmt mut bool,
    deadline: Instant,
    on_row: bool,
    done: bool,
}

impl<'stmt> Cursor<'stmt> {
    pub(crate) fn new(
        stmt: &'stmt mut StatementHandle,
        poisoned: &'stmt mut bool,
        deadline: Instant,
    ) -> Self {
        Cursor {
            stmt,
            poisoned,
            deadline,
            on_row: false,
            done: false,
        }
    }

    /// Advances to the next row. Returns false once the result set is
    /// exhausted; further calls keep returning false.
    pub fn move_to_next(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        match self.stmt.step(self.deadline) {
            Ok(StepResult::Row) => {
                self.on_row = true;
                Ok(true)
            }
            Ok(StepResult::Done) => {
                self.on_row = false;
                self.done = true;
                Ok(false)
            }
            Err(error) => {
                if error.is_fatal() {
                    *self.poisoned = true;
                }
                self.on_row = false;
                self.done = true;
                Err(error)
            }
        }
    }

    pub fn column_count(&self) -> usize {
        self.stmt.column_count()
    }

    pub fn column_name(&self, index: usize) -> Option<String> {
        self.stmt.column_name(index)
    }

    pub fn column_type(&self, index: usize) -> Result<ColumnType> {
        self.check_position(index)?;
        Ok(self.stmt.column_type(index))
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.column_type(index)? == ColumnType::Null)
    }

    pub fn get_long(&self, index: usize) -> Result<i64> {
        self.check_position(index)?;
        Ok(self.stmt.column_int64(index))
    }

    pub fn get_double(&self, index: usize) -> Result<f64> {
        self.check_position(index)?;
        Ok(self.stmt.column_double(index))
    }

    pub fn get_string(&self, index: usize) -> Result<String> {
        self.check_position(index)?;
        Ok(self.stmt.column_text(index))
    }

    pub fn get_blob(&self, index: usize) -> Result<Vec<u8>> {
        self.check_position(index)?;
        Ok(self.stmt.column_blob(index))
    }

    pub fn get_value(&self, index: usize) -> Result<Value> {
        self.check_position(index)?;
        Ok(self.stmt.column_value(index))
    }

    fn check_position(&self, index: usize) -> Result<()> {
        if !self.on_row {
            return Err(Error::InvalidCursorState);
        }
        if index >= self.column_count() {
            return Err(misuse(format!(
                "column index {index} is out of range 0..{}",
                self.column_count()
            )));
        }
        Ok(())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.stmt.reset();
        self.stmt.clear_bindings();
    }
}
