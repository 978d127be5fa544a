use crate::error::{misuse, Result, SqliteError};
use libsqlite3_sys::{
    sqlite3, sqlite3_busy_timeout, sqlite3_changes, sqlite3_close, sqlite3_errcode, sqlite3_errmsg,
    sqlite3_errstr, sqlite3_exec, sqlite3_extended_errcode, sqlite3_get_autocommit,
    sqlite3_last_insert_rowid, sqlite3_open_v2, SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_NOMUTEX,
    SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI,
};
use std::ffi::{CStr, CString};
use std::fmt::Write as _;
use std::os::raw::c_int;
use std::ptr::{self, NonNull};

/// An owned database handle. Exactly one `RawConnection` exists per native
/// handle; the pool's exclusive-lending discipline is what makes it sound to
/// open with NOMUTEX and to move the handle between threads.
#[derive(Debug)]
pub(crate) struct RawConnection {
    handle: NonNull<sqlite3>,
    closed: bool,
}

unsafe impl Send for RawConnection {}

impl RawConnection {
    pub(crate) fn open(path: &str, read_only: bool) -> Result<Self> {
        let path = CString::new(path).map_err(|_| misuse("database path contains a NUL byte"))?;
        let flags = if read_only {
            SQLITE_OPEN_READONLY | SQLITE_OPEN_NOMUTEX | SQLITE_OPEN_URI
        } else {
            SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE | SQLITE_OPEN_NOMUTEX | SQLITE_OPEN_URI
        };
        let mut handle = ptr::null_mut();
        let rc = unsafe { sqlite3_open_v2(path.as_ptr(), &mut handle, flags, ptr::null()) };
        if rc != SQLITE_OK {
            // The handle is usually allocated even on failure and carries the
            // error details; it must still be closed.
            let error = match NonNull::new(handle) {
                Some(handle) => {
                    let raw = RawConnection {
                        handle,
                        closed: false,
                    };
                    raw.last_error("unable to open database")
                }
                None => SqliteError::new(rc, -1, code_message(rc, "unable to open database")),
            };
            return Err(error.into());
        }
        let handle = NonNull::new(handle)
            .ok_or_else(|| SqliteError::new(rc, -1, "engine returned a null database handle"))?;
        Ok(RawConnection {
            handle,
            closed: false,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut sqlite3 {
        self.handle.as_ptr()
    }

    /// Applies the encryption key. Must run before any other statement on
    /// this handle. A 32-byte key is passed raw; anything else is a
    /// passphrase the cipher derives a key from.
    pub(crate) fn key(&self, key: &[u8]) -> Result<()> {
        let pragma = if key.len() == 32 {
            let mut hex = String::with_capacity(64);
            for byte in key {
                write!(hex, "{byte:02x}").expect("writing to a String");
            }
            format!("PRAGMA key = \"x'{hex}'\"")
        } else {
            let passphrase = String::from_utf8_lossy(key).replace('\'', "''");
            format!("PRAGMA key = '{passphrase}'")
        };
        self.exec(&pragma)
    }

    /// One-shot execution of statements that need no bindings and whose rows,
    /// if any, are discarded. Used for provisioning pragmas.
    pub(crate) fn exec(&self, sql: &str) -> Result<()> {
        let sql = CString::new(sql).map_err(|_| misuse("statement contains a NUL byte"))?;
        let rc = unsafe {
            sqlite3_exec(
                self.as_ptr(),
                sql.as_ptr(),
                None,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        self.check(rc, "unable to execute statement")
    }

    /// The retry loop owns all busy waiting, so the native handler is
    /// disabled outright.
    pub(crate) fn disable_native_busy_handler(&self) -> Result<()> {
        let rc = unsafe { sqlite3_busy_timeout(self.as_ptr(), 0) };
        self.check(rc, "unable to configure busy timeout")
    }

    pub(crate) fn last_insert_rowid(&self) -> i64 {
        unsafe { sqlite3_last_insert_rowid(self.as_ptr()) }
    }

    /// False while a native transaction is open on this handle.
    pub(crate) fn is_autocommit(&self) -> bool {
        (unsafe { sqlite3_get_autocommit(self.as_ptr()) }) != 0
    }

    pub(crate) fn changes(&self) -> i64 {
        i64::from(unsafe { sqlite3_changes(self.as_ptr()) })
    }

    /// Snapshot of the handle's current error state.
    pub(crate) fn last_error(&self, fallback: &str) -> SqliteError {
        let primary = unsafe { sqlite3_errcode(self.as_ptr()) };
        let extended = unsafe { sqlite3_extended_errcode(self.as_ptr()) };
        let message = unsafe {
            let message = sqlite3_errmsg(self.as_ptr());
            if message.is_null() {
                fallback.to_owned()
            } else {
                CStr::from_ptr(message).to_string_lossy().into_owned()
            }
        };
        SqliteError::new(primary, extended, message)
    }

    fn check(&self, rc: c_int, fallback: &str) -> Result<()> {
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.last_error(fallback).into())
        }
    }

    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let rc = unsafe { sqlite3_close(self.as_ptr()) };
        if rc != SQLITE_OK {
            log::warn!("database handle closed uncleanly (code {rc})");
        }
    }
}

impl Drop for RawConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn code_message(rc: c_int, fallback: &str) -> String {
    unsafe {
        let message = sqlite3_errstr(rc);
        if message.is_null() {
            fallback.to_owned()
        } else {
            CStr::from_ptr(message).to_string_lossy().into_owned()
        }
    }
}
