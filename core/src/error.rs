use crate::definitions::{ExtendedCode, PrimaryCode};
use num_traits::FromPrimitive;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Sqlite(#[from] SqliteError),
    #[error("Invalid Uri: {0}")]
    InvalidUriFormat(String),
    #[error("misuse: {0}")]
    Misuse(String),
    #[error("no current row in the result set")]
    InvalidCursorState,
    #[error("the connection pool is closed")]
    PoolClosed,
}

impl Error {
    pub fn sql_state(&self) -> &'static str {
        match self {
            Error::Sqlite(e) => e.sql_state(),
            Error::InvalidUriFormat(_) => constants::UNABLE_TO_CONNECT,
            Error::Misuse(_) => constants::FUNCTION_SEQUENCE_ERROR,
            Error::InvalidCursorState => constants::INVALID_CURSOR_STATE,
            Error::PoolClosed => constants::CONNECTION_NOT_OPEN,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Sqlite(e) => e.kind(),
            Error::InvalidUriFormat(_) | Error::PoolClosed => ErrorKind::NonTransientConnection,
            Error::Misuse(_) | Error::InvalidCursorState => ErrorKind::NonTransient,
        }
    }

    /// True when the connection that produced this error must not be lent out
    /// again. The pool destroys such connections on return.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Sqlite(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub(crate) fn misuse(message: impl Into<String>) -> Error {
    Error::Misuse(message.into())
}

/// The stable, user-facing classification of an engine error. Each kind owns a
/// SQLSTATE range; the precise value also depends on the code pair (see
/// [`SqliteError::sql_state`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IntegrityConstraintViolation,
    DataException,
    NonTransientConnection,
    Transient,
    TransientIo,
    Timeout,
    TransactionRollback,
    Recoverable,
    NonTransient,
    Generic,
}

/// An error reported by the engine: the primary/extended result-code pair and
/// the message that was current on the owning database handle. `extended` is
/// -1 when no extended code was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteError {
    pub primary: i32,
    pub extended: i32,
    pub message: String,
}

impl SqliteError {
    pub fn new(primary: i32, extended: i32, message: impl Into<String>) -> Self {
        Self {
            primary,
            extended,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use PrimaryCode::*;
        let Some(primary) = PrimaryCode::from_i32(self.primary) else {
            return ErrorKind::Generic;
        };
        match primary {
            SQLITE_CONSTRAINT => ErrorKind::IntegrityConstraintViolation,
            SQLITE_MISMATCH | SQLITE_TOOBIG | SQLITE_RANGE => ErrorKind::DataException,
            SQLITE_CANTOPEN | SQLITE_NOTADB | SQLITE_CORRUPT | SQLITE_AUTH => {
                ErrorKind::NonTransientConnection
            }
            SQLITE_BUSY if self.extended == ExtendedCode::SQLITE_IOERR_BLOCKED as i32 => {
                ErrorKind::Timeout
            }
            SQLITE_BUSY | SQLITE_LOCKED => ErrorKind::Transient,
            SQLITE_ABORT => ErrorKind::TransactionRollback,
            SQLITE_NOMEM => ErrorKind::Recoverable,
            SQLITE_IOERR => match ExtendedCode::from_i32(self.extended) {
                Some(ExtendedCode::SQLITE_IOERR_NOMEM) => ErrorKind::Recoverable,
                Some(
                    ExtendedCode::SQLITE_IOERR_ACCESS
                    | ExtendedCode::SQLITE_IOERR_LOCK
                    | ExtendedCode::SQLITE_IOERR_UNLOCK,
                ) => ErrorKind::TransientIo,
                _ => ErrorKind::NonTransient,
            },
            SQLITE_FULL | SQLITE_READONLY | SQLITE_MISUSE | SQLITE_NOTFOUND | SQLITE_ERROR => {
                ErrorKind::NonTransient
            }
            _ => ErrorKind::Generic,
        }
    }

    pub fn sql_state(&self) -> &'static str {
        use PrimaryCode::*;
        let Some(primary) = PrimaryCode::from_i32(self.primary) else {
            return constants::GENERAL_ERROR;
        };
        match primary {
            SQLITE_CONSTRAINT => constants::INTEGRITY_CONSTRAINT_VIOLATION,
            SQLITE_MISMATCH => constants::DATA_EXCEPTION,
            SQLITE_TOOBIG => constants::STRING_DATA_RIGHT_TRUNCATION,
            SQLITE_RANGE => constants::NUMERIC_VALUE_OUT_OF_RANGE,
            SQLITE_CANTOPEN => constants::UNABLE_TO_CONNECT,
            SQLITE_NOTADB | SQLITE_CORRUPT => constants::CONNECTION_FAILURE,
            SQLITE_AUTH => constants::INVALID_AUTHORIZATION_SPECIFICATION,
            SQLITE_BUSY if self.extended == ExtendedCode::SQLITE_IOERR_BLOCKED as i32 => {
                constants::TIMEOUT_EXPIRED
            }
            SQLITE_BUSY | SQLITE_LOCKED => constants::SERIALIZATION_FAILURE,
            SQLITE_ABORT => constants::TRANSACTION_ROLLBACK,
            SQLITE_NOMEM => constants::INSUFFICIENT_RESOURCES,
            SQLITE_IOERR => match ExtendedCode::from_i32(self.extended) {
                Some(ExtendedCode::SQLITE_IOERR_NOMEM) => constants::INSUFFICIENT_RESOURCES,
                _ => constants::GENERAL_ERROR,
            },
            SQLITE_FULL => constants::DISK_FULL,
            SQLITE_READONLY => constants::READ_ONLY_SQL_TRANSACTION,
            SQLITE_MISUSE => constants::FUNCTION_SEQUENCE_ERROR,
            SQLITE_NOTFOUND => constants::SYNTAX_OR_ACCESS_RULE_VIOLATION,
            SQLITE_ERROR => constants::GENERAL_ERROR,
            SQLITE_OK | SQLITE_ROW | SQLITE_DONE => constants::SUCCESS,
            _ => constants::GENERAL_ERROR,
        }
    }

    /// CORRUPT, NOTADB and the unrecoverable flavors of IOERR poison the
    /// connection they occurred on.
    pub fn is_fatal(&self) -> bool {
        match PrimaryCode::from_i32(self.primary) {
            Some(PrimaryCode::SQLITE_CORRUPT) | Some(PrimaryCode::SQLITE_NOTADB) => true,
            Some(PrimaryCode::SQLITE_IOERR) => !matches!(
                ExtendedCode::from_i32(self.extended),
                Some(
                    ExtendedCode::SQLITE_IOERR_ACCESS
                        | ExtendedCode::SQLITE_IOERR_LOCK
                        | ExtendedCode::SQLITE_IOERR_UNLOCK
                        | ExtendedCode::SQLITE_IOERR_NOMEM
                        | ExtendedCode::SQLITE_IOERR_BLOCKED
                )
            ),
            _ => false,
        }
    }

    fn primary_name(&self) -> String {
        match PrimaryCode::from_i32(self.primary) {
            Some(code) => format!("{code:?}"),
            None => format!("SQLITE_UNKNOWN({})", self.primary),
        }
    }

    fn extended_name(&self) -> Option<String> {
        if self.extended <= 0 || self.extended == self.primary {
            return None;
        }
        Some(match ExtendedCode::from_i32(self.extended) {
            Some(code) => format!("{code:?}"),
            None => format!("SQLITE_UNKNOWN_EXTENDED({})", self.extended),
        })
    }
}

impl fmt::Display for SqliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.extended_name() {
            Some(extended) => {
                write!(f, "{} ({}; {})", self.message, self.primary_name(), extended)
            }
            None => write!(f, "{} ({})", self.message, self.primary_name()),
        }
    }
}

impl std::error::Error for SqliteError {}

#[cfg(test)]
mod unit {
    use super::*;

    fn native(primary: i32, extended: i32) -> SqliteError {
        SqliteError::new(primary, extended, "boom")
    }

    #[test]
    fn constraint_is_integrity_violation() {
        let e = native(19, 1555);
        assert_eq!(ErrorKind::IntegrityConstraintViolation, e.kind());
        assert_eq!("23000", e.sql_state());
    }

    #[test]
    fn data_exceptions() {
        assert_eq!(ErrorKind::DataException, native(20, -1).kind());
        assert_eq!("22000", native(20, -1).sql_state());
        assert_eq!("22001", native(18, -1).sql_state());
        assert_eq!("22003", native(25, -1).sql_state());
    }

    #[test]
    fn connection_errors() {
        assert_eq!("08001", native(14, -1).sql_state());
        assert_eq!("08007", native(26, -1).sql_state());
        assert_eq!("08007", native(11, -1).sql_state());
        assert_eq!("28000", native(23, -1).sql_state());
        assert_eq!(ErrorKind::NonTransientConnection, native(11, -1).kind());
    }

    #[test]
    fn busy_is_transient_unless_io_blocked() {
        assert_eq!(ErrorKind::Transient, native(5, 5).kind());
        assert_eq!("40001", native(5, 5).sql_state());
        assert_eq!(ErrorKind::Timeout, native(5, 2826).kind());
        assert_eq!("HYT00", native(5, 2826).sql_state());
        assert_eq!(ErrorKind::Transient, native(6, 262).kind());
        assert_eq!(ErrorKind::Transient, native(6, 518).kind());
    }

    #[test]
    fn abort_rolls_back() {
        assert_eq!(ErrorKind::TransactionRollback, native(4, 516).kind());
        assert_eq!("40000", native(4, 516).sql_state());
    }

    #[test]
    fn resource_errors() {
        assert_eq!(ErrorKind::Recoverable, native(7, -1).kind());
        assert_eq!("53000", native(7, -1).sql_state());
        assert_eq!(ErrorKind::Recoverable, native(10, 3082).kind());
        assert_eq!("53000", native(10, 3082).sql_state());
        assert_eq!(ErrorKind::TransientIo, native(10, 3338).kind());
        assert_eq!(ErrorKind::TransientIo, native(10, 3850).kind());
        assert_eq!(ErrorKind::TransientIo, native(10, 2058).kind());
        assert_eq!(ErrorKind::NonTransient, native(10, 266).kind());
    }

    #[test]
    fn non_transient_errors() {
        assert_eq!("53100", native(13, -1).sql_state());
        assert_eq!("25006", native(8, -1).sql_state());
        assert_eq!("HY010", native(21, -1).sql_state());
        assert_eq!("42000", native(12, -1).sql_state());
        assert_eq!("HY000", native(1, -1).sql_state());
        assert_eq!(ErrorKind::NonTransient, native(1, -1).kind());
    }

    #[test]
    fn success_codes_are_generic() {
        for code in [0, 100, 101] {
            assert_eq!(ErrorKind::Generic, native(code, -1).kind());
            assert_eq!("00000", native(code, -1).sql_state());
        }
    }

    #[test]
    fn unknown_primary_is_generic() {
        assert_eq!(ErrorKind::Generic, native(990, -1).kind());
        assert_eq!("HY000", native(990, -1).sql_state());
    }

    #[test]
    fn description_carries_code_names() {
        assert_eq!(
            "boom (SQLITE_CONSTRAINT; SQLITE_CONSTRAINT_PRIMARYKEY)",
            format!("{}", native(19, 1555))
        );
        assert_eq!("boom (SQLITE_BUSY)", format!("{}", native(5, 5)));
        assert_eq!("boom (SQLITE_BUSY)", format!("{}", native(5, -1)));
        assert_eq!(
            "boom (SQLITE_UNKNOWN(990); SQLITE_UNKNOWN_EXTENDED(991))",
            format!("{}", native(990, 991))
        );
    }

    #[test]
    fn fatal_codes_poison() {
        assert!(native(11, -1).is_fatal());
        assert!(native(26, -1).is_fatal());
        assert!(native(10, 778).is_fatal());
        assert!(!native(10, 3338).is_fatal());
        assert!(!native(10, 3082).is_fatal());
        assert!(!native(5, -1).is_fatal());
        assert!(!native(19, -1).is_fatal());
    }

    #[test]
    fn misuse_state_and_kind() {
        let e = misuse("bind index out of range");
        assert_eq!("HY010", e.sql_state());
        assert_eq!(ErrorKind::NonTransient, e.kind());
        assert!(!e.is_fatal());
    }

    #[test]
    fn uri_errors_map_to_connection_state() {
        let e = Error::InvalidUriFormat("no database path".into());
        assert_eq!("08001", e.sql_state());
        assert_eq!(ErrorKind::NonTransientConnection, e.kind());
    }
}
