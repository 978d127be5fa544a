//! The thin driver facade over the Selekt core: URL-driven database opening,
//! per-thread sessions, and process-wide driver registration.

mod database;
pub use database::Database;
mod registry;
pub use registry::{accepts_url, connect, register};

pub use selekt_core::{
    classify, parse_named_parameters, ColumnType, Connection, ConnectionRole, Cursor, Error,
    ErrorKind, JdbcUri, JournalMode, Pool, PoolConfiguration, PooledConnection, Result, Session,
    SqlKind, SqliteError, StatementHandle, StepResult, TransactionMode, Value,
};
