mod backoff;
pub mod classify;
pub use classify::{classify, parse_named_parameters, SqlKind};
mod conn;
pub use conn::{Connection, ConnectionRole, JournalMode, TransactionMode};
mod cursor;
pub use cursor::Cursor;
pub mod definitions;
pub use definitions::ColumnType;
mod error;
pub use error::{Error, ErrorKind, Result, SqliteError};
mod jdbc_uri;
pub use jdbc_uri::JdbcUri;
mod pool;
pub use pool::{Pool, PoolConfiguration, PooledConnection};
mod raw;
mod session;
pub use session::Session;
pub mod statement_cache;
pub use statement_cache::{StampedStatementCache, StatementCache};
mod stmt;
pub use stmt::{StatementHandle, StepResult};
mod value;
pub use value::Value;
