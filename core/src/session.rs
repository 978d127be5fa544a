use crate::classify::classify;
use crate::conn::{Connection, ConnectionRole};
use crate::cursor::Cursor;
use crate::error::{misuse, Result};
use crate::pool::{Pool, PooledConnection};
use crate::value::Value;
use std::sync::Arc;

/// A caller's logical thread of database work.
///
/// The session classifies each statement to route reads to a reader and
/// everything else to the writer, and pins one pooled connection for exactly
/// as long as a transaction is open on it. Nested work inside the pin reuses
/// the same connection; the pin drops (returning the connection to the pool)
/// the moment the transaction depth falls back to zero.
///
/// Sessions are cheap: create one per thread of work.
pub struct Session {
    pool: Arc<Pool>,
    pinned: Option<PooledConnection>,
}

impl Session {
    pub fn new(pool: Arc<Pool>) -> Session {
        Session { pool, pinned: None }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }

    pub fn transaction_depth(&self) -> u32 {
        self.pinned
            .as_ref()
            .map(|conn| conn.transaction_depth())
            .unwrap_or(0)
    }

    /// Runs `work` on a connection appropriate for `sql`, refining the
    /// caller's write hint with the statement classification.
    pub fn run<R, F>(&mut self, write_hint: bool, sql: &str, work: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let as_write = write_hint || classify(sql).is_predicted_write();
        self.route(as_write, work)
    }

    fn route<R, F>(&mut self, as_write: bool, work: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        if self.pinned.is_some() {
            let conn = self.pinned.as_mut().expect("pinned connection");
            if as_write && conn.role() == ConnectionRole::ReadOnly {
                return Err(misuse(
                    "cannot upgrade a read transaction to a write transaction",
                ));
            }
            let result = work(conn);
            let depth = conn.transaction_depth();
            if depth == 0 {
                // The transaction is over; hand the connection back.
                self.pinned = None;
            }
            return result;
        }
        let mut conn = self.pool.acquire(as_write)?;
        let result = work(&mut conn);
        if conn.transaction_depth() > 0 {
            self.pinned = Some(conn);
        }
        result
    }

    pub fn execute(&mut self, sql: &str, args: &[Value]) -> Result<()> {
        self.run(false, sql, |conn| conn.execute(sql, args))
    }

    pub fn execute_named(&mut self, sql: &str, args: &[(&str, Value)]) -> Result<()> {
        self.run(false, sql, |conn| conn.execute_named(sql, args))
    }

    pub fn execute_for_changed_row_count(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        self.run(false, sql, |conn| conn.execute_for_changed_row_count(sql, args))
    }

    pub fn execute_for_last_inserted_row_id(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        self.run(false, sql, |conn| {
            conn.execute_for_last_inserted_row_id(sql, args)
        })
    }

    pub fn execute_for_long(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        self.run(false, sql, |conn| conn.execute_for_long(sql, args))
    }

    pub fn execute_for_string(&mut self, sql: &str, args: &[Value]) -> Result<String> {
        self.run(false, sql, |conn| conn.execute_for_string(sql, args))
    }

    pub fn execute_batch_for_changed_row_count<I>(&mut self, sql: &str, rows: I) -> Result<i64>
    where
        I: IntoIterator,
        I::Item: AsRef<[Value]>,
    {
        self.run(false, sql, |conn| {
            conn.execute_batch_for_changed_row_count(sql, rows)
        })
    }

    /// Runs `read` over a forward-only cursor. The cursor lives only for the
    /// closure, which keeps the borrowed connection's lease scoped.
    pub fn query<R, F>(&mut self, sql: &str, args: &[Value], read: F) -> Result<R>
    where
        F: FnOnce(&mut Cursor<'_>) -> Result<R>,
    {
        self.run(false, sql, |conn| {
            let mut cursor = conn.query(sql, args)?;
            read(&mut cursor)
        })
    }

    pub fn query_named<R, F>(&mut self, sql: &str, args: &[(&str, Value)], read: F) -> Result<R>
    where
        F: FnOnce(&mut Cursor<'_>) -> Result<R>,
    {
        self.run(false, sql, |conn| {
            let mut cursor = conn.query_named(sql, args)?;
            read(&mut cursor)
        })
    }

    /// Opens (or nests into) a read transaction on whatever connection the
    /// pool hands out for reads.
    pub fn begin_deferred(&mut self) -> Result<()> {
        self.route(false, |conn| conn.begin_deferred())
    }

    pub fn begin_immediate(&mut self) -> Result<()> {
        self.route(true, |conn| conn.begin_immediate())
    }

    pub fn begin_exclusive(&mut self) -> Result<()> {
        self.route(true, |conn| conn.begin_exclusive())
    }

    pub fn set_successful(&mut self) -> Result<()> {
        match self.pinned.as_mut() {
            Some(conn) => conn.set_successful(),
            None => Err(misuse("no transaction in progress")),
        }
    }

    pub fn end(&mut self) -> Result<()> {
        if self.pinned.is_none() {
            return Err(misuse("no transaction in progress"));
        }
        self.route(false, |conn| conn.end())
    }
}

#[cfg(test)]
mod unit {
    use super::*;
    use crate::conn::JournalMode;
    use crate::error::Error;
    use crate::pool::PoolConfiguration;

    fn temp_path(name: &str) -> String {
        let dir = std::env::temp_dir().join("selekt_core_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("session_{name}_{}.db", std::process::id()));
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
        path.to_str().unwrap().to_owned()
    }

    fn pool(name: &str) -> Arc<Pool> {
        let mut config = PoolConfiguration::new(temp_path(name));
        config.max_connections = 4;
        config.journal_mode = JournalMode::Wal;
        Pool::open(config).unwrap()
    }

    #[test]
    fn reads_route_to_readers_and_writes_to_the_writer() {
        let pool = pool("routing");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        let write_role = session
            .run(false, "INSERT INTO t VALUES (1)", |conn| {
                conn.execute("INSERT INTO t VALUES (1)", &[])?;
                Ok(conn.role())
            })
            .unwrap();
        assert_eq!(ConnectionRole::Primary, write_role);
        let read_role = session
            .run(false, "SELECT count(*) FROM t", |conn| Ok(conn.role()))
            .unwrap();
        assert_eq!(ConnectionRole::ReadOnly, read_role);
        let hinted_role = session
            .run(true, "SELECT count(*) FROM t", |conn| Ok(conn.role()))
            .unwrap();
        assert_eq!(ConnectionRole::Primary, hinted_role);
    }

    #[test]
    fn structured_transaction_pins_until_depth_zero() {
        let pool = pool("structured_txn");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        session.begin_immediate().unwrap();
        assert!(session.is_pinned());
        assert_eq!(1, session.transaction_depth());
        session.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        session.set_successful().unwrap();
        session.end().unwrap();
        assert!(!session.is_pinned());
        assert_eq!(
            1,
            session
                .execute_for_long("SELECT count(*) FROM t", &[])
                .unwrap()
        );
    }

    #[test]
    fn rollback_when_not_marked_successful() {
        let pool = pool("rollback_txn");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        session.begin_immediate().unwrap();
        session.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        session.end().unwrap();
        assert_eq!(
            0,
            session
                .execute_for_long("SELECT count(*) FROM t", &[])
                .unwrap()
        );
    }

    #[test]
    fn raw_transaction_sql_pins_and_releases() {
        let pool = pool("raw_txn");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        session.execute("BEGIN IMMEDIATE", &[]).unwrap();
        assert!(session.is_pinned());
        session.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        session.execute("COMMIT", &[]).unwrap();
        assert!(!session.is_pinned());
        assert_eq!(
            1,
            session
                .execute_for_long("SELECT count(*) FROM t", &[])
                .unwrap()
        );
    }

    #[test]
    fn nested_execution_reuses_the_pinned_connection() {
        let pool = pool("reentrancy");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        session.begin_immediate().unwrap();
        let outer_id = session.run(true, "SELECT 1", |conn| Ok(conn.id())).unwrap();
        session.begin_deferred().unwrap();
        assert_eq!(2, session.transaction_depth());
        let inner_id = session.run(true, "SELECT 1", |conn| Ok(conn.id())).unwrap();
        assert_eq!(outer_id, inner_id);
        session.end().unwrap();
        assert!(session.is_pinned());
        session.set_successful().unwrap();
        session.end().unwrap();
        assert!(!session.is_pinned());
    }

    #[test]
    fn read_transaction_cannot_upgrade_to_write() {
        let pool = pool("upgrade");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        session.begin_deferred().unwrap();
        let denied = session.execute("INSERT INTO t VALUES (1)", &[]);
        assert!(matches!(denied, Err(Error::Misuse(_))));
        // The read transaction itself is still usable and ends cleanly.
        assert_eq!(
            0,
            session
                .execute_for_long("SELECT count(*) FROM t", &[])
                .unwrap()
        );
        session.end().unwrap();
        assert!(!session.is_pinned());
    }

    #[test]
    fn transaction_misuse_outside_a_transaction() {
        let pool = pool("misuse");
        let mut session = Session::new(Arc::clone(&pool));
        assert!(matches!(session.end(), Err(Error::Misuse(_))));
        assert!(matches!(session.set_successful(), Err(Error::Misuse(_))));
        assert!(matches!(
            session.execute("COMMIT", &[]),
            Err(Error::Misuse(_))
        ));
    }

    #[test]
    fn query_scopes_the_cursor() {
        let pool = pool("query_scope");
        let mut session = Session::new(Arc::clone(&pool));
        session.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        session
            .execute_batch_for_changed_row_count(
                "INSERT INTO t VALUES (?)",
                (0..3).map(|i| vec![Value::Integer(i)]).collect::<Vec<_>>(),
            )
            .unwrap();
        let total = session
            .query("SELECT i FROM t ORDER BY i", &[], |cursor| {
                let mut total = 0;
                while cursor.move_to_next()? {
                    total += cursor.get_long(0)?;
                }
                Ok(total)
            })
            .unwrap();
        assert_eq!(3, total);
        assert!(!session.is_pinned());
    }

    #[test]
    fn named_query_round_trip() {
        let pool = pool("named_query");
        let mut session = Session::new(Arc::clone(&pool));
        session
            .execute("CREATE TABLE u (id INTEGER, name TEXT)", &[])
            .unwrap();
        session
            .execute("INSERT INTO u VALUES (1, 'ada'), (2, 'grace')", &[])
            .unwrap();
        let name = session
            .query_named(
                "SELECT name FROM u WHERE id = @id",
                &[("@id", Value::Integer(2))],
                |cursor| {
                    assert!(cursor.move_to_next()?);
                    cursor.get_string(0)
                },
            )
            .unwrap();
        assert_eq!("grace", name);
    }
}
