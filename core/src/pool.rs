use crate::conn::{Connection, ConnectionOptions, ConnectionRole, JournalMode};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    pub path: String,
    pub max_connections: usize,
    pub idle_timeout: Duration,
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
    pub key: Option<Vec<u8>>,
    pub statement_cache_capacity: usize,
}

impl PoolConfiguration {
    pub fn new(path: impl Into<String>) -> Self {
        PoolConfiguration {
            path: path.into(),
            max_connections: constants::DEFAULT_POOL_SIZE,
            idle_timeout: Duration::from_millis(constants::DEFAULT_IDLE_TIMEOUT_MILLIS),
            busy_timeout: Duration::from_millis(constants::DEFAULT_BUSY_TIMEOUT_MILLIS),
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
            key: None,
            statement_cache_capacity: constants::DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

#[derive(Default)]
struct Shared {
    idle_writer: Option<Connection>,
    writer_exists: bool,
    idle_readers: VecDeque<Connection>,
    readers_open: usize,
    closed: bool,
}

/// A bounded set of connections over one database path.
///
/// In WAL mode the pool holds one write-capable PRIMARY connection and up to
/// `max_connections - 1` READ_ONLY connections, all created lazily (the
/// writer eagerly, so a bad path or key fails the open). In any other journal
/// mode, and for in-memory databases, every caller shares the single PRIMARY.
///
/// One mutex guards the free sets; two condition variables (readers, writer)
/// park waiters by role, so returning the writer wakes a writer acquirer
/// directly. At most one writer is ever lent.
pub struct Pool {
    shared: Mutex<Shared>,
    reader_available: Condvar,
    writer_available: Condvar,
    // Lets lent guards find their way home without the callers having to
    // thread an Arc through every call.
    loopback: Weak<Pool>,
    options: ConnectionOptions,
    max_connections: usize,
    idle_timeout: Duration,
    wal: bool,
    in_memory: bool,
    next_id: AtomicU64,
}

impl Pool {
    pub fn open(config: PoolConfiguration) -> Result<Arc<Self>> {
        if config.path.is_empty() {
            return Err(Error::InvalidUriFormat("database path is empty".into()));
        }
        let in_memory = is_in_memory(&config.path);
        let options = ConnectionOptions {
            path: config.path,
            key: config.key,
            journal_mode: config.journal_mode,
            foreign_keys: config.foreign_keys,
            busy_timeout: config.busy_timeout,
            statement_cache_capacity: config.statement_cache_capacity,
        };
        let pool = Arc::new_cyclic(|loopback| Pool {
            shared: Mutex::new(Shared::default()),
            reader_available: Condvar::new(),
            writer_available: Condvar::new(),
            loopback: loopback.clone(),
            options,
            max_connections: config.max_connections.max(1),
            idle_timeout: config.idle_timeout,
            wal: config.journal_mode == JournalMode::Wal,
            in_memory,
            next_id: AtomicU64::new(0),
        });
        // Eager writer creation validates the path and the key at open time.
        let writer = pool.create(ConnectionRole::Primary)?;
        {
            let mut shared = pool.shared.lock().unwrap();
            shared.writer_exists = true;
            shared.idle_writer = Some(writer);
        }
        Ok(pool)
    }

    /// Read-only slots available alongside the writer.
    pub fn reader_capacity(&self) -> usize {
        if self.wal && !self.in_memory {
            self.max_connections.saturating_sub(1)
        } else {
            0
        }
    }

    /// Borrows a connection, blocking until one the caller is permitted to
    /// use becomes available. Writers are mutually exclusive; readers proceed
    /// concurrently up to capacity.
    pub fn acquire(&self, for_write: bool) -> Result<PooledConnection> {
        if for_write || self.reader_capacity() == 0 {
            self.acquire_writer()
        } else {
            self.acquire_reader()
        }
    }

    fn acquire_writer(&self) -> Result<PooledConnection> {
        let mut shared = self.shared.lock().unwrap();
        loop {
            if shared.closed {
                return Err(Error::PoolClosed);
            }
            if let Some(conn) = shared.idle_writer.take() {
                return Ok(self.lend(conn));
            }
            if !shared.writer_exists {
                shared.writer_exists = true;
                drop(shared);
                return match self.create(ConnectionRole::Primary) {
                    Ok(conn) => Ok(self.lend(conn)),
                    Err(error) => {
                        self.shared.lock().unwrap().writer_exists = false;
                        self.writer_available.notify_one();
                        Err(error)
                    }
                };
            }
            shared = self.writer_available.wait(shared).unwrap();
        }
    }

    fn acquire_reader(&self) -> Result<PooledConnection> {
        let mut shared = self.shared.lock().unwrap();
        loop {
            if shared.closed {
                return Err(Error::PoolClosed);
            }
            if let Some(conn) = shared.idle_readers.pop_front() {
                return Ok(self.lend(conn));
            }
            if shared.readers_open < self.reader_capacity() {
                shared.readers_open += 1;
                drop(shared);
                return match self.create(ConnectionRole::ReadOnly) {
                    Ok(conn) => Ok(self.lend(conn)),
                    Err(error) => {
                        self.shared.lock().unwrap().readers_open -= 1;
                        self.reader_available.notify_one();
                        Err(error)
                    }
                };
            }
            shared = self.reader_available.wait(shared).unwrap();
        }
    }

    fn lend(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            pool: self.loopback.upgrade().expect("pool outlives its guards"),
            conn: Some(conn),
        }
    }

    fn create(&self, role: ConnectionRole) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Connection::open(&self.options, role, id)
    }

    fn release(&self, mut conn: Connection) {
        conn.reset_for_reuse();
        let poisoned = conn.is_poisoned();
        if poisoned {
            log::debug!("discarding poisoned connection {}", conn.id());
        }
        let mut discarded = None;
        let mut shared = self.shared.lock().unwrap();
        let discard = poisoned || shared.closed;
        match conn.role() {
            ConnectionRole::Primary => {
                if discard {
                    shared.writer_exists = false;
                    discarded = Some(conn);
                } else {
                    shared.idle_writer = Some(conn);
                }
                self.writer_available.notify_one();
            }
            ConnectionRole::ReadOnly => {
                if discard {
                    shared.readers_open -= 1;
                    discarded = Some(conn);
                } else {
                    shared.idle_readers.push_back(conn);
                }
                self.reader_available.notify_one();
            }
        }
        drop(shared);
        // Tearing a connection down finalizes statements and closes the
        // native handle; keep that out of the critical section.
        drop(discarded);
    }

    /// Reaps idle connections whose last use is older than the idle timeout.
    /// Returns how many were torn down.
    pub fn close_idle(&self) -> usize {
        let now = Instant::now();
        let mut reaped = Vec::new();
        {
            let mut shared = self.shared.lock().unwrap();
            let mut kept = VecDeque::new();
            while let Some(conn) = shared.idle_readers.pop_front() {
                if now.duration_since(conn.last_used()) >= self.idle_timeout {
                    shared.readers_open -= 1;
                    reaped.push(conn);
                } else {
                    kept.push_back(conn);
                }
            }
            shared.idle_readers = kept;
            let writer_expired = shared
                .idle_writer
                .as_ref()
                .map(|conn| now.duration_since(conn.last_used()) >= self.idle_timeout)
                .unwrap_or(false);
            if writer_expired {
                shared.writer_exists = false;
                reaped.push(shared.idle_writer.take().unwrap());
            }
            if !reaped.is_empty() {
                self.reader_available.notify_all();
                self.writer_available.notify_all();
            }
        }
        let count = reaped.len();
        if count > 0 {
            log::debug!("reaped {count} idle connection(s)");
        }
        drop(reaped);
        count
    }

    /// Closes the pool: idle connections are torn down now, lent connections
    /// when they return, and every waiter fails with PoolClosed.
    pub fn close(&self) {
        let mut to_drop = Vec::new();
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.closed {
                return;
            }
            shared.closed = true;
            while let Some(conn) = shared.idle_readers.pop_front() {
                shared.readers_open -= 1;
                to_drop.push(conn);
            }
            if let Some(conn) = shared.idle_writer.take() {
                shared.writer_exists = false;
                to_drop.push(conn);
            }
        }
        self.reader_available.notify_all();
        self.writer_available.notify_all();
        drop(to_drop);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().unwrap().closed
    }

    /// Idle connections currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        let shared = self.shared.lock().unwrap();
        shared.idle_readers.len() + usize::from(shared.idle_writer.is_some())
    }
}

fn is_in_memory(path: &str) -> bool {
    path == ":memory:" || path.starts_with("file::memory:") || path.contains("mode=memory")
}

/// Scoped lease of a [`Connection`]. Dropping the guard returns the
/// connection to its pool on every exit path; poisoned connections are
/// destroyed instead of re-pooled.
pub struct PooledConnection {
    pool: Arc<Pool>,
    conn: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod unit {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn temp_path(name: &str) -> String {
        let dir = std::env::temp_dir().join("selekt_core_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("pool_{name}_{}.db", std::process::id()));
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
        path.to_str().unwrap().to_owned()
    }

    fn wal_config(name: &str, max: usize) -> PoolConfiguration {
        let mut config = PoolConfiguration::new(temp_path(name));
        config.max_connections = max;
        config
    }

    #[test]
    fn writer_is_exclusive() {
        let pool = Pool::open(wal_config("writer_exclusive", 4)).unwrap();
        {
            let mut writer = pool.acquire(true).unwrap();
            writer.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        }
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        thread::scope(|scope| {
            for i in 0i64..8 {
                let pool = Arc::clone(&pool);
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                scope.spawn(move || {
                    let mut writer = pool.acquire(true).unwrap();
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    writer
                        .execute("INSERT INTO t VALUES (?)", &[crate::value::Value::Integer(i)])
                        .unwrap();
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(1, peak.load(Ordering::SeqCst));
        let mut conn = pool.acquire(false).unwrap();
        assert_eq!(8, conn.execute_for_long("SELECT count(*) FROM t", &[]).unwrap());
    }

    #[test]
    fn readers_fan_out_in_wal_mode() {
        let pool = Pool::open(wal_config("readers_fan_out", 3)).unwrap();
        {
            let mut writer = pool.acquire(true).unwrap();
            writer.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
            writer.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        }
        assert_eq!(2, pool.reader_capacity());
        let writer = pool.acquire(true).unwrap();
        let reader_a = pool.acquire(false).unwrap();
        let reader_b = pool.acquire(false).unwrap();
        assert_eq!(ConnectionRole::Primary, writer.role());
        assert_eq!(ConnectionRole::ReadOnly, reader_a.role());
        assert_eq!(ConnectionRole::ReadOnly, reader_b.role());
    }

    #[test]
    fn reader_waits_for_capacity() {
        let pool = Pool::open(wal_config("reader_waits", 2)).unwrap();
        let held = pool.acquire(false).unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        thread::scope(|scope| {
            {
                let pool = Arc::clone(&pool);
                let released = Arc::clone(&released);
                scope.spawn(move || {
                    let _reader = pool.acquire(false).unwrap();
                    assert_eq!(1, released.load(Ordering::SeqCst));
                });
            }
            thread::sleep(Duration::from_millis(100));
            released.store(1, Ordering::SeqCst);
            drop(held);
        });
    }

    #[test]
    fn non_wal_mode_shares_the_writer() {
        let mut config = wal_config("non_wal", 4);
        config.journal_mode = JournalMode::Delete;
        let pool = Pool::open(config).unwrap();
        assert_eq!(0, pool.reader_capacity());
        let conn = pool.acquire(false).unwrap();
        assert_eq!(ConnectionRole::Primary, conn.role());
    }

    #[test]
    fn in_memory_forces_single_connection() {
        let mut config = PoolConfiguration::new(":memory:");
        config.max_connections = 8;
        let pool = Pool::open(config).unwrap();
        assert_eq!(0, pool.reader_capacity());
        let mut conn = pool.acquire(false).unwrap();
        conn.execute("CREATE TABLE t (i INTEGER)", &[]).unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
        drop(conn);
        let mut conn = pool.acquire(false).unwrap();
        assert_eq!(1, conn.execute_for_long("SELECT count(*) FROM t", &[]).unwrap());
    }

    #[test]
    fn idle_connections_are_reaped() {
        let mut config = wal_config("idle_reap", 3);
        config.idle_timeout = Duration::ZERO;
        let pool = Pool::open(config).unwrap();
        {
            let _reader = pool.acquire(false).unwrap();
        }
        assert!(pool.idle_count() >= 1);
        let reaped = pool.close_idle();
        assert!(reaped >= 1);
        assert_eq!(0, pool.idle_count());
        // The pool recreates lazily after a reap.
        let mut conn = pool.acquire(true).unwrap();
        conn.execute("CREATE TABLE IF NOT EXISTS t (i INTEGER)", &[])
            .unwrap();
    }

    #[test]
    fn fresh_pool_keeps_connections_before_timeout() {
        let mut config = wal_config("idle_keep", 3);
        config.idle_timeout = Duration::from_secs(3_600);
        let pool = Pool::open(config).unwrap();
        assert_eq!(0, pool.close_idle());
        assert_eq!(1, pool.idle_count());
    }

    #[test]
    fn closed_pool_rejects_acquire() {
        let pool = Pool::open(wal_config("closed", 2)).unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire(true), Err(Error::PoolClosed)));
        assert!(matches!(pool.acquire(false), Err(Error::PoolClosed)));
    }

    #[test]
    fn lent_connection_is_destroyed_on_closed_return() {
        let pool = Pool::open(wal_config("close_while_lent", 2)).unwrap();
        let conn = pool.acquire(true).unwrap();
        pool.close();
        drop(conn);
        assert_eq!(0, pool.idle_count());
    }

    #[test]
    fn empty_path_is_rejected() {
        let denied = Pool::open(PoolConfiguration::new(""));
        assert!(matches!(denied, Err(Error::InvalidUriFormat(_))));
    }
}
