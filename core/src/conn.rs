use crate::classify::{classify, SqlKind};
use crate::cursor::Cursor;
use crate::error::{misuse, Result};
use crate::raw::RawConnection;
use crate::statement_cache::{Disposal, StampedStatementCache, StatementCache};
use crate::stmt::{StatementHandle, StepResult};
use crate::value::Value;
use std::time::{Duration, Instant};

/// The journal mode the database is provisioned with. WAL is the only mode
/// under which the pool fans out read-only connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }

    pub fn parse(value: &str) -> Option<JournalMode> {
        match value.to_ascii_uppercase().as_str() {
            "DELETE" => Some(JournalMode::Delete),
            "TRUNCATE" => Some(JournalMode::Truncate),
            "PERSIST" => Some(JournalMode::Persist),
            "MEMORY" => Some(JournalMode::Memory),
            "WAL" => Some(JournalMode::Wal),
            "OFF" => Some(JournalMode::Off),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Primary,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    Deferred,
    Immediate,
    Exclusive,
}

impl TransactionMode {
    fn is_write(self) -> bool {
        !matches!(self, TransactionMode::Deferred)
    }

    fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
            TransactionMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Everything a connection needs at open time. Built by the pool from its
/// configuration.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionOptions {
    pub path: String,
    pub key: Option<Vec<u8>>,
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
    pub busy_timeout: Duration,
    pub statement_cache_capacity: usize,
}

#[derive(Debug)]
struct TransactionState {
    depth: u32,
    mode: TransactionMode,
    successful: bool,
    aborted: bool,
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState {
            depth: 0,
            mode: TransactionMode::Deferred,
            successful: false,
            aborted: false,
        }
    }
}

/// Arguments for one execution, positional or by name.
#[derive(Clone, Copy)]
enum BindArgs<'a> {
    Positional(&'a [Value]),
    Named(&'a [(&'a str, Value)]),
}

impl BindArgs<'_> {
    fn apply(&self, stmt: &mut StatementHandle) -> Result<()> {
        match self {
            BindArgs::Positional(args) => stmt.bind_all(args),
            BindArgs::Named(args) => {
                for (name, value) in args.iter() {
                    stmt.bind_named(name, value)?;
                }
                Ok(())
            }
        }
    }
}

/// Returns a statement to its pre-step state on every exit path, panics
/// included.
struct ResetOnDrop<'a>(&'a mut StatementHandle);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.reset();
        self.0.clear_bindings();
    }
}

enum PreparedCache {
    Linked(StatementCache<StatementHandle>),
    Stamped(StampedStatementCache<StatementHandle>),
}

impl PreparedCache {
    fn get_or_compile<F>(&mut self, sql: &str, compile: F) -> Result<&mut StatementHandle>
    where
        F: FnOnce() -> Result<StatementHandle>,
    {
        match self {
            PreparedCache::Linked(cache) => cache.get_or_compile(sql, compile),
            PreparedCache::Stamped(cache) => cache.get_or_compile(sql, compile),
        }
    }

    fn evict(&mut self, sql: &str) -> bool {
        match self {
            PreparedCache::Linked(cache) => cache.evict(sql),
            PreparedCache::Stamped(cache) => cache.evict(sql),
        }
    }

    fn evict_all(&mut self) {
        match self {
            PreparedCache::Linked(cache) => cache.evict_all(),
            PreparedCache::Stamped(cache) => cache.evict_all(),
        }
    }

    fn len(&self) -> usize {
        match self {
            PreparedCache::Linked(cache) => cache.len(),
            PreparedCache::Stamped(cache) => cache.len(),
        }
    }
}

/// One native database handle plus its prepared-statement cache and
/// transaction state.
///
/// A connection is single-threaded by contract: the pool lends it to at most
/// one caller at a time, so no internal locking exists here.
pub struct Connection {
    raw: RawConnection,
    statements: PreparedCache,
    role: ConnectionRole,
    busy_timeout: Duration,
    transaction: TransactionState,
    poisoned: bool,
    last_used: Instant,
    id: u64,
}

impl Connection {
    pub(crate) fn open(options: &ConnectionOptions, role: ConnectionRole, id: u64) -> Result<Self> {
        let raw = RawConnection::open(&options.path, role == ConnectionRole::ReadOnly)?;
        if let Some(key) = &options.key {
            raw.key(key)?;
        }
        raw.disable_native_busy_handler()?;
        // Forces a read of the database header so a wrong key or a corrupt
        // file fails the open instead of the first caller query.
        raw.exec("SELECT count(*) FROM sqlite_master")?;
        if role == ConnectionRole::Primary {
            raw.exec(&format!(
                "PRAGMA journal_mode={}",
                options.journal_mode.as_str()
            ))?;
        }
        raw.exec(if options.foreign_keys {
            "PRAGMA foreign_keys=ON"
        } else {
            "PRAGMA foreign_keys=OFF"
        })?;
        let disposal: Disposal<StatementHandle> = Box::new(move |mut stmt| {
            log::trace!("connection {id}: finalizing evicted statement: {}", stmt.sql());
            stmt.close();
        });
        let statements = match role {
            ConnectionRole::Primary => {
                PreparedCache::Linked(StatementCache::new(options.statement_cache_capacity, disposal))
            }
            // Readers serve the hottest single-threaded query path; the
            // stamped cache skips list maintenance on every hit.
            ConnectionRole::ReadOnly => PreparedCache::Stamped(StampedStatementCache::new(
                options.statement_cache_capacity,
                disposal,
            )),
        };
        log::debug!("connection {id} opened ({role:?}) on {}", options.path);
        Ok(Connection {
            raw,
            statements,
            role,
            busy_timeout: options.busy_timeout,
            transaction: TransactionState::default(),
            poisoned: false,
            last_used: Instant::now(),
            id,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn transaction_depth(&self) -> u32 {
        self.transaction.depth
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.depth > 0
    }

    pub fn cached_statement_count(&self) -> usize {
        self.statements.len()
    }

    pub(crate) fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.busy_timeout
    }

    fn check_writable(&self, kind: SqlKind) -> Result<()> {
        if kind.is_predicted_write() && self.role == ConnectionRole::ReadOnly {
            return Err(misuse("write statement on a read-only connection"));
        }
        Ok(())
    }

    /// Marks the connection poisoned when an error is fatal for it.
    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if error.is_fatal() {
                self.poisoned = true;
                log::warn!("connection {} poisoned: {error}", self.id);
            }
        }
        result
    }

    /// Executes a statement for its side effects. Transaction-control text
    /// participates in the depth machinery instead of running directly.
    pub fn execute(&mut self, sql: &str, args: &[Value]) -> Result<()> {
        let result = self.execute_inner(sql, BindArgs::Positional(args));
        self.note(result)
    }

    pub fn execute_named(&mut self, sql: &str, args: &[(&str, Value)]) -> Result<()> {
        let result = self.execute_inner(sql, BindArgs::Named(args));
        self.note(result)
    }

    fn execute_inner(&mut self, sql: &str, args: BindArgs<'_>) -> Result<()> {
        let kind = classify(sql);
        if kind.begins() {
            return self.begin_from_sql(sql);
        }
        if kind.commits() {
            return self.end_from_sql(sql, true);
        }
        if kind.aborts() {
            return self.end_from_sql(sql, false);
        }
        self.check_writable(kind)?;
        if !kind.is_cacheable() {
            return self.run_unprepared(sql, args);
        }
        self.run_cached(sql, args).map(|_| ())
    }

    pub fn execute_for_changed_row_count(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        let result = self.changed_rows_inner(sql, BindArgs::Positional(args));
        self.note(result)
    }

    fn changed_rows_inner(&mut self, sql: &str, args: BindArgs<'_>) -> Result<i64> {
        let kind = classify(sql);
        self.check_writable(kind)?;
        if kind.is_transactional() {
            return Err(misuse("transaction control has no change count"));
        }
        if !kind.is_cacheable() {
            self.run_unprepared(sql, args)?;
        } else {
            self.run_cached(sql, args)?;
        }
        Ok(self.raw.changes())
    }

    pub fn execute_for_last_inserted_row_id(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        let kind = classify(sql);
        self.check_writable(kind)?;
        if kind.is_transactional() {
            return Err(misuse("transaction control has no row id"));
        }
        let result = self
            .run_cached(sql, BindArgs::Positional(args))
            .map(|_| self.raw.last_insert_rowid());
        self.note(result)
    }

    /// Steps once and reads column 0 of the single expected row.
    pub fn execute_for_long(&mut self, sql: &str, args: &[Value]) -> Result<i64> {
        let result = self.scalar_inner(sql, args, |stmt| stmt.column_int64(0));
        self.note(result)
    }

    pub fn execute_for_string(&mut self, sql: &str, args: &[Value]) -> Result<String> {
        let result = self.scalar_inner(sql, args, |stmt| stmt.column_text(0));
        self.note(result)
    }

    fn scalar_inner<T>(
        &mut self,
        sql: &str,
        args: &[Value],
        read: impl FnOnce(&StatementHandle) -> T,
    ) -> Result<T> {
        let kind = classify(sql);
        self.check_writable(kind)?;
        if kind.is_transactional() || !kind.is_cacheable() {
            return Err(misuse("statement cannot produce a scalar"));
        }
        let deadline = self.deadline();
        self.touch();
        let raw = &self.raw;
        let stmt = self
            .statements
            .get_or_compile(sql, || StatementHandle::prepare(raw, sql, true))?;
        stmt.reset();
        stmt.clear_bindings();
        let guard = ResetOnDrop(stmt);
        BindArgs::Positional(args).apply(&mut *guard.0)?;
        match guard.0.step(deadline)? {
            StepResult::Row => Ok(read(&*guard.0)),
            StepResult::Done => Err(crate::error::Error::InvalidCursorState),
        }
    }

    /// Binds and steps `sql` once per row, on one compiled statement, and
    /// sums the per-row change counts.
    pub fn execute_batch_for_changed_row_count<I>(&mut self, sql: &str, rows: I) -> Result<i64>
    where
        I: IntoIterator,
        I::Item: AsRef<[Value]>,
    {
        let result = self.batch_inner(sql, rows);
        self.note(result)
    }

    fn batch_inner<I>(&mut self, sql: &str, rows: I) -> Result<i64>
    where
        I: IntoIterator,
        I::Item: AsRef<[Value]>,
    {
        let kind = classify(sql);
        self.check_writable(kind)?;
        if kind.is_transactional() || !kind.is_cacheable() {
            return Err(misuse("statement cannot be executed as a batch"));
        }
        let deadline = self.deadline();
        self.touch();
        let raw = &self.raw;
        let stmt = self
            .statements
            .get_or_compile(sql, || StatementHandle::prepare(raw, sql, true))?;
        let guard = ResetOnDrop(stmt);
        let mut total = 0i64;
        for row in rows {
            guard.0.reset();
            guard.0.clear_bindings();
            guard.0.bind_all(row.as_ref())?;
            guard.0.step(deadline)?;
            total += raw.changes();
        }
        Ok(total)
    }

    /// Compiles (through the cache), binds, and hands back a lazy cursor. The
    /// cursor borrows this connection until it is dropped.
    pub fn query(&mut self, sql: &str, args: &[Value]) -> Result<Cursor<'_>> {
        self.query_inner(sql, BindArgs::Positional(args))
    }

    pub fn query_named(&mut self, sql: &str, args: &[(&str, Value)]) -> Result<Cursor<'_>> {
        self.query_inner(sql, BindArgs::Named(args))
    }

    fn query_inner(&mut self, sql: &str, args: BindArgs<'_>) -> Result<Cursor<'_>> {
        let kind = classify(sql);
        self.check_writable(kind)?;
        if kind.is_transactional() || !kind.is_cacheable() {
            return Err(misuse("statement cannot produce a result set"));
        }
        let deadline = self.deadline();
        self.touch();
        let raw = &self.raw;
        let stmt = self
            .statements
            .get_or_compile(sql, || StatementHandle::prepare(raw, sql, true))?;
        stmt.reset();
        stmt.clear_bindings();
        args.apply(stmt)?;
        Ok(Cursor::new(stmt, &mut self.poisoned, deadline))
    }

    /// ATTACH and UNPREPARED statements bypass the cache: compiled fresh,
    /// stepped, finalized.
    fn run_unprepared(&mut self, sql: &str, args: BindArgs<'_>) -> Result<()> {
        let deadline = self.deadline();
        self.touch();
        let mut stmt = StatementHandle::prepare(&self.raw, sql, false)?;
        args.apply(&mut stmt)?;
        stmt.step(deadline)?;
        Ok(())
    }

    fn run_cached(&mut self, sql: &str, args: BindArgs<'_>) -> Result<StepResult> {
        let deadline = self.deadline();
        self.touch();
        let raw = &self.raw;
        let stmt = self
            .statements
            .get_or_compile(sql, || StatementHandle::prepare(raw, sql, true))?;
        stmt.reset();
        stmt.clear_bindings();
        let guard = ResetOnDrop(stmt);
        args.apply(&mut *guard.0)?;
        guard.0.step(deadline)
    }

    /// Steps fixed transaction-control text through the cache.
    fn step_simple(&mut self, sql: &str) -> Result<()> {
        let deadline = self.deadline();
        self.touch();
        let raw = &self.raw;
        let stmt = self
            .statements
            .get_or_compile(sql, || StatementHandle::prepare(raw, sql, true))?;
        stmt.reset();
        stmt.clear_bindings();
        let guard = ResetOnDrop(stmt);
        guard.0.step(deadline).map(|_| ())
    }

    pub fn begin_deferred(&mut self) -> Result<()> {
        self.begin(TransactionMode::Deferred)
    }

    pub fn begin_immediate(&mut self) -> Result<()> {
        self.begin(TransactionMode::Immediate)
    }

    pub fn begin_exclusive(&mut self) -> Result<()> {
        self.begin(TransactionMode::Exclusive)
    }

    pub fn begin(&mut self, mode: TransactionMode) -> Result<()> {
        let result = self.begin_internal(mode, mode.begin_sql());
        self.note(result)
    }

    fn begin_from_sql(&mut self, sql: &str) -> Result<()> {
        let mode = infer_mode(sql);
        let result = self.begin_internal(mode, sql);
        self.note(result)
    }

    fn begin_internal(&mut self, mode: TransactionMode, sql: &str) -> Result<()> {
        if self.transaction.depth == 0 {
            if mode.is_write() && self.role == ConnectionRole::ReadOnly {
                return Err(misuse("write transaction on a read-only connection"));
            }
            self.step_simple(sql)?;
            self.transaction = TransactionState {
                depth: 1,
                mode,
                successful: false,
                aborted: false,
            };
            return Ok(());
        }
        if mode.is_write() && !self.transaction.mode.is_write() {
            return Err(misuse(
                "cannot upgrade a read transaction to a write transaction",
            ));
        }
        // Nested begins only bump the depth; no native BEGIN is re-issued.
        self.transaction.depth += 1;
        Ok(())
    }

    /// Marks the outermost transaction as successful. Calling twice, or
    /// outside a transaction, is misuse.
    pub fn set_successful(&mut self) -> Result<()> {
        if self.transaction.depth == 0 {
            return Err(misuse("no transaction in progress"));
        }
        if self.transaction.successful {
            return Err(misuse("transaction already marked successful"));
        }
        self.transaction.successful = true;
        Ok(())
    }

    /// Ends one transaction level. Only the 1 → 0 transition runs a native
    /// COMMIT (successful and not aborted) or ROLLBACK.
    pub fn end(&mut self) -> Result<()> {
        if self.transaction.depth == 0 {
            return Err(misuse("no transaction in progress"));
        }
        if self.transaction.depth > 1 {
            self.transaction.depth -= 1;
            return Ok(());
        }
        let commit = self.transaction.successful && !self.transaction.aborted;
        let result = self.step_simple(if commit { "COMMIT" } else { "ROLLBACK" });
        self.transaction = TransactionState::default();
        self.note(result)
    }

    /// Raw COMMIT/END/ROLLBACK text routed in from execute().
    fn end_from_sql(&mut self, sql: &str, commit: bool) -> Result<()> {
        if self.transaction.depth == 0 {
            return Err(misuse("no transaction in progress"));
        }
        if self.transaction.depth > 1 {
            self.transaction.depth -= 1;
            if !commit {
                self.transaction.aborted = true;
            }
            return Ok(());
        }
        // A nested rollback forces the outermost end to roll back, whatever
        // text arrives here.
        let sql = if commit && self.transaction.aborted {
            "ROLLBACK"
        } else {
            sql
        };
        let result = self.step_simple(sql);
        self.transaction = TransactionState::default();
        result
    }

    pub fn evict_statement(&mut self, sql: &str) -> bool {
        self.statements.evict(sql)
    }

    pub fn evict_all_statements(&mut self) {
        self.statements.evict_all();
    }

    /// Hygiene applied when the pool takes the connection back. A connection
    /// returned with an open transaction is rolled back so the next borrower
    /// starts clean.
    pub(crate) fn reset_for_reuse(&mut self) {
        if self.transaction.depth > 0 || !self.raw.is_autocommit() {
            log::warn!(
                "connection {} released with an open transaction; rolling back",
                self.id
            );
            if let Err(error) = self.raw.exec("ROLLBACK") {
                log::warn!("connection {}: rollback on release failed: {error}", self.id);
            }
            self.transaction = TransactionState::default();
        }
        self.touch();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Cached statements must be finalized before the database handle
        // closes.
        self.statements.evict_all();
        self.raw.close();
        log::debug!("connection {} closed", self.id);
    }
}

fn infer_mode(sql: &str) -> TransactionMode {
    let upper = sql.to_ascii_uppercase();
    if upper.contains("EXCLUSIVE") {
        TransactionMode::Exclusive
    } else if upper.contains("IMMEDIATE") {
        TransactionMode::Immediate
    } else {
        TransactionMode::Deferred
    }
}
