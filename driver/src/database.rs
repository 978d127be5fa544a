use selekt_core::{JdbcUri, Pool, Result, Session};
use std::sync::Arc;

/// A handle on one pooled database. Cloning is cheap and shares the pool;
/// sessions are per thread of work.
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool>,
}

impl Database {
    /// Opens (creating if necessary) the database named by a
    /// `jdbc:selekt:`/`jdbc:sqlite:` URL. Fails fast on an unparsable URL, an
    /// unusable path, or a wrong key.
    pub fn open(url: &str) -> Result<Database> {
        let uri = JdbcUri::parse(url)?;
        let pool = Pool::open(uri.to_pool_configuration())?;
        log::info!("opened database at {}", uri.path);
        Ok(Database { pool })
    }

    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.pool))
    }

    /// Closes the pool. Idle connections are torn down immediately, lent
    /// ones when their sessions finish.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Reaps connections idle past the pool's idle timeout.
    pub fn close_idle(&self) -> usize {
        self.pool.close_idle()
    }
}
