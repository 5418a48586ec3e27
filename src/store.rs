//! SQLite-backed block and transaction cache
//!
//! [`CacheDb`] is the single handle every operation goes through. It is cheap to
//! clone; clones share one connection. Operations are synchronous and may block on
//! the database lock or on disk I/O, so async callers should run them on the
//! blocking pool.
//!
//! Every operation takes a [`CancellationToken`]. A fired token is observed before
//! storage is touched and while waiting for the connection lock.

mod blocks;
mod chain_state;
mod ingest;
mod schema;
mod transactions;

pub use schema::SCHEMA_VERSION;

use crate::config::{CacheConfig, LimitsConfig};
use crate::error::{Result, StorageContext, StoreError};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Interval at which a waiter on the connection lock re-checks its cancellation token.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Clone)]
pub struct CacheDb {
    conn: Arc<Mutex<Connection>>,
    limits: LimitsConfig,
}

impl std::fmt::Debug for CacheDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDb").field("limits", &self.limits).finish_non_exhaustive()
    }
}

impl CacheDb {
    /// Opens (or creates) the on-disk store at `config.database.path`.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let path = Path::new(&config.database.path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .context(|| format!("opening database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(config.database.busy_timeout_ms))
            .context(|| "setting busy timeout".to_string())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context(|| "enabling WAL journal".to_string())?;

        info!(target: "store", path = %path.display(), "Opened block cache");
        Self::from_connection(conn, config)
    }

    /// Opens a private in-memory store. Contents vanish when the last clone drops.
    pub fn open_in_memory(config: &CacheConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context(|| "opening in-memory database".to_string())?;
        Self::from_connection(conn, config)
    }

    fn from_connection(mut conn: Connection, config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        schema::initialize(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            limits: config.limits.clone(),
        })
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Acquires the shared connection, giving up once `cancel` fires.
    fn lock(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, Connection>> {
        loop {
            ensure_live(cancel)?;
            if let Some(guard) = self.conn.try_lock_for(LOCK_POLL_INTERVAL) {
                ensure_live(cancel)?;
                return Ok(guard);
            }
        }
    }
}

pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn test_cancelled_token_short_circuits() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(db.lock(&cancel), Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_lock_wait_observes_cancellation() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        let _held = db.conn.lock();

        let waiter = {
            let db = db.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || db.lock(&cancel).map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(60));
        cancel.cancel();

        assert!(matches!(waiter.join().unwrap(), Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = CacheConfig::default();
        config.limits.stream_buffer = 0;
        assert!(matches!(CacheDb::open_in_memory(&config), Err(StoreError::Config(_))));
    }
}
