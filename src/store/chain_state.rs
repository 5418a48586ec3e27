//! The singleton tip pointer.

use super::CacheDb;
use crate::error::{Result, StorageContext, StoreError};
use crate::types::{ChainState, Height};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(super) fn read_state(conn: &Connection) -> rusqlite::Result<Option<ChainState>> {
    conn.query_row(
        "SELECT height, updated_at FROM chain_state WHERE id = 1",
        [],
        |row| {
            let secs: i64 = row.get(1)?;
            let updated_at = DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, secs))?;
            Ok(ChainState {
                height: row.get(0)?,
                updated_at,
            })
        },
    )
    .optional()
}

pub(super) fn read_height(conn: &Connection) -> rusqlite::Result<Option<Height>> {
    conn.query_row("SELECT height FROM chain_state WHERE id = 1", [], |row| row.get(0))
        .optional()
}

/// Upserts the pointer. No monotonicity check happens here.
pub(super) fn write_height(conn: &Connection, height: Height) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chain_state (id, height, updated_at) VALUES (1, ?1, ?2)
         ON CONFLICT (id) DO UPDATE SET height = excluded.height, updated_at = excluded.updated_at",
        params![height, Utc::now().timestamp()],
    )?;
    Ok(())
}

pub(super) fn clear(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM chain_state WHERE id = 1", [])?;
    Ok(())
}

impl CacheDb {
    /// Returns the tip height, or `NotFound` if no block was ever stored.
    pub fn get_current_height(&self, cancel: &CancellationToken) -> Result<Height> {
        let conn = self.lock(cancel)?;
        read_height(&conn)
            .context(|| "reading current height".to_string())?
            .ok_or_else(|| StoreError::not_found("chain state"))
    }

    pub fn get_chain_state(&self, cancel: &CancellationToken) -> Result<ChainState> {
        let conn = self.lock(cancel)?;
        read_state(&conn)
            .context(|| "reading chain state".to_string())?
            .ok_or_else(|| StoreError::not_found("chain state"))
    }

    /// Overwrites the tip pointer unconditionally, lower heights included.
    ///
    /// Ingestion should go through [`CacheDb::store_block`], which only ever moves
    /// the pointer forward.
    pub fn set_current_height(&self, cancel: &CancellationToken, height: Height) -> Result<()> {
        let conn = self.lock(cancel)?;
        write_height(&conn, height).context(|| format!("setting current height to {}", height))?;
        debug!(target: "chain_state", height, "Set current height");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::memory_db;
    use super::*;

    #[test]
    fn test_empty_store_has_no_height() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        assert!(db.get_current_height(&cancel).unwrap_err().is_not_found());
        assert!(db.get_chain_state(&cancel).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_current_height_upserts_without_monotonicity() {
        let db = memory_db();
        let cancel = CancellationToken::new();

        db.set_current_height(&cancel, 50).unwrap();
        assert_eq!(db.get_current_height(&cancel).unwrap(), 50);

        db.set_current_height(&cancel, 20).unwrap();
        assert_eq!(db.get_current_height(&cancel).unwrap(), 20);

        let state = db.get_chain_state(&cancel).unwrap();
        assert_eq!(state.height, 20);
        assert!(state.updated_at <= Utc::now());
    }

    #[test]
    fn test_cleared_pointer_reads_as_empty() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.set_current_height(&cancel, 3).unwrap();

        clear(&db.lock(&cancel).unwrap()).unwrap();
        assert!(db.get_current_height(&cancel).unwrap_err().is_not_found());
    }
}
