//! Height-keyed block rows.

use super::CacheDb;
use crate::error::{Result, StorageContext, StoreError};
use crate::types::{BlockRecord, Height, StreamedBlock};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SELECT_BLOCK: &str = "SELECT height, hash, prev_hash, sapling_flag, payload FROM blocks";

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<BlockRecord> {
    Ok(BlockRecord {
        height: row.get(0)?,
        hash: row.get(1)?,
        prev_hash: row.get(2)?,
        sapling_flag: row.get(3)?,
        payload: row.get(4)?,
    })
}

/// Inserts the row at `block.height`, replacing whatever was there wholesale.
pub(super) fn upsert(conn: &Connection, block: &BlockRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO blocks (height, hash, prev_hash, sapling_flag, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            block.height,
            block.hash,
            block.prev_hash,
            block.sapling_flag,
            block.payload,
        ],
    )?;
    Ok(())
}

impl CacheDb {
    /// Writes a block row without touching the tip pointer.
    ///
    /// Most callers want [`CacheDb::store_block`] instead.
    pub fn store_block_record(&self, cancel: &CancellationToken, block: &BlockRecord) -> Result<()> {
        let conn = self.lock(cancel)?;
        upsert(&conn, block).context(|| format!("writing block {} ({})", block.height, block.hash))?;
        debug!(target: "block_store", height = block.height, hash = %block.hash, "Stored block record");
        Ok(())
    }

    /// Returns the payload stored at `height`.
    pub fn get_block(&self, cancel: &CancellationToken, height: Height) -> Result<Vec<u8>> {
        let conn = self.lock(cancel)?;
        conn.query_row(
            "SELECT payload FROM blocks WHERE height = ?1",
            params![height],
            |row| row.get(0),
        )
        .optional()
        .context(|| format!("reading block {}", height))?
        .ok_or_else(|| StoreError::not_found(format!("block at height {}", height)))
    }

    pub fn get_block_record(&self, cancel: &CancellationToken, height: Height) -> Result<BlockRecord> {
        let conn = self.lock(cancel)?;
        conn.query_row(
            &format!("{} WHERE height = ?1", SELECT_BLOCK),
            params![height],
            block_from_row,
        )
        .optional()
        .context(|| format!("reading block {}", height))?
        .ok_or_else(|| StoreError::not_found(format!("block at height {}", height)))
    }

    /// Looks a block up by hash. When several heights carry the hash, the highest wins.
    pub fn get_block_by_hash(&self, cancel: &CancellationToken, hash: &str) -> Result<Vec<u8>> {
        self.get_block_record_by_hash(cancel, hash).map(|block| block.payload)
    }

    pub fn get_block_record_by_hash(
        &self,
        cancel: &CancellationToken,
        hash: &str,
    ) -> Result<BlockRecord> {
        let conn = self.lock(cancel)?;
        conn.query_row(
            &format!("{} WHERE hash = ?1 ORDER BY height DESC LIMIT 1", SELECT_BLOCK),
            params![hash],
            block_from_row,
        )
        .optional()
        .context(|| format!("reading block {}", hash))?
        .ok_or_else(|| StoreError::not_found(format!("block with hash {}", hash)))
    }

    /// Returns only the hash at `height`, skipping the payload.
    pub fn get_block_hash(&self, cancel: &CancellationToken, height: Height) -> Result<String> {
        let conn = self.lock(cancel)?;
        conn.query_row(
            "SELECT hash FROM blocks WHERE height = ?1",
            params![height],
            |row| row.get(0),
        )
        .optional()
        .context(|| format!("reading hash of block {}", height))?
        .ok_or_else(|| StoreError::not_found(format!("block at height {}", height)))
    }

    /// Hard-deletes the row at `height`. Returns whether a row existed.
    ///
    /// Neither the tip pointer nor the block's transactions are touched; see
    /// [`CacheDb::rollback_to`] for the consistent rollback path.
    pub fn delete_block(&self, cancel: &CancellationToken, height: Height) -> Result<bool> {
        let conn = self.lock(cancel)?;
        let removed = conn
            .execute("DELETE FROM blocks WHERE height = ?1", params![height])
            .context(|| format!("deleting block {}", height))?;
        debug!(target: "block_store", height, removed, "Deleted block");
        Ok(removed > 0)
    }

    /// Single-height read used by the range producer. Missing heights are `None`.
    pub(crate) fn read_streamed_block(
        &self,
        cancel: &CancellationToken,
        height: Height,
    ) -> Result<Option<StreamedBlock>> {
        let conn = self.lock(cancel)?;
        conn.query_row(
            "SELECT payload FROM blocks WHERE height = ?1",
            params![height],
            |row| Ok(StreamedBlock { height, payload: row.get(0)? }),
        )
        .optional()
        .context(|| format!("reading block {} for range", height))
    }
}
