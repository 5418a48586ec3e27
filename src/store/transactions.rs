//! Raw transaction rows.
//!
//! Rows are append-only and never deduplicated. When several rows match a lookup,
//! the most recently inserted one is returned.

use super::CacheDb;
use crate::error::{Result, StorageContext, StoreError};
use crate::types::{Height, TxRecord};
use rusqlite::{params, OptionalExtension, Params, Row};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SELECT_TX: &str =
    "SELECT block_height, block_hash, tx_index, tx_hash, payload FROM transactions";

fn tx_from_row(row: &Row<'_>) -> rusqlite::Result<TxRecord> {
    Ok(TxRecord {
        block_height: row.get(0)?,
        block_hash: row.get(1)?,
        tx_index: row.get(2)?,
        tx_hash: row.get(3)?,
        payload: row.get(4)?,
    })
}

impl CacheDb {
    pub fn store_transaction(&self, cancel: &CancellationToken, tx: &TxRecord) -> Result<()> {
        let conn = self.lock(cancel)?;
        conn.execute(
            "INSERT INTO transactions (block_height, block_hash, tx_index, tx_hash, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tx.block_height, tx.block_hash, tx.tx_index, tx.tx_hash, tx.payload],
        )
        .context(|| {
            format!(
                "writing transaction {} at {}:{}",
                tx.tx_hash, tx.block_height, tx.tx_index
            )
        })?;
        debug!(
            target: "tx_store",
            height = tx.block_height,
            index = tx.tx_index,
            hash = %tx.tx_hash,
            "Stored transaction"
        );
        Ok(())
    }

    pub fn get_tx_by_hash(&self, cancel: &CancellationToken, tx_hash: &str) -> Result<TxRecord> {
        self.find_tx(cancel, "tx_hash = ?1", params![tx_hash], || {
            format!("transaction {}", tx_hash)
        })
    }

    pub fn get_tx_by_height_and_index(
        &self,
        cancel: &CancellationToken,
        height: Height,
        index: u32,
    ) -> Result<TxRecord> {
        self.find_tx(
            cancel,
            "block_height = ?1 AND tx_index = ?2",
            params![height, index],
            || format!("transaction {} in block at height {}", index, height),
        )
    }

    pub fn get_tx_by_hash_and_index(
        &self,
        cancel: &CancellationToken,
        block_hash: &str,
        index: u32,
    ) -> Result<TxRecord> {
        self.find_tx(
            cancel,
            "block_hash = ?1 AND tx_index = ?2",
            params![block_hash, index],
            || format!("transaction {} in block {}", index, block_hash),
        )
    }

    /// Removes every transaction filed under `height`. Returns the number removed.
    pub fn delete_transactions_at(&self, cancel: &CancellationToken, height: Height) -> Result<usize> {
        let conn = self.lock(cancel)?;
        let removed = conn
            .execute("DELETE FROM transactions WHERE block_height = ?1", params![height])
            .context(|| format!("deleting transactions of block {}", height))?;
        debug!(target: "tx_store", height, removed, "Deleted transactions");
        Ok(removed)
    }

    fn find_tx<P: Params>(
        &self,
        cancel: &CancellationToken,
        filter: &str,
        params: P,
        describe: impl Fn() -> String,
    ) -> Result<TxRecord> {
        let conn = self.lock(cancel)?;
        conn.query_row(
            &format!("{} WHERE {} ORDER BY id DESC LIMIT 1", SELECT_TX, filter),
            params,
            tx_from_row,
        )
        .optional()
        .context(|| format!("reading {}", describe()))?
        .ok_or_else(|| StoreError::not_found(describe()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::memory_db;
    use super::*;

    fn tx(height: Height, index: u32, hash: &str) -> TxRecord {
        TxRecord {
            block_height: height,
            block_hash: format!("block-{}", height),
            tx_index: index,
            tx_hash: hash.to_string(),
            payload: hash.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_three_lookup_paths_reach_same_row() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        let record = tx(42, 3, "abcd");
        db.store_transaction(&cancel, &record).unwrap();
        db.store_transaction(&cancel, &tx(42, 4, "ef01")).unwrap();

        assert_eq!(db.get_tx_by_hash(&cancel, "abcd").unwrap(), record);
        assert_eq!(db.get_tx_by_height_and_index(&cancel, 42, 3).unwrap(), record);
        assert_eq!(db.get_tx_by_hash_and_index(&cancel, "block-42", 3).unwrap(), record);
    }

    #[test]
    fn test_missing_transaction_is_not_found() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_transaction(&cancel, &tx(1, 0, "abcd")).unwrap();

        assert!(db.get_tx_by_hash(&cancel, "0000").unwrap_err().is_not_found());
        assert!(db.get_tx_by_height_and_index(&cancel, 1, 1).unwrap_err().is_not_found());
        assert!(db
            .get_tx_by_hash_and_index(&cancel, "block-2", 0)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_duplicates_are_kept_and_latest_wins() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_transaction(&cancel, &tx(9, 0, "abcd")).unwrap();
        let newer = TxRecord {
            payload: b"second".to_vec(),
            ..tx(9, 0, "abcd")
        };
        db.store_transaction(&cancel, &newer).unwrap();

        assert_eq!(db.get_tx_by_height_and_index(&cancel, 9, 0).unwrap(), newer);
        assert_eq!(db.delete_transactions_at(&cancel, 9).unwrap(), 2);
    }

    #[test]
    fn test_block_delete_does_not_cascade() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_transaction(&cancel, &tx(3, 0, "abcd")).unwrap();

        db.delete_block(&cancel, 3).unwrap();
        assert!(db.get_tx_by_hash(&cancel, "abcd").is_ok());
    }
}
