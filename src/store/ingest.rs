//! The write path: block row and tip pointer committed as one unit.

use super::{blocks, chain_state, CacheDb};
use crate::error::{Result, StorageContext, StoreError};
use crate::types::{BlockRecord, Height};
use rusqlite::{params, Connection, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Moves the pointer up to `height` if the store is empty or `height` is above it.
/// Returns the previous tip when the pointer moved.
fn advance_tip(conn: &Connection, height: Height) -> rusqlite::Result<Option<Option<Height>>> {
    let current = chain_state::read_height(conn)?;
    match current {
        Some(tip) if tip >= height => Ok(None),
        _ => {
            chain_state::write_height(conn, height)?;
            Ok(Some(current))
        }
    }
}

impl CacheDb {
    /// Stores or replaces the block at `block.height` and advances the tip if needed.
    ///
    /// Both steps commit together: on any failure neither the row nor the pointer
    /// change is visible. Storing below the tip replaces that row only, which is how
    /// reorgs under the tip are applied.
    pub fn store_block(&self, cancel: &CancellationToken, block: &BlockRecord) -> Result<()> {
        let height = block.height;
        let mut conn = self.lock(cancel)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(|| format!("starting write of block {}", height))?;

        blocks::upsert(&tx, block)
            .context(|| format!("writing block {} ({})", height, block.hash))?;

        let advanced = advance_tip(&tx, height).map_err(|source| {
            warn!(target: "store", height, %source, "Tip update failed, rolling back block write");
            StoreError::Consistency { height, source }
        })?;

        tx.commit()
            .context(|| format!("committing block {}", height))?;

        match advanced {
            Some(previous) => {
                debug!(target: "store", height, ?previous, hash = %block.hash, "Advanced tip")
            }
            None => {
                info!(target: "store", height, hash = %block.hash, "Replaced block below tip")
            }
        }
        Ok(())
    }

    /// Removes every block above `height`, their transactions, and lowers the tip.
    ///
    /// Runs as one transaction. A tip above `height` is moved to the highest block
    /// still stored; when none remains the store becomes empty. Returns the number
    /// of blocks removed.
    pub fn rollback_to(&self, cancel: &CancellationToken, height: Height) -> Result<usize> {
        let mut conn = self.lock(cancel)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(|| format!("starting rollback to {}", height))?;

        let removed_blocks = tx
            .execute("DELETE FROM blocks WHERE height > ?1", params![height])
            .context(|| format!("deleting blocks above {}", height))?;
        let removed_txs = tx
            .execute("DELETE FROM transactions WHERE block_height > ?1", params![height])
            .context(|| format!("deleting transactions above {}", height))?;

        let repair = || -> rusqlite::Result<Option<Height>> {
            match chain_state::read_height(&tx)? {
                Some(tip) if tip > height => {
                    let remaining: Option<Height> =
                        tx.query_row("SELECT MAX(height) FROM blocks", [], |row| row.get(0))?;
                    match remaining {
                        Some(new_tip) => chain_state::write_height(&tx, new_tip)?,
                        None => chain_state::clear(&tx)?,
                    }
                    Ok(remaining)
                }
                tip => Ok(tip),
            }
        };
        let tip = repair().map_err(|source| StoreError::Consistency { height, source })?;

        tx.commit()
            .context(|| format!("committing rollback to {}", height))?;

        info!(
            target: "store",
            height,
            removed_blocks,
            removed_txs,
            ?tip,
            "Rolled back chain"
        );
        Ok(removed_blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{block, memory_db};
    use super::*;
    use crate::types::TxRecord;

    fn tx_at(height: Height, index: u32) -> TxRecord {
        TxRecord {
            block_height: height,
            block_hash: block(height, "a").hash,
            tx_index: index,
            tx_hash: format!("tx-{}-{}", height, index),
            payload: vec![height as u8, index as u8],
        }
    }

    #[test]
    fn test_first_write_populates_pointer() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_block(&cancel, &block(100, "a")).unwrap();
        assert_eq!(db.get_current_height(&cancel).unwrap(), 100);
    }

    #[test]
    fn test_pointer_never_regresses_through_store_block() {
        let db = memory_db();
        let cancel = CancellationToken::new();

        db.store_block(&cancel, &block(10, "a")).unwrap();
        db.store_block(&cancel, &block(12, "a")).unwrap();
        assert_eq!(db.get_current_height(&cancel).unwrap(), 12);

        db.store_block(&cancel, &block(11, "b")).unwrap();
        assert_eq!(db.get_current_height(&cancel).unwrap(), 12);
        assert_eq!(db.get_block(&cancel, 11).unwrap(), block(11, "b").payload);
    }

    #[test]
    fn test_failed_pointer_update_rolls_back_block_row() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_block(&cancel, &block(1, "a")).unwrap();

        db.exec_raw(
            "CREATE TRIGGER reject_tip BEFORE UPDATE ON chain_state
             BEGIN SELECT RAISE(ABORT, 'tip locked'); END;",
        );

        let err = db.store_block(&cancel, &block(2, "a")).unwrap_err();
        assert!(matches!(err, StoreError::Consistency { height: 2, .. }));
        assert!(db.get_block(&cancel, 2).unwrap_err().is_not_found());
        assert_eq!(db.get_current_height(&cancel).unwrap(), 1);

        // Writes below the tip never touch chain_state, so they still succeed.
        db.store_block(&cancel, &block(1, "b")).unwrap();
        assert_eq!(db.get_block(&cancel, 1).unwrap(), block(1, "b").payload);
    }

    #[test]
    fn test_cancelled_write_changes_nothing() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(db.store_block(&cancel, &block(1, "a")).unwrap_err().is_cancelled());

        let live = CancellationToken::new();
        assert!(db.get_block(&live, 1).unwrap_err().is_not_found());
        assert!(db.get_current_height(&live).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rollback_removes_blocks_and_transactions_and_lowers_tip() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        for height in 100..=105 {
            db.store_block(&cancel, &block(height, "a")).unwrap();
            db.store_transaction(&cancel, &tx_at(height, 0)).unwrap();
        }

        assert_eq!(db.rollback_to(&cancel, 102).unwrap(), 3);

        assert_eq!(db.get_current_height(&cancel).unwrap(), 102);
        assert!(db.get_block(&cancel, 103).unwrap_err().is_not_found());
        assert!(db.get_tx_by_hash(&cancel, "tx-104-0").unwrap_err().is_not_found());
        assert!(db.get_tx_by_hash(&cancel, "tx-102-0").is_ok());
    }

    #[test]
    fn test_rollback_over_gap_picks_highest_remaining() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_block(&cancel, &block(5, "a")).unwrap();
        db.store_block(&cancel, &block(9, "a")).unwrap();

        db.rollback_to(&cancel, 7).unwrap();
        assert_eq!(db.get_current_height(&cancel).unwrap(), 5);
    }

    #[test]
    fn test_rollback_below_everything_empties_store() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_block(&cancel, &block(5, "a")).unwrap();

        assert_eq!(db.rollback_to(&cancel, 2).unwrap(), 1);
        assert!(db.get_current_height(&cancel).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rollback_at_or_above_tip_keeps_pointer() {
        let db = memory_db();
        let cancel = CancellationToken::new();
        db.store_block(&cancel, &block(5, "a")).unwrap();

        assert_eq!(db.rollback_to(&cancel, 5).unwrap(), 0);
        assert_eq!(db.get_current_height(&cancel).unwrap(), 5);
    }
}
