//! Versioned table layout and its initialization.

use crate::error::{Result, StorageContext, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

/// Version of the table layout below. Bump on any incompatible change.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";

const SCHEMA_V1: &str = "
    CREATE TABLE chain_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        height INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE blocks (
        height INTEGER PRIMARY KEY,
        hash TEXT NOT NULL,
        prev_hash TEXT NOT NULL,
        sapling_flag INTEGER NOT NULL,
        payload BLOB NOT NULL
    );
    CREATE INDEX blocks_by_hash ON blocks (hash);

    CREATE TABLE transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        block_height INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        tx_index INTEGER NOT NULL,
        tx_hash TEXT NOT NULL,
        payload BLOB NOT NULL
    );
    CREATE INDEX transactions_by_hash ON transactions (tx_hash);
    CREATE INDEX transactions_by_height ON transactions (block_height, tx_index);
    CREATE INDEX transactions_by_block_hash ON transactions (block_hash, tx_index);
";

/// Creates the schema on a fresh database, or checks the recorded version on an existing one.
pub(super) fn initialize(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )
    .context(|| "creating metadata table".to_string())?;

    let found: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context(|| "reading schema version".to_string())?;

    match found {
        None => {
            let tx = conn
                .transaction()
                .context(|| "starting schema creation".to_string())?;
            tx.execute_batch(SCHEMA_V1)
                .context(|| format!("creating schema v{}", SCHEMA_VERSION))?;
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                params![SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string()],
            )
            .context(|| "recording schema version".to_string())?;
            tx.commit()
                .context(|| "committing schema creation".to_string())?;

            info!(target: "store", version = SCHEMA_VERSION, "Initialized cache schema");
            Ok(())
        }
        Some(version) if version == SCHEMA_VERSION.to_string() => Ok(()),
        Some(version) => Err(StoreError::SchemaMismatch {
            found: version,
            expected: SCHEMA_VERSION,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        initialize(&mut conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('chain_state', 'blocks', 'transactions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_foreign_version_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        conn.execute(
            "UPDATE metadata SET value = '0' WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
        )
        .unwrap();

        match initialize(&mut conn) {
            Err(StoreError::SchemaMismatch { found, expected }) => {
                assert_eq!(found, "0");
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }
}
