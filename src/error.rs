//! Error types for the compact block cache

use thiserror::Error;

/// Errors surfaced by the cache store and the range streamer.
///
/// Mapping these onto transport statuses is left to the serving layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The lookup key matched no row.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The requested height span exceeds the configured cap. Raised before any read.
    #[error("Range {start}..={end} spans more than {max} heights")]
    RangeTooLarge { start: u32, end: u32, max: u32 },

    /// The range end lies below its start.
    #[error("Invalid range: end {end} is below start {start}")]
    InvalidRange { start: u32, end: u32 },

    /// The SQLite engine failed while performing `context`.
    #[error("Storage error while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The pointer-advance step of a block write failed. The write was rolled back.
    #[error("Chain state update failed for block {height}: {source}")]
    Consistency {
        height: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// The on-disk schema was written by a different version of this crate.
    #[error("Schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: String, expected: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    /// The range producer went away without sending a terminal event.
    #[error("Block range stream ended without a terminal event")]
    StreamAborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

/// Attaches operation context to raw SQLite failures.
pub(crate) trait StorageContext<T> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> StorageContext<T> for std::result::Result<T, rusqlite::Error> {
    fn context(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| StoreError::Storage { context: context(), source })
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, StoreError>;
