//! Record types persisted by the cache

use chrono::{DateTime, Utc};

/// Chain height. Fits losslessly in an SQLite INTEGER.
pub type Height = u32;

/// The singleton tip pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub height: Height,
    pub updated_at: DateTime<Utc>,
}

/// A stored block row. `payload` is the serialized compact block, kept opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub height: Height,
    pub hash: String,
    /// Hash of the block expected at `height - 1`.
    pub prev_hash: String,
    pub sapling_flag: bool,
    pub payload: Vec<u8>,
}

/// A stored raw transaction, loosely tied to its parent block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub block_height: Height,
    pub block_hash: String,
    pub tx_index: u32,
    pub tx_hash: String,
    pub payload: Vec<u8>,
}

/// One item produced by a block range stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedBlock {
    pub height: Height,
    pub payload: Vec<u8>,
}
