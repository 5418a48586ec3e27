//! Compact block cache - local persistence for a compact block streaming service
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Storage
//! - [`store`] - The [`CacheDb`] handle: chain state pointer, block rows, the
//!   atomic write/reorg path, and raw transaction rows (SQLite)
//! - [`types`] - Record types returned by the store
//!
//! ## Streaming
//! - [`stream`] - Cancellable, bounded streaming of block ranges
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Storage
// ============================================================================
pub mod store;
pub mod types;

// ============================================================================
// Streaming
// ============================================================================
pub mod stream;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use config::{load_config, CacheConfig};
pub use error::{Result, StoreError};
pub use store::CacheDb;
pub use stream::BlockRangeStream;
pub use types::{BlockRecord, ChainState, Height, StreamedBlock, TxRecord};
