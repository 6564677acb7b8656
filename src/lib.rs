//! Provenance ledger: a single-node, append-only product authenticity ledger
//!
//! This crate provides:
//! - Canonical SHA-256 content hashing of structured records
//! - Per-manufacturer secp256k1 key pairs signing every registration
//! - Merkle roots over each block's records
//! - Proof of work with a leading-zero hex difficulty, bounded and cancellable
//! - Full chain validation reporting the first violated check
//! - Atomic JSON snapshot persistence with rotating backups
//! - A REST/WebSocket API and a CLI over the same ledger
//!
//! # Example
//!
//! ```rust
//! use provenance_ledger::core::{Ledger, ProductRegistration};
//!
//! let mut ledger = Ledger::new(2).unwrap();
//!
//! let record = ledger
//!     .submit(ProductRegistration::new("Widget", "Acme", "B-001", "2025-03-01"))
//!     .unwrap();
//!
//! let (block, stats) = ledger.mine_pending(2).unwrap();
//! println!("Mined block {} in {}ms", block.index, stats.time_ms);
//!
//! let found = ledger.find_record(record.product_id()).unwrap();
//! assert_eq!(found.block.index, 1);
//! assert!(ledger.validate_chain().is_valid());
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{
    Block, Ledger, LedgerConfig, LedgerError, ProductRegistration, Record, SharedLedger,
    ValidationResult, DEFAULT_DIFFICULTY,
};
pub use crypto::{KeyPair, KeyRegistry};
pub use mining::{Miner, MiningError};
pub use storage::{Storage, StorageConfig, StorageError};
