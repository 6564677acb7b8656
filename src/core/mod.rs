//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Records (signed product registrations)
//! - Blocks (merkle root, proof of work, genesis)
//! - Ledger (chain, pending pool, validation, lookup)
//! - Shared ledger handle (single writer, off-lock mining, persistence)

pub mod block;
pub mod ledger;
pub mod record;
pub mod shared;

pub use block::{Block, BlockError, PowTemplate, GENESIS_PREVIOUS_HASH};
pub use ledger::{
    ChainViolation, IntegrityCheck, Ledger, LedgerConfig, LedgerError, LedgerStats, ProductEntry,
    RecordLocation, ValidationResult, DEFAULT_DIFFICULTY,
};
pub use record::{
    ProductFields, ProductPayload, ProductRegistration, Record, RecordError, GENESIS_MANUFACTURER,
    GENESIS_TIMESTAMP,
};
pub use shared::SharedLedger;
