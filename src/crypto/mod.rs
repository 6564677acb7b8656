//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing over canonical JSON
//! - ECDSA manufacturer keys (secp256k1) and the key registry
//! - Merkle root calculation

pub mod hash;
pub mod keys;
pub mod merkle;

pub use hash::{
    canonical_json, hash_value, meets_difficulty, sha256, sha256_hex, sha256_hex_concat,
    DIGEST_HEX_LEN,
};
pub use keys::{
    payload_digest, public_key_from_hex, verify_signature, verify_with_public_key, KeyError,
    KeyPair, KeyRegistry, ManufacturerInfo, ManufacturerKey,
};
pub use merkle::{calculate_merkle_root, hash_pair, EMPTY_ROOT};
