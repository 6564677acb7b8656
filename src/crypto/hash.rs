//! Cryptographic hashing utilities for the ledger
//!
//! Provides SHA-256 based hashing used for record IDs, product IDs,
//! block hashes and merkle tree nodes. Structured values are hashed over
//! their canonical JSON form so the digest never depends on field order.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Width of a digest rendered as lowercase hex
pub const DIGEST_HEX_LEN: usize = 64;

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Computes SHA-256 over several byte slices as if concatenated
pub fn sha256_hex_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Serialize a value to canonical JSON (object keys sorted by name).
///
/// Going through `serde_json::Value` sorts every nested object, because its
/// map type is ordered by key.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// Hash any serializable value over its canonical JSON form
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Checks if a hex digest meets the difficulty target.
/// The digest must start with `difficulty` `'0'` characters.
pub fn meets_difficulty(hash_hex: &str, difficulty: usize) -> bool {
    hash_hex.len() >= difficulty && hash_hex.bytes().take(difficulty).all(|b| b == b'0')
}
