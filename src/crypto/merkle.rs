//! Merkle tree implementation for record verification
//!
//! Folds an ordered list of hex digests into a single root. Each level is
//! padded by duplicating its last digest when odd, then adjacent pairs are
//! hashed over the concatenation of their hex forms.

use super::hash::sha256_hex;

/// Root of an empty leaf list (SHA-256 of `"empty"`)
pub const EMPTY_ROOT: &str = "2e1cfa82b035c26cbbbdae632cea070514eb8b773f616aaeaf668e2f0be8f10d";

/// Hash two sibling digests into their parent
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut combined = String::with_capacity(left.len() + right.len());
    combined.push_str(left);
    combined.push_str(right);
    sha256_hex(combined.as_bytes())
}

/// Calculate the merkle root from a list of hex-encoded leaf hashes.
///
/// A single leaf is its own root.
pub fn calculate_merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return EMPTY_ROOT.to_string();
    }

    let mut current_level: Vec<String> = leaves.to_vec();

    while current_level.len() > 1 {
        if current_level.len() % 2 != 0 {
            if let Some(last) = current_level.last().cloned() {
                current_level.push(last);
            }
        }

        current_level = current_level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect();
    }

    current_level.remove(0)
}
