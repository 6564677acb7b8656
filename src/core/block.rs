//! Block implementation for the ledger
//!
//! A block is an ordered batch of records plus proof-of-work metadata and
//! the merkle root over its records.

use crate::core::record::{Record, RecordError, GENESIS_TIMESTAMP};
use crate::crypto::{calculate_merkle_root, canonical_json, meets_difficulty, sha256_hex_concat};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Previous-hash sentinel carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

const NONCE_KEY: &str = "\"nonce\":";

/// Block errors
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Record error: {0}")]
    Record(#[from] RecordError),
    #[error("Canonical block encoding has no nonce field")]
    MissingNonce,
}

/// Every hashed block field, i.e. all of them except `hash`
#[derive(Serialize)]
struct BlockContent<'a> {
    index: u64,
    timestamp: i64,
    records: &'a [Record],
    previous_hash: &'a str,
    nonce: u64,
    merkle_root: &'a str,
}

/// A block in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain
    pub index: u64,
    /// Assembly time (Unix ms)
    pub timestamp: i64,
    /// Records in submission order
    pub records: Vec<Record>,
    /// Hash of the preceding block
    pub previous_hash: String,
    /// Nonce found by proof of work
    pub nonce: u64,
    /// Merkle root over the record hashes
    pub merkle_root: String,
    /// Hash of every other field
    pub hash: String,
}

impl Block {
    /// Assemble an unmined candidate: merkle root computed, nonce 0, hash unset
    pub fn assemble_candidate(
        records: Vec<Record>,
        previous_hash: String,
        index: u64,
    ) -> Result<Self, BlockError> {
        let merkle_root = Self::calculate_merkle_root(&records)?;

        Ok(Self {
            index,
            timestamp: Utc::now().timestamp_micros(),
            records,
            previous_hash,
            nonce: 0,
            merkle_root,
            hash: String::new(),
        })
    }

    /// Create the genesis block. It is identical on every node and every run.
    pub fn genesis() -> Result<Self, BlockError> {
        let records = vec![Record::genesis()?];
        let merkle_root = Self::calculate_merkle_root(&records)?;

        let mut block = Self {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            records,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            merkle_root,
            hash: String::new(),
        };
        block.hash = block.calculate_hash()?;
        Ok(block)
    }

    /// Calculate the merkle root from records
    pub fn calculate_merkle_root(records: &[Record]) -> Result<String, BlockError> {
        let leaves = records
            .iter()
            .map(Record::hash)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(calculate_merkle_root(&leaves))
    }

    fn content(&self) -> BlockContent<'_> {
        BlockContent {
            index: self.index,
            timestamp: self.timestamp,
            records: &self.records,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
            merkle_root: &self.merkle_root,
        }
    }

    /// Calculate the hash of every field except `hash`
    pub fn calculate_hash(&self) -> Result<String, BlockError> {
        let template = self.pow_template()?;
        Ok(template.hash(self.nonce))
    }

    /// Split the canonical encoding around the nonce so a miner can hash
    /// each candidate nonce without re-serializing the records.
    pub fn pow_template(&self) -> Result<PowTemplate, BlockError> {
        let encoded = canonical_json(&BlockContent {
            nonce: 0,
            ..self.content()
        })?;

        // Keys are sorted, so only `index` and `merkle_root` precede the nonce.
        let start = encoded.find(NONCE_KEY).ok_or(BlockError::MissingNonce)? + NONCE_KEY.len();
        let suffix = encoded
            .get(start + 1..)
            .ok_or(BlockError::MissingNonce)?
            .to_string();
        let mut prefix = encoded;
        prefix.truncate(start);

        Ok(PowTemplate { prefix, suffix })
    }

    /// Check if the stored hash meets the difficulty target
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    /// Verify the block's merkle root
    pub fn verify_merkle_root(&self) -> Result<bool, BlockError> {
        Ok(Self::calculate_merkle_root(&self.records)? == self.merkle_root)
    }

    /// Verify the block hash
    pub fn verify_hash(&self) -> Result<bool, BlockError> {
        Ok(self.calculate_hash()? == self.hash)
    }

    /// Get number of records in this block
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// Canonical block encoding with the nonce cut out
#[derive(Debug, Clone)]
pub struct PowTemplate {
    prefix: String,
    suffix: String,
}

impl PowTemplate {
    /// Block hash for the given nonce
    pub fn hash(&self, nonce: u64) -> String {
        let nonce = nonce.to_string();
        sha256_hex_concat(&[
            self.prefix.as_bytes(),
            nonce.as_bytes(),
            self.suffix.as_bytes(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::ProductRegistration;
    use crate::crypto::{hash_value, KeyRegistry, EMPTY_ROOT};

    fn records(count: usize) -> Vec<Record> {
        let mut registry = KeyRegistry::new();
        registry.get_or_create_keypair("Acme").unwrap();
        (0..count)
            .map(|i| {
                let registration =
                    ProductRegistration::new(format!("Widget {}", i), "Acme", "B-1", "2025-03-01");
                Record::create_at(registration, &registry, i as i64).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.record_count(), 1);
        assert!(genesis.verify_hash().unwrap());
        assert!(genesis.verify_merkle_root().unwrap());
        assert_eq!(genesis, Block::genesis().unwrap());
    }

    #[test]
    fn test_template_hash_matches_canonical_hash() {
        let mut block = Block::assemble_candidate(records(3), "ab".repeat(32), 1).unwrap();
        let template = block.pow_template().unwrap();

        for nonce in [0u64, 1, 9, 10, 12_345, u64::MAX] {
            block.nonce = nonce;
            let expected = hash_value(&block.content()).unwrap();
            assert_eq!(template.hash(nonce), expected);
            assert_eq!(block.calculate_hash().unwrap(), expected);
        }
    }

    #[test]
    fn test_candidate_merkle_root() {
        let recs = records(3);
        let leaves: Vec<String> = recs.iter().map(|r| r.hash().unwrap()).collect();
        let block = Block::assemble_candidate(recs, "0".to_string(), 1).unwrap();

        assert_eq!(block.merkle_root, calculate_merkle_root(&leaves));
        assert_eq!(block.nonce, 0);
        assert!(block.hash.is_empty());
    }

    #[test]
    fn test_single_record_root_is_record_hash() {
        let recs = records(1);
        let leaf = recs[0].hash().unwrap();
        let block = Block::assemble_candidate(recs, "0".to_string(), 1).unwrap();
        assert_eq!(block.merkle_root, leaf);
    }

    #[test]
    fn test_empty_block_root() {
        let block = Block::assemble_candidate(vec![], "0".to_string(), 1).unwrap();
        assert_eq!(block.merkle_root, EMPTY_ROOT);
    }

    #[test]
    fn test_merkle_root_verification() {
        let mut block = Block::assemble_candidate(records(2), "0".to_string(), 1).unwrap();
        assert!(block.verify_merkle_root().unwrap());

        block.records[1].payload.fields.batch_number = "B-2".to_string();
        assert!(!block.verify_merkle_root().unwrap());
    }

    #[test]
    fn test_block_hash_verification() {
        let mut block = Block::genesis().unwrap();
        block.nonce += 1;
        assert!(!block.verify_hash().unwrap());
    }

    #[test]
    fn test_block_json_roundtrip_preserves_hash() {
        let mut block = Block::assemble_candidate(records(2), "0".to_string(), 1).unwrap();
        block.hash = block.calculate_hash().unwrap();

        let json = serde_json::to_string_pretty(&block).unwrap();
        let restored: Block = serde_json::from_str(&json).unwrap();
        assert!(restored.verify_hash().unwrap());
        assert_eq!(restored, block);
    }
}
