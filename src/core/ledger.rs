//! Ledger implementation
//!
//! The ledger owns the chain of blocks, the pending-record pool and the
//! manufacturer key registry. It serializes directly as the snapshot
//! document: `chain`, `manufacturers`, `difficulty` (plus `pending` when
//! records are waiting to be mined).

use crate::core::block::{Block, BlockError, GENESIS_PREVIOUS_HASH};
use crate::core::record::{ProductPayload, ProductRegistration, Record, RecordError};
use crate::crypto::{meets_difficulty, KeyError, KeyRegistry, ManufacturerInfo, DIGEST_HEX_LEN};
use crate::mining::{Miner, MiningError, MiningStats};
use crate::storage::{Storage, StorageError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default mining difficulty (leading zero hex characters)
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Ledger-level errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Unknown manufacturer: {0}")]
    UnknownManufacturer(String),
    #[error("No pending records to mine")]
    NoPendingRecords,
    #[error("Chain linkage error at block {index}: expected previous hash {expected}, found {found}")]
    ChainLinkage {
        index: u64,
        expected: String,
        found: String,
    },
    #[error("Integrity violation: {0}")]
    IntegrityViolation(ChainViolation),
    #[error("Difficulty {requested} is below the ledger target {required}")]
    DifficultyTooLow { requested: usize, required: usize },
    #[error("Invalid difficulty {0} (must be between 1 and 64)")]
    InvalidDifficulty(usize),
    #[error("Ledger has no genesis block")]
    EmptyChain,
    #[error("Record {0} already exists")]
    DuplicateRecord(String),
    #[error("Pending records changed while block {0} was being mined")]
    StaleCandidate(u64),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
    #[error("Record error: {0}")]
    Record(RecordError),
    #[error("Key error: {0}")]
    Key(KeyError),
    #[error("Mining worker failed: {0}")]
    Worker(String),
}

impl From<KeyError> for LedgerError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::UnknownManufacturer(name) => LedgerError::UnknownManufacturer(name),
            other => LedgerError::Key(other),
        }
    }
}

impl From<RecordError> for LedgerError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Key(key) => key.into(),
            other => LedgerError::Record(other),
        }
    }
}

impl From<ChainViolation> for LedgerError {
    fn from(violation: ChainViolation) -> Self {
        match violation.check {
            IntegrityCheck::PreviousHash => LedgerError::ChainLinkage {
                index: violation.block_index,
                expected: violation.expected,
                found: violation.found,
            },
            _ => LedgerError::IntegrityViolation(violation),
        }
    }
}

/// The individual checks run by chain validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityCheck {
    Genesis,
    BlockHash,
    ProofOfWork,
    PreviousHash,
    MerkleRoot,
    BlockIndex,
    RecordIntegrity,
}

impl fmt::Display for IntegrityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntegrityCheck::Genesis => "genesis",
            IntegrityCheck::BlockHash => "block hash",
            IntegrityCheck::ProofOfWork => "proof of work",
            IntegrityCheck::PreviousHash => "previous hash",
            IntegrityCheck::MerkleRoot => "merkle root",
            IntegrityCheck::BlockIndex => "block index",
            IntegrityCheck::RecordIntegrity => "record integrity",
        };
        f.write_str(name)
    }
}

/// First failed check found in a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainViolation {
    pub block_index: u64,
    pub check: IntegrityCheck,
    pub expected: String,
    pub found: String,
}

impl ChainViolation {
    fn new(
        block_index: u64,
        check: IntegrityCheck,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self {
            block_index,
            check,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block {} failed {} check (expected {}, found {})",
            self.block_index, self.check, self.expected, self.found
        )
    }
}

/// Outcome of a full chain walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid { blocks_checked: usize },
    Invalid(ChainViolation),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid { .. })
    }

    pub fn violation(&self) -> Option<&ChainViolation> {
        match self {
            ValidationResult::Valid { .. } => None,
            ValidationResult::Invalid(violation) => Some(violation),
        }
    }

    /// Human readable summary
    pub fn message(&self) -> String {
        match self {
            ValidationResult::Valid { blocks_checked } => {
                format!("Ledger is valid ({} blocks verified)", blocks_checked)
            }
            ValidationResult::Invalid(violation) => format!("Ledger is invalid: {}", violation),
        }
    }

    pub fn into_result(self) -> Result<(), LedgerError> {
        match self {
            ValidationResult::Valid { .. } => Ok(()),
            ValidationResult::Invalid(violation) => Err(violation.into()),
        }
    }
}

/// Where a record was found
#[derive(Debug, Clone, Copy)]
pub struct RecordLocation<'a> {
    pub record: &'a Record,
    pub block: &'a Block,
    /// Blocks mined after the one holding the record
    pub confirmations: u64,
}

/// A registered product with the block it was mined in
#[derive(Debug, Clone, Serialize)]
pub struct ProductEntry {
    #[serde(flatten)]
    pub product: ProductPayload,
    pub record_id: String,
    pub block_index: u64,
}

/// Ledger statistics
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub total_blocks: usize,
    pub total_records: usize,
    pub total_products: usize,
    pub difficulty: usize,
    pub registered_manufacturers: usize,
    pub pending_records: usize,
    pub chain_valid: bool,
    pub latest_hash: String,
}

/// Runtime ledger settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Difficulty for a freshly initialized ledger
    pub difficulty: usize,
    /// Upper bound on nonce attempts per mining round
    pub max_iterations: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            max_iterations: None,
        }
    }
}

/// The product-authenticity ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    chain: Vec<Block>,
    #[serde(rename = "manufacturers")]
    registry: KeyRegistry,
    difficulty: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pending: Vec<Record>,
}

impl Ledger {
    /// Create a ledger holding only the genesis block
    pub fn new(difficulty: usize) -> Result<Self, LedgerError> {
        check_difficulty_range(difficulty)?;
        Ok(Self {
            chain: vec![Block::genesis()?],
            registry: KeyRegistry::new(),
            difficulty,
            pending: Vec::new(),
        })
    }

    /// Load the persisted ledger, or initialize and persist a new one.
    ///
    /// A loaded snapshot is only returned once the whole chain and every
    /// pending record has been validated.
    pub fn open(storage: &Storage, config: &LedgerConfig) -> Result<Self, LedgerError> {
        if !storage.exists() {
            let ledger = Self::new(config.difficulty)?;
            storage.save(&ledger)?;
            log::info!(
                "Initialized new ledger (difficulty {}, genesis {})",
                ledger.difficulty,
                ledger.genesis_hash()
            );
            return Ok(ledger);
        }

        let ledger = storage.load()?;
        ledger.verify_snapshot()?;
        log::info!(
            "Loaded ledger with {} blocks and {} pending records",
            ledger.chain.len(),
            ledger.pending.len()
        );
        Ok(ledger)
    }

    /// Validate a deserialized ledger before trusting it
    pub fn verify_snapshot(&self) -> Result<(), LedgerError> {
        check_difficulty_range(self.difficulty)?;

        let result = self.validate_chain();
        if let Some(violation) = result.violation() {
            log::warn!("Refusing ledger snapshot: {}", violation);
        }
        result.into_result()?;

        for record in &self.pending {
            record.verify(&self.registry)?;
        }
        Ok(())
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Get the latest block
    pub fn latest_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    fn tip(&self) -> Result<&Block, LedgerError> {
        self.chain.last().ok_or(LedgerError::EmptyChain)
    }

    fn genesis_hash(&self) -> &str {
        self.chain.first().map(|b| b.hash.as_str()).unwrap_or_default()
    }

    /// Get a block by index
    pub fn get_block(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.chain.get(i))
    }

    /// Index of the tip block
    pub fn height(&self) -> u64 {
        self.chain.len().saturating_sub(1) as u64
    }

    /// Register a manufacturer, creating its key pair on first use
    pub fn register_manufacturer(&mut self, name: &str) -> Result<ManufacturerInfo, LedgerError> {
        Ok(self.registry.get_or_create_keypair(name)?)
    }

    /// Public view of all manufacturers
    pub fn manufacturers(&self) -> Vec<ManufacturerInfo> {
        self.registry.manufacturers()
    }

    /// Sign a new registration and queue it for the next block
    pub fn submit(&mut self, registration: ProductRegistration) -> Result<Record, LedgerError> {
        let timestamp = self.next_timestamp();
        self.submit_at(registration, timestamp)
    }

    pub(crate) fn submit_at(
        &mut self,
        registration: ProductRegistration,
        timestamp: i64,
    ) -> Result<Record, LedgerError> {
        registration.validate()?;
        self.registry
            .get_or_create_keypair(&registration.manufacturer)?;

        let record = Record::create_at(registration, &self.registry, timestamp)?;
        if self.contains_record(&record.record_id) {
            log::warn!("Refusing duplicate record {}", &record.record_id[..16]);
            return Err(LedgerError::DuplicateRecord(record.record_id));
        }
        log::info!(
            "Queued record {} for product {} ({})",
            &record.record_id[..16],
            &record.product_id()[..16],
            record.manufacturer()
        );
        self.pending.push(record.clone());
        Ok(record)
    }

    /// Current time in µs, bumped past the newest record stamp
    fn next_timestamp(&self) -> i64 {
        let newest = self
            .pending
            .last()
            .or_else(|| self.chain.last().and_then(|block| block.records.last()))
            .map_or(i64::MIN, |record| record.timestamp);
        Utc::now().timestamp_micros().max(newest.saturating_add(1))
    }

    fn contains_record(&self, record_id: &str) -> bool {
        self.pending.iter().any(|r| r.record_id == record_id)
            || self
                .chain
                .iter()
                .flat_map(|block| &block.records)
                .any(|r| r.record_id == record_id)
    }

    /// Reject a mining difficulty the chain validator would not accept
    pub fn check_difficulty(&self, requested: usize) -> Result<(), LedgerError> {
        check_difficulty_range(requested)?;
        if requested < self.difficulty {
            return Err(LedgerError::DifficultyTooLow {
                requested,
                required: self.difficulty,
            });
        }
        Ok(())
    }

    /// Candidate block over the whole pending pool, in submission order
    pub fn prepare_candidate(&self) -> Result<Block, LedgerError> {
        if self.pending.is_empty() {
            return Err(LedgerError::NoPendingRecords);
        }

        let tip = self.tip()?;
        Ok(Block::assemble_candidate(
            self.pending.clone(),
            tip.hash.clone(),
            self.chain.len() as u64,
        )?)
    }

    /// Mine every pending record into a new block and append it
    pub fn mine_pending(&mut self, difficulty: usize) -> Result<(Block, MiningStats), LedgerError> {
        self.mine_pending_with(&Miner::new(difficulty))
    }

    /// Like [`Ledger::mine_pending`] with a preconfigured miner
    pub fn mine_pending_with(&mut self, miner: &Miner) -> Result<(Block, MiningStats), LedgerError> {
        self.check_difficulty(miner.difficulty())?;
        let candidate = self.prepare_candidate()?;
        let (block, stats) = miner.mine(candidate)?;
        self.commit_mined(block.clone())?;
        Ok((block, stats))
    }

    /// Whether a block mined from an earlier snapshot still fits this ledger
    pub fn can_commit(&self, block: &Block) -> bool {
        let linked = self
            .chain
            .last()
            .is_some_and(|tip| tip.hash == block.previous_hash)
            && block.index == self.chain.len() as u64;

        linked
            && block.records.len() <= self.pending.len()
            && block
                .records
                .iter()
                .zip(&self.pending)
                .all(|(mined, pending)| mined.record_id == pending.record_id)
    }

    /// Append a mined block and drop its records from the pending pool
    pub fn commit_mined(&mut self, block: Block) -> Result<(), LedgerError> {
        if !self.can_commit(&block) {
            self.check_block(&block, self.chain.len())?;
            return Err(LedgerError::StaleCandidate(block.index));
        }

        let mined = block.records.len();
        self.append_block(block)?;
        self.pending.drain(..mined);
        Ok(())
    }

    /// Validate a block against the current tip and append it
    pub fn append_block(&mut self, block: Block) -> Result<(), LedgerError> {
        self.check_block(&block, self.chain.len())?;
        log::info!(
            "Appended block {} ({} records, hash {}...)",
            block.index,
            block.record_count(),
            &block.hash[..16.min(block.hash.len())]
        );
        self.chain.push(block);
        Ok(())
    }

    fn check_block(&self, block: &Block, position: usize) -> Result<(), LedgerError> {
        let previous = position
            .checked_sub(1)
            .and_then(|i| self.chain.get(i))
            .ok_or(LedgerError::EmptyChain)?;
        self.validate_block(block, previous, position as u64)?;
        Ok(())
    }

    /// Find a record by record id or product id.
    ///
    /// Blocks are scanned in index order, records in stored order; the first
    /// match wins. `None` means the product is not authentic.
    pub fn find_record(&self, id: &str) -> Option<RecordLocation<'_>> {
        let tip_index = self.height();
        self.chain.iter().find_map(|block| {
            block
                .records
                .iter()
                .find(|record| record.matches(id))
                .map(|record| RecordLocation {
                    record,
                    block,
                    confirmations: tip_index.saturating_sub(block.index),
                })
        })
    }

    /// Walk the whole chain and report the first violation found
    pub fn validate_chain(&self) -> ValidationResult {
        let Some(genesis) = self.chain.first() else {
            return ValidationResult::Invalid(ChainViolation::new(
                0,
                IntegrityCheck::Genesis,
                "genesis block",
                "empty chain",
            ));
        };

        if let Err(violation) = validate_genesis(genesis) {
            return ValidationResult::Invalid(violation);
        }

        for (position, pair) in self.chain.windows(2).enumerate() {
            if let Err(violation) = self.validate_block(&pair[1], &pair[0], position as u64 + 1) {
                return ValidationResult::Invalid(violation);
            }
        }

        ValidationResult::Valid {
            blocks_checked: self.chain.len(),
        }
    }

    /// Checks, in order: hash, proof of work, linkage, merkle root, index, records
    fn validate_block(
        &self,
        block: &Block,
        previous: &Block,
        position: u64,
    ) -> Result<(), ChainViolation> {
        let index = position;

        let recomputed = block
            .calculate_hash()
            .map_err(|e| ChainViolation::new(index, IntegrityCheck::BlockHash, &block.hash, e.to_string()))?;
        if recomputed != block.hash {
            return Err(ChainViolation::new(
                index,
                IntegrityCheck::BlockHash,
                recomputed,
                &block.hash,
            ));
        }

        if !meets_difficulty(&block.hash, self.difficulty) {
            return Err(ChainViolation::new(
                index,
                IntegrityCheck::ProofOfWork,
                format!("{} leading zeros", self.difficulty),
                &block.hash,
            ));
        }

        if block.previous_hash != previous.hash {
            return Err(ChainViolation::new(
                index,
                IntegrityCheck::PreviousHash,
                &previous.hash,
                &block.previous_hash,
            ));
        }

        let merkle_root = Block::calculate_merkle_root(&block.records).map_err(|e| {
            ChainViolation::new(index, IntegrityCheck::MerkleRoot, &block.merkle_root, e.to_string())
        })?;
        if merkle_root != block.merkle_root {
            return Err(ChainViolation::new(
                index,
                IntegrityCheck::MerkleRoot,
                merkle_root,
                &block.merkle_root,
            ));
        }

        if block.index != position {
            return Err(ChainViolation::new(
                index,
                IntegrityCheck::BlockIndex,
                position.to_string(),
                block.index.to_string(),
            ));
        }

        for record in &block.records {
            if let Err(e) = record.verify(&self.registry) {
                return Err(ChainViolation::new(
                    index,
                    IntegrityCheck::RecordIntegrity,
                    format!("valid record {}", record.record_id),
                    e.to_string(),
                ));
            }
        }

        Ok(())
    }

    /// All registered products, genesis excluded
    pub fn products(&self) -> Vec<ProductEntry> {
        self.chain
            .iter()
            .filter(|block| !block.is_genesis())
            .flat_map(|block| {
                block.records.iter().map(move |record| ProductEntry {
                    product: record.payload.clone(),
                    record_id: record.record_id.clone(),
                    block_index: block.index,
                })
            })
            .collect()
    }

    /// Get ledger statistics
    pub fn stats(&self) -> LedgerStats {
        let total_records: usize = self.chain.iter().map(Block::record_count).sum();
        let genesis_records = self.chain.first().map(Block::record_count).unwrap_or(0);

        LedgerStats {
            total_blocks: self.chain.len(),
            total_records,
            total_products: total_records - genesis_records,
            difficulty: self.difficulty,
            registered_manufacturers: self.registry.len(),
            pending_records: self.pending.len(),
            chain_valid: self.validate_chain().is_valid(),
            latest_hash: self
                .latest_block()
                .map(|b| b.hash.clone())
                .unwrap_or_default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn chain_mut(&mut self) -> &mut Vec<Block> {
        &mut self.chain
    }
}

fn check_difficulty_range(difficulty: usize) -> Result<(), LedgerError> {
    if difficulty == 0 || difficulty > DIGEST_HEX_LEN {
        return Err(LedgerError::InvalidDifficulty(difficulty));
    }
    Ok(())
}

/// Block 0 must be the canonical genesis block. It carries no proof of work.
fn validate_genesis(block: &Block) -> Result<(), ChainViolation> {
    let canonical = Block::genesis()
        .map_err(|e| ChainViolation::new(0, IntegrityCheck::Genesis, "genesis block", e.to_string()))?;

    if block.index != 0 {
        return Err(ChainViolation::new(
            0,
            IntegrityCheck::BlockIndex,
            "0",
            block.index.to_string(),
        ));
    }

    let recomputed = block
        .calculate_hash()
        .map_err(|e| ChainViolation::new(0, IntegrityCheck::BlockHash, &block.hash, e.to_string()))?;
    if recomputed != block.hash {
        return Err(ChainViolation::new(
            0,
            IntegrityCheck::BlockHash,
            recomputed,
            &block.hash,
        ));
    }

    if block.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(ChainViolation::new(
            0,
            IntegrityCheck::PreviousHash,
            GENESIS_PREVIOUS_HASH,
            &block.previous_hash,
        ));
    }

    let merkle_root = Block::calculate_merkle_root(&block.records)
        .map_err(|e| ChainViolation::new(0, IntegrityCheck::MerkleRoot, &block.merkle_root, e.to_string()))?;
    if merkle_root != block.merkle_root {
        return Err(ChainViolation::new(
            0,
            IntegrityCheck::MerkleRoot,
            merkle_root,
            &block.merkle_root,
        ));
    }

    if block.hash != canonical.hash {
        return Err(ChainViolation::new(
            0,
            IntegrityCheck::Genesis,
            canonical.hash,
            &block.hash,
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::calculate_merkle_root;
    use crate::storage::StorageConfig;

    fn registration(name: &str, manufacturer: &str) -> ProductRegistration {
        ProductRegistration::new(name, manufacturer, "B-001", "2025-03-01")
    }

    fn ledger_with_block(difficulty: usize) -> Ledger {
        let mut ledger = Ledger::new(difficulty).unwrap();
        ledger.submit(registration("Widget", "Acme")).unwrap();
        ledger.submit(registration("Gadget", "Acme")).unwrap();
        ledger.mine_pending(difficulty).unwrap();
        ledger
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::new(2).unwrap();
        assert_eq!(ledger.chain().len(), 1);
        assert_eq!(ledger.height(), 0);
        assert!(ledger.validate_chain().is_valid());
    }

    #[test]
    fn test_invalid_difficulty() {
        assert!(matches!(Ledger::new(0), Err(LedgerError::InvalidDifficulty(0))));
        assert!(matches!(Ledger::new(65), Err(LedgerError::InvalidDifficulty(65))));
    }

    #[test]
    fn test_submit_creates_keypair() {
        let mut ledger = Ledger::new(1).unwrap();
        let record = ledger.submit(registration("Widget", "Acme")).unwrap();

        assert!(ledger.registry().contains("Acme"));
        assert_eq!(ledger.pending().len(), 1);
        assert!(record.verify(ledger.registry()).is_ok());
    }

    #[test]
    fn test_empty_mine_fails() {
        let mut ledger = Ledger::new(1).unwrap();
        assert!(matches!(
            ledger.mine_pending(1),
            Err(LedgerError::NoPendingRecords)
        ));
    }

    #[test]
    fn test_difficulty_below_target_rejected() {
        let mut ledger = Ledger::new(2).unwrap();
        ledger.submit(registration("Widget", "Acme")).unwrap();
        assert!(matches!(
            ledger.mine_pending(1),
            Err(LedgerError::DifficultyTooLow { requested: 1, required: 2 })
        ));
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_acme_scenario() {
        let mut ledger = Ledger::new(4).unwrap();
        let records: Vec<Record> = ["Widget", "Gadget", "Gizmo"]
            .iter()
            .map(|name| ledger.submit(registration(name, "Acme")).unwrap())
            .collect();

        let (block, _) = ledger.mine_pending(4).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.record_count(), 3);
        assert!(block.hash.starts_with("0000"));
        let leaves: Vec<String> = records.iter().map(|r| r.hash().unwrap()).collect();
        assert_eq!(block.merkle_root, calculate_merkle_root(&leaves));
        assert!(ledger.pending().is_empty());

        for record in &records {
            let found = ledger.find_record(record.product_id()).unwrap();
            assert_eq!(found.block.index, 1);
            assert_eq!(found.confirmations, 0);
            assert_eq!(found.record, record);
        }
        assert!(ledger.validate_chain().is_valid());
    }

    #[test]
    fn test_identical_registrations_get_distinct_ids() {
        let mut ledger = Ledger::new(1).unwrap();
        let mut ids = std::collections::HashSet::new();

        for _ in 0..200 {
            let a = ledger.submit(registration("Widget", "Acme")).unwrap();
            let b = ledger.submit(registration("Widget", "Acme")).unwrap();
            assert!(b.timestamp > a.timestamp);
            assert!(ids.insert(a.record_id));
            assert!(ids.insert(b.record_id));
        }

        assert_eq!(ledger.pending().len(), 400);
        let products: std::collections::HashSet<_> =
            ledger.pending().iter().map(|r| r.product_id().to_string()).collect();
        assert_eq!(products.len(), 400);
    }

    #[test]
    fn test_stamps_increase_past_mined_records() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger
            .submit_at(registration("Widget", "Acme"), i64::MAX - 10)
            .unwrap();
        ledger.mine_pending(1).unwrap();

        let next = ledger.submit(registration("Widget", "Acme")).unwrap();
        assert_eq!(next.timestamp, i64::MAX - 9);
    }

    #[test]
    fn test_duplicate_record_rejected() {
        let mut ledger = Ledger::new(1).unwrap();
        let first = ledger.submit_at(registration("Widget", "Acme"), 5_000).unwrap();

        let pending_dup = ledger.submit_at(registration("Widget", "Acme"), 5_000);
        assert!(matches!(
            pending_dup,
            Err(LedgerError::DuplicateRecord(ref id)) if *id == first.record_id
        ));

        ledger.mine_pending(1).unwrap();
        let mined_dup = ledger.submit_at(registration("Widget", "Acme"), 5_000);
        assert!(matches!(mined_dup, Err(LedgerError::DuplicateRecord(_))));
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_find_record_missing() {
        let ledger = ledger_with_block(1);
        assert!(ledger.find_record("nonexistent").is_none());
    }

    #[test]
    fn test_find_by_record_id_and_confirmations() {
        let mut ledger = Ledger::new(1).unwrap();
        let first = ledger.submit(registration("Widget", "Acme")).unwrap();
        ledger.mine_pending(1).unwrap();
        ledger.submit(registration("Gadget", "Globex")).unwrap();
        ledger.mine_pending(1).unwrap();

        let found = ledger.find_record(&first.record_id).unwrap();
        assert_eq!(found.block.index, 1);
        assert_eq!(found.confirmations, 1);
    }

    #[test]
    fn test_chain_valid_after_many_blocks() {
        let mut ledger = Ledger::new(1).unwrap();
        for i in 0..4 {
            ledger
                .submit(registration(&format!("Item {}", i), "Acme"))
                .unwrap();
            ledger.mine_pending(1).unwrap();
        }
        assert_eq!(
            ledger.validate_chain(),
            ValidationResult::Valid { blocks_checked: 5 }
        );
    }

    #[test]
    fn test_tampered_record_detected() {
        let mut ledger = ledger_with_block(1);
        ledger.chain_mut()[1].records[0].payload.fields.product_name = "Fake".to_string();

        let violation = ledger.validate_chain().violation().cloned().unwrap();
        assert_eq!(violation.block_index, 1);
        assert_eq!(violation.check, IntegrityCheck::BlockHash);
    }

    #[test]
    fn test_rehashed_tamper_detected_by_merkle_root() {
        let mut ledger = ledger_with_block(1);
        {
            let block = &mut ledger.chain_mut()[1];
            block.records[0].payload.fields.batch_number = "B-999".to_string();
            block.hash = block.calculate_hash().unwrap();
        }

        let violation = ledger.validate_chain().violation().cloned().unwrap();
        assert_eq!(violation.block_index, 1);
        assert!(matches!(
            violation.check,
            IntegrityCheck::ProofOfWork | IntegrityCheck::MerkleRoot
        ));
    }

    #[test]
    fn test_tampered_genesis_detected() {
        let mut ledger = ledger_with_block(1);
        ledger.chain_mut()[0].records[0].payload.fields.product_name = "Not genesis".into();

        let violation = ledger.validate_chain().violation().cloned().unwrap();
        assert_eq!(violation.block_index, 0);
        assert_eq!(violation.check, IntegrityCheck::BlockHash);
    }

    #[test]
    fn test_broken_link_is_chain_linkage_error() {
        let mut ledger = ledger_with_block(1);
        ledger.submit(registration("Gadget", "Acme")).unwrap();

        let mut candidate = ledger.prepare_candidate().unwrap();
        candidate.previous_hash = "a".repeat(64);
        let (mined, _) = Miner::new(1).mine(candidate).unwrap();

        assert!(matches!(
            ledger.append_block(mined),
            Err(LedgerError::ChainLinkage { index: 2, .. })
        ));
        assert_eq!(ledger.chain().len(), 2);
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_forged_signature_detected() {
        let mut ledger = ledger_with_block(1);
        ledger.register_manufacturer("Globex").unwrap();
        {
            let globex_sig = {
                let record = &ledger.chain()[1].records[0];
                ledger.registry().sign("Globex", &record.payload).unwrap()
            };
            let block = &mut ledger.chain_mut()[1];
            block.records[0].signature = globex_sig;
            block.merkle_root = Block::calculate_merkle_root(&block.records).unwrap();
            let (remined, _) = Miner::new(1).mine(block.clone()).unwrap();
            *block = remined;
        }

        let violation = ledger.validate_chain().violation().cloned().unwrap();
        assert_eq!(violation.check, IntegrityCheck::RecordIntegrity);
    }

    #[test]
    fn test_stale_candidate_rejected() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger.submit(registration("Widget", "Acme")).unwrap();
        let (stale, _) = Miner::new(1).mine(ledger.prepare_candidate().unwrap()).unwrap();

        ledger.mine_pending(1).unwrap();
        assert!(!ledger.can_commit(&stale));
        assert!(ledger.commit_mined(stale).is_err());
        assert_eq!(ledger.chain().len(), 2);
    }

    #[test]
    fn test_records_submitted_during_mining_stay_pending() {
        let mut ledger = Ledger::new(1).unwrap();
        ledger.submit(registration("Widget", "Acme")).unwrap();
        let (block, _) = Miner::new(1).mine(ledger.prepare_candidate().unwrap()).unwrap();

        let late = ledger.submit(registration("Late", "Acme")).unwrap();
        assert!(ledger.can_commit(&block));
        ledger.commit_mined(block).unwrap();

        assert_eq!(ledger.pending(), std::slice::from_ref(&late));
    }

    #[test]
    fn test_stats_and_products() {
        let mut ledger = ledger_with_block(1);
        ledger.submit(registration("Pending", "Globex")).unwrap();

        let stats = ledger.stats();
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_products, 2);
        assert_eq!(stats.registered_manufacturers, 2);
        assert_eq!(stats.pending_records, 1);
        assert!(stats.chain_valid);

        let products = ledger.products();
        assert_eq!(products.len(), 2);
        assert!(products.iter().all(|p| p.block_index == 1));
    }

    #[test]
    fn test_snapshot_roundtrip_validates() {
        let ledger = ledger_with_block(1);
        let json = serde_json::to_value(&ledger).unwrap();
        assert!(json.get("chain").is_some());
        assert!(json.get("manufacturers").is_some());
        assert_eq!(json["difficulty"], 1);
        assert!(json.get("pending").is_none());

        let restored: Ledger = serde_json::from_value(json).unwrap();
        assert!(restored.verify_snapshot().is_ok());
    }

    #[test]
    fn test_open_initializes_and_reloads() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let config = LedgerConfig {
            difficulty: 1,
            ..Default::default()
        };

        let mut ledger = Ledger::open(&storage, &config).unwrap();
        ledger.submit(registration("Widget", "Acme")).unwrap();
        ledger.mine_pending(1).unwrap();
        storage.save(&ledger).unwrap();

        let reloaded = Ledger::open(&storage, &config).unwrap();
        assert_eq!(reloaded.chain(), ledger.chain());
    }

    #[test]
    fn test_open_refuses_tampered_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(StorageConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        let mut ledger = ledger_with_block(1);
        ledger.chain_mut()[1].records[1].payload.fields.manufacture_date = "1999-01-01".into();
        storage.save(&ledger).unwrap();

        assert!(matches!(
            Ledger::open(&storage, &LedgerConfig::default()),
            Err(LedgerError::IntegrityViolation(ChainViolation { block_index: 1, .. }))
        ));
    }
}
