//! CLI commands for the provenance ledger
//!
//! Implements all command handlers for the CLI interface.

use crate::core::{Ledger, LedgerConfig, ProductRegistration, ValidationResult};
use crate::mining::Miner;
use crate::storage::{self, Storage, StorageConfig};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub ledger: Ledger,
    pub storage: Storage,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load (and validate) the ledger, creating one if none exists
    pub fn new(data_dir: PathBuf) -> CliResult<Self> {
        let storage = open_storage(&data_dir)?;

        if storage.exists() {
            println!("📂 Loading existing ledger...");
        } else {
            println!("🆕 Creating new ledger...");
        }
        let ledger = Ledger::open(&storage, &LedgerConfig::default())?;

        Ok(Self {
            ledger,
            storage,
            data_dir,
        })
    }

    /// Apply `op` to a working copy, persist it, then keep it
    pub fn apply<T>(
        &mut self,
        op: impl FnOnce(&mut Ledger) -> Result<T, crate::core::LedgerError>,
    ) -> CliResult<T> {
        let mut working = self.ledger.clone();
        let value = op(&mut working)?;
        self.storage.save(&working)?;
        self.ledger = working;
        Ok(value)
    }
}

fn open_storage(data_dir: &Path) -> CliResult<Storage> {
    Ok(Storage::new(StorageConfig {
        data_dir: data_dir.to_path_buf(),
        ..Default::default()
    })?)
}

fn format_micros(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn short(hash: &str) -> &str {
    &hash[..16.min(hash.len())]
}

/// Initialize a new ledger
pub fn cmd_init(data_dir: &Path, difficulty: Option<usize>) -> CliResult<()> {
    let storage = open_storage(data_dir)?;

    if storage.exists() {
        println!("⚠️  Ledger already exists at {:?}", data_dir);
        return Ok(());
    }

    let config = LedgerConfig {
        difficulty: difficulty.unwrap_or(crate::core::DEFAULT_DIFFICULTY),
        ..Default::default()
    };
    let ledger = Ledger::open(&storage, &config)?;

    println!("✅ Ledger initialized!");
    println!("   📁 Data directory: {:?}", data_dir);
    println!("   🔧 Difficulty: {}", ledger.difficulty());
    if let Some(genesis) = ledger.chain().first() {
        println!("   🧱 Genesis block hash: {}", genesis.hash);
    }

    Ok(())
}

/// Register a product, optionally mining it straight away
pub fn cmd_register(
    state: &mut AppState,
    registration: ProductRegistration,
    mine: bool,
) -> CliResult<()> {
    let record = state.apply(|ledger| ledger.submit(registration))?;

    println!("📝 Product registered!");
    println!("   ├─ Product ID: {}", record.product_id());
    println!("   ├─ Record ID: {}", record.record_id);
    println!("   ├─ Manufacturer: {}", record.manufacturer());
    println!("   └─ Status: pending");

    if mine {
        println!();
        cmd_mine(state, None, None)?;
    }

    Ok(())
}

/// Mine all pending records into a block
pub fn cmd_mine(
    state: &mut AppState,
    difficulty: Option<usize>,
    max_iterations: Option<u64>,
) -> CliResult<()> {
    let difficulty = difficulty.unwrap_or(state.ledger.difficulty());
    let pending = state.ledger.pending().len();

    if pending == 0 {
        println!("📭 No pending records to mine.");
        return Ok(());
    }

    println!(
        "⛏️  Mining {} pending record(s) at difficulty {}",
        pending, difficulty
    );

    let miner = Miner::new(difficulty).with_max_iterations(max_iterations);
    let (block, stats) = state.apply(|ledger| ledger.mine_pending_with(&miner))?;

    println!("\n   Block {} mined!", block.index);
    println!("   ├─ Hash: {}", block.hash);
    println!("   ├─ Merkle root: {}", short(&block.merkle_root));
    println!("   ├─ Records: {}", block.record_count());
    println!("   ├─ Nonce: {}", block.nonce);
    println!("   ├─ Time: {}ms", stats.time_ms);
    println!("   ├─ Attempts: {}", stats.hash_attempts);
    println!("   └─ Hash rate: {:.2} H/s", stats.hash_rate);

    Ok(())
}

/// Look up a product or record id
pub fn cmd_verify(state: &AppState, id: &str) -> CliResult<()> {
    match state.ledger.find_record(id) {
        Some(location) => {
            let payload = &location.record.payload;
            println!("✅ Authentic product");
            println!("   ├─ Product: {}", payload.fields.product_name);
            println!("   ├─ Manufacturer: {}", payload.fields.manufacturer);
            println!("   ├─ Batch: {}", payload.fields.batch_number);
            println!("   ├─ Manufactured: {}", payload.fields.manufacture_date);
            println!(
                "   ├─ Registered: {}",
                format_micros(payload.fields.registration_time)
            );
            println!("   ├─ Block: #{} ({})", location.block.index, short(&location.block.hash));
            println!("   └─ Confirmations: {}", location.confirmations);
        }
        None => {
            let pending = state.ledger.pending().iter().any(|r| r.matches(id));
            println!("❌ Not found on the ledger: {}", id);
            if pending {
                println!("   The record is pending and will be confirmed once mined.");
            }
        }
    }

    Ok(())
}

/// Display ledger info
pub fn cmd_chain_info(state: &AppState) -> CliResult<()> {
    let stats = state.ledger.stats();
    let storage_stats = state.storage.stats()?;

    println!("⛓️  Ledger Info");
    println!("   ├─ Height: {}", state.ledger.height());
    println!("   ├─ Total blocks: {}", stats.total_blocks);
    println!("   ├─ Total records: {}", stats.total_records);
    println!("   ├─ Products: {}", stats.total_products);
    println!("   ├─ Manufacturers: {}", stats.registered_manufacturers);
    println!("   ├─ Pending records: {}", stats.pending_records);
    println!("   ├─ Difficulty: {}", stats.difficulty);
    println!("   ├─ Valid: {}", stats.chain_valid);
    println!(
        "   ├─ Snapshot: {} bytes, {} backup(s)",
        storage_stats.file_size, storage_stats.backup_count
    );
    println!("   └─ Latest hash: {}", stats.latest_hash);

    Ok(())
}

/// List recent blocks
pub fn cmd_chain_blocks(state: &AppState, count: usize) -> CliResult<()> {
    println!("🧱 Recent blocks:");
    for block in state.ledger.chain().iter().rev().take(count) {
        println!(
            "   #{} | {} | {} record(s) | {}",
            block.index,
            short(&block.hash),
            block.record_count(),
            format_micros(block.timestamp)
        );
    }

    Ok(())
}

/// Show one block in full
pub fn cmd_block(state: &AppState, index: u64) -> CliResult<()> {
    let Some(block) = state.ledger.get_block(index) else {
        println!("❌ Block {} not found (height is {})", index, state.ledger.height());
        return Ok(());
    };

    println!("🧱 Block #{}", block.index);
    println!("   ├─ Hash: {}", block.hash);
    println!("   ├─ Previous: {}", block.previous_hash);
    println!("   ├─ Merkle root: {}", block.merkle_root);
    println!("   ├─ Nonce: {}", block.nonce);
    println!("   ├─ Time: {}", format_micros(block.timestamp));
    println!("   └─ Records: {}", block.record_count());
    for record in &block.records {
        println!(
            "      └─ {} | {} | {}",
            short(record.product_id()),
            record.payload.fields.product_name,
            record.manufacturer()
        );
    }

    Ok(())
}

/// Validate the persisted ledger without trusting it first
pub fn cmd_validate(data_dir: &Path) -> CliResult<()> {
    let storage = open_storage(data_dir)?;
    if !storage.exists() {
        println!("📭 No ledger found at {:?}", data_dir);
        return Ok(());
    }

    println!("🔍 Validating ledger...");
    let ledger = storage.load()?;

    match ledger.validate_chain() {
        ValidationResult::Valid { blocks_checked } => {
            println!("✅ Ledger is valid!");
            println!("   {} blocks verified", blocks_checked);
        }
        ValidationResult::Invalid(violation) => {
            println!("❌ Ledger validation FAILED!");
            println!("   ├─ Block: {}", violation.block_index);
            println!("   ├─ Check: {}", violation.check);
            println!("   ├─ Expected: {}", violation.expected);
            println!("   └─ Found: {}", violation.found);
        }
    }

    Ok(())
}

/// Show the pending pool
pub fn cmd_pending(state: &AppState) -> CliResult<()> {
    let pending = state.ledger.pending();
    println!("📬 Pending records: {}", pending.len());

    for record in pending {
        println!(
            "   └─ {} | {} | {}",
            short(record.product_id()),
            record.payload.fields.product_name,
            record.manufacturer()
        );
    }

    Ok(())
}

/// List registered manufacturers
pub fn cmd_manufacturers(state: &AppState) -> CliResult<()> {
    let manufacturers = state.ledger.manufacturers();

    if manufacturers.is_empty() {
        println!("📭 No manufacturers registered yet.");
        return Ok(());
    }

    println!("🏭 Manufacturers ({}):", manufacturers.len());
    for info in manufacturers {
        println!(
            "   {} | {} | since {}",
            info.manufacturer_id,
            info.public_key,
            info.created_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

/// List registered products
pub fn cmd_products(state: &AppState) -> CliResult<()> {
    let products = state.ledger.products();

    if products.is_empty() {
        println!("📭 No products on the ledger yet.");
        return Ok(());
    }

    println!("📦 Products ({}):", products.len());
    for entry in products {
        println!(
            "   {} | {} | {} | batch {} | block #{}",
            short(&entry.product.product_id),
            entry.product.fields.product_name,
            entry.product.fields.manufacturer,
            entry.product.fields.batch_number,
            entry.block_index
        );
    }

    Ok(())
}

/// Export the ledger to file
pub fn cmd_export(state: &AppState, path: &Path) -> CliResult<()> {
    storage::save_to_file(&state.ledger, path)?;
    println!("📦 Ledger exported to {:?}", path);
    Ok(())
}

/// Import a ledger from file, replacing the current one
pub fn cmd_import(state: &mut AppState, path: &Path) -> CliResult<()> {
    let ledger = storage::load_from_file(path)?;

    if let Err(e) = ledger.verify_snapshot() {
        println!("❌ Imported ledger is invalid: {}", e);
        return Ok(());
    }

    state.storage.save(&ledger)?;
    state.ledger = ledger;

    println!("📥 Ledger imported from {:?}", path);
    println!("   Height: {}", state.ledger.height());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(name: &str) -> ProductRegistration {
        ProductRegistration::new(name, "Acme", "B-001", "2025-03-01")
    }

    fn state_in(dir: &Path, difficulty: usize) -> AppState {
        cmd_init(dir, Some(difficulty)).unwrap();
        AppState::new(dir.to_path_buf()).unwrap()
    }

    #[test]
    fn test_init_keeps_existing_ledger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state = state_in(temp_dir.path(), 1);
        cmd_register(&mut state, registration("Widget"), true).unwrap();

        cmd_init(temp_dir.path(), Some(3)).unwrap();
        let reopened = AppState::new(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.ledger.difficulty(), 1);
        assert_eq!(reopened.ledger.chain().len(), 2);
    }

    #[test]
    fn test_register_and_mine_persist() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state = state_in(temp_dir.path(), 1);

        cmd_register(&mut state, registration("Widget"), false).unwrap();
        cmd_register(&mut state, registration("Gadget"), false).unwrap();
        assert_eq!(state.ledger.pending().len(), 2);

        cmd_mine(&mut state, None, None).unwrap();

        let reopened = AppState::new(temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.ledger.chain().len(), 2);
        assert!(reopened.ledger.pending().is_empty());
        assert_eq!(reopened.ledger.products().len(), 2);
    }

    #[test]
    fn test_failed_mine_keeps_state() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state = state_in(temp_dir.path(), 1);
        cmd_register(&mut state, registration("Widget"), false).unwrap();

        assert!(cmd_mine(&mut state, Some(64), Some(5)).is_err());
        assert_eq!(state.ledger.pending().len(), 1);
        assert_eq!(state.ledger.chain().len(), 1);
    }

    #[test]
    fn test_import_rejects_tampered_ledger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state = state_in(temp_dir.path(), 1);
        cmd_register(&mut state, registration("Widget"), true).unwrap();

        let export_path = temp_dir.path().join("export.json");
        cmd_export(&state, &export_path).unwrap();

        let tampered = std::fs::read_to_string(&export_path)
            .unwrap()
            .replace("\"Widget\"", "\"Counterfeit\"");
        std::fs::write(&export_path, tampered).unwrap();

        let other_dir = tempfile::tempdir().unwrap();
        let mut other = state_in(other_dir.path(), 1);
        cmd_import(&mut other, &export_path).unwrap();
        assert_eq!(other.ledger.chain().len(), 1);
    }

    #[test]
    fn test_import_valid_ledger() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut state = state_in(temp_dir.path(), 1);
        cmd_register(&mut state, registration("Widget"), true).unwrap();

        let export_path = temp_dir.path().join("export.json");
        cmd_export(&state, &export_path).unwrap();

        let other_dir = tempfile::tempdir().unwrap();
        let mut other = state_in(other_dir.path(), 1);
        cmd_import(&mut other, &export_path).unwrap();
        assert_eq!(other.ledger.chain(), state.ledger.chain());
    }
}
