//! Shared, persisted ledger handle
//!
//! All mutations go through one async `RwLock`, so at most one is in flight.
//! Each mutation is applied to a working copy, persisted, and only then
//! swapped in, so a failed write never leaves memory ahead of disk.
//!
//! Mining runs on a blocking worker without holding the lock. The candidate
//! is taken from a read snapshot; when the mined block no longer fits the
//! chain tip or the pending pool the round is restarted.

use crate::core::block::Block;
use crate::core::ledger::{Ledger, LedgerConfig, LedgerError};
use crate::core::record::{ProductRegistration, Record};
use crate::mining::{Miner, MiningStats};
use crate::storage::Storage;
use log::warn;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;

/// Cloneable handle to the process-wide ledger
#[derive(Clone)]
pub struct SharedLedger {
    ledger: Arc<RwLock<Ledger>>,
    storage: Arc<Storage>,
    max_iterations: Option<u64>,
    shutdown: CancellationToken,
}

impl SharedLedger {
    pub fn new(ledger: Ledger, storage: Arc<Storage>, max_iterations: Option<u64>) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(ledger)),
            storage,
            max_iterations,
            shutdown: CancellationToken::new(),
        }
    }

    /// Load (and validate) or initialize the ledger behind `storage`
    pub fn open(storage: Storage, config: &LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = Ledger::open(&storage, config)?;
        Ok(Self::new(ledger, Arc::new(storage), config.max_iterations))
    }

    /// Read access for lookups, validation and export
    pub async fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.ledger.read().await
    }

    /// Token cancelled on shutdown; mining rounds derive from it
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Abandon in-flight mining attempts
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Apply `op` to a working copy, persist it, then publish it
    async fn commit<T>(
        &self,
        op: impl FnOnce(&mut Ledger) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut ledger = self.ledger.write().await;
        let mut working = ledger.clone();
        let value = op(&mut working)?;
        self.storage.save(&working)?;
        *ledger = working;
        Ok(value)
    }

    /// Sign and queue a registration, creating the manufacturer key if needed
    pub async fn submit(&self, registration: ProductRegistration) -> Result<Record, LedgerError> {
        self.commit(|ledger| ledger.submit(registration)).await
    }

    /// Mine all pending records into a new block.
    ///
    /// `difficulty` defaults to the ledger's target. Cancelling `cancel` (or
    /// shutting the handle down) abandons the attempt without touching state.
    pub async fn mine_pending(
        &self,
        difficulty: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<(Block, MiningStats), LedgerError> {
        loop {
            let (candidate, miner) = {
                let ledger = self.ledger.read().await;
                let difficulty = difficulty.unwrap_or_else(|| ledger.difficulty());
                ledger.check_difficulty(difficulty)?;

                let miner = Miner::new(difficulty)
                    .with_max_iterations(self.max_iterations)
                    .with_cancellation(cancel.clone())
                    .with_cancellation(self.shutdown.clone());
                (ledger.prepare_candidate()?, miner)
            };

            let index = candidate.index;
            let (block, stats) = tokio::task::spawn_blocking(move || miner.mine(candidate))
                .await
                .map_err(|e| LedgerError::Worker(e.to_string()))??;

            let mut ledger = self.ledger.write().await;
            if !ledger.can_commit(&block) {
                warn!(
                    "Chain tip or pending pool changed while mining block {}, restarting",
                    index
                );
                continue;
            }

            let mut working = ledger.clone();
            working.commit_mined(block.clone())?;
            self.storage.save(&working)?;
            *ledger = working;
            return Ok((block, stats));
        }
    }
}
