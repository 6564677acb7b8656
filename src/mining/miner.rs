//! Proof-of-work miner
//!
//! Searches nonces `0, 1, 2, ...` for the first block hash with at least
//! `difficulty` leading zero hex characters. The search touches nothing but
//! its own candidate, so it can be abandoned at any point.

use crate::core::{Block, BlockError};
use crate::crypto::{meets_difficulty, DIGEST_HEX_LEN};
use log::{debug, info};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How many nonces are tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Mining errors
#[derive(Error, Debug)]
pub enum MiningError {
    #[error("Mining of block {index} cancelled after {attempts} attempts")]
    Cancelled { index: u64, attempts: u64 },
    #[error("No valid nonce for block {index} within {limit} attempts")]
    IterationLimit { index: u64, limit: u64 },
    #[error("Difficulty {0} exceeds digest width")]
    UnreachableDifficulty(usize),
    #[error("Block error: {0}")]
    Block(#[from] BlockError),
}

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

impl MiningStats {
    fn new(hash_attempts: u64, start: Instant) -> Self {
        let elapsed = start.elapsed().as_millis();
        let hash_rate = if elapsed > 0 {
            (hash_attempts as f64) / (elapsed as f64 / 1000.0)
        } else {
            hash_attempts as f64
        };
        Self {
            hash_attempts,
            time_ms: elapsed,
            hash_rate,
        }
    }
}

/// Miner for candidate blocks
#[derive(Debug, Clone)]
pub struct Miner {
    difficulty: usize,
    max_iterations: Option<u64>,
    cancel: Vec<CancellationToken>,
}

impl Miner {
    /// Create a miner for the given difficulty with an unbounded search
    pub fn new(difficulty: usize) -> Self {
        Self {
            difficulty,
            max_iterations: None,
            cancel: Vec::new(),
        }
    }

    /// Give up after `limit` attempts
    pub fn with_max_iterations(mut self, limit: Option<u64>) -> Self {
        self.max_iterations = limit;
        self
    }

    /// Abort the search once `token` is cancelled. May be given several times.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel.push(token);
        self
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(CancellationToken::is_cancelled)
    }

    /// Find the first nonce satisfying the difficulty and return the sealed block
    pub fn mine(&self, mut candidate: Block) -> Result<(Block, MiningStats), MiningError> {
        if self.difficulty > DIGEST_HEX_LEN {
            return Err(MiningError::UnreachableDifficulty(self.difficulty));
        }

        let start = Instant::now();
        let template = candidate.pow_template()?;

        info!(
            "Mining block {} ({} records) with difficulty {}...",
            candidate.index,
            candidate.record_count(),
            self.difficulty
        );

        let mut nonce = 0u64;
        loop {
            if let Some(limit) = self.max_iterations {
                if nonce >= limit {
                    return Err(MiningError::IterationLimit {
                        index: candidate.index,
                        limit,
                    });
                }
            }

            if nonce % CANCEL_CHECK_INTERVAL == 0 && self.is_cancelled() {
                debug!("Mining of block {} cancelled", candidate.index);
                return Err(MiningError::Cancelled {
                    index: candidate.index,
                    attempts: nonce,
                });
            }

            let hash = template.hash(nonce);
            if meets_difficulty(&hash, self.difficulty) {
                candidate.nonce = nonce;
                candidate.hash = hash;
                break;
            }

            nonce = nonce.checked_add(1).ok_or(MiningError::IterationLimit {
                index: candidate.index,
                limit: u64::MAX,
            })?;
        }

        let stats = MiningStats::new(nonce + 1, start);

        info!(
            "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
            candidate.index, stats.time_ms, stats.hash_attempts, stats.hash_rate
        );

        Ok((candidate, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> Block {
        Block::assemble_candidate(vec![], "0".to_string(), 1).unwrap()
    }

    #[test]
    fn test_miner() {
        let miner = Miner::new(2);
        let (block, stats) = miner.mine(candidate()).unwrap();

        assert!(block.hash.starts_with("00"));
        assert!(block.verify_hash().unwrap());
        assert_eq!(stats.hash_attempts, block.nonce + 1);
    }

    #[test]
    fn test_first_valid_nonce_is_returned() {
        let block = candidate();
        let (mined, _) = Miner::new(1).mine(block.clone()).unwrap();

        let template = block.pow_template().unwrap();
        for nonce in 0..mined.nonce {
            assert!(!template.hash(nonce).starts_with('0'));
        }
    }

    #[test]
    fn test_same_nonce_same_hash() {
        let block = candidate();
        let (first, _) = Miner::new(2).mine(block.clone()).unwrap();
        let (second, _) = Miner::new(2).mine(block).unwrap();
        assert_eq!(first.nonce, second.nonce);
        assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn test_iteration_limit() {
        let miner = Miner::new(64).with_max_iterations(Some(10));
        assert!(matches!(
            miner.mine(candidate()),
            Err(MiningError::IterationLimit { index: 1, limit: 10 })
        ));
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let miner = Miner::new(64).with_cancellation(token);
        assert!(matches!(
            miner.mine(candidate()),
            Err(MiningError::Cancelled { attempts: 0, .. })
        ));
    }

    #[test]
    fn test_any_token_cancels() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let miner = Miner::new(64)
            .with_cancellation(CancellationToken::new())
            .with_cancellation(shutdown);
        assert!(matches!(
            miner.mine(candidate()),
            Err(MiningError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_unreachable_difficulty() {
        assert!(matches!(
            Miner::new(65).mine(candidate()),
            Err(MiningError::UnreachableDifficulty(65))
        ));
    }
}
