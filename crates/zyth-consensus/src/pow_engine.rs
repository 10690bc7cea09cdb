// PROOF-OF-WORK ENGINE
//
// INVARIANTS:
// 1. Mining is a bounded nonce search: hash(header) < target(difficulty),
//    failing with NoSolutionFound once the attempt budget is exhausted.
// 2. Difficulty retargets every 2016 blocks, scaled by the window timing
//    ratio and clamped to [0.25x, 4x]. Deterministic given the same window.
// 3. The reward schedule is monotone non-increasing: 5 ZYTH base, reduced
//    by 10% every 210,000 blocks.

use log::{debug, info};

use zyth_core::{Address, Block, Transaction, MICRO_PER_ZYTH};

use crate::error::ConsensusError;

/// Difficulty retarget interval, in blocks.
pub const RETARGET_WINDOW: u64 = 2_016;

/// Target spacing between blocks, seconds.
pub const TARGET_BLOCK_SECS: u64 = 15;

/// Retarget factor bounds, preventing oscillation on outlier windows.
pub const MIN_ADJUST_FACTOR: f64 = 0.25;
pub const MAX_ADJUST_FACTOR: f64 = 4.0;

/// Base block reward: 5 ZYTH in micro-ZYTH.
pub const REWARD_BASE: u64 = 5 * MICRO_PER_ZYTH;

/// Blocks between reward reductions.
pub const REWARD_REDUCTION_INTERVAL: u64 = 210_000;

pub struct PowEngine {
    /// Nonce attempts per proposal before giving up.
    max_attempts: u64,
}

impl PowEngine {
    pub fn new(max_attempts: u64) -> Self {
        Self { max_attempts }
    }

    /// Assemble and mine a candidate block on top of `previous`.
    ///
    /// On NoSolutionFound the caller retries with an updated timestamp,
    /// which re-seeds the search space.
    pub fn propose_block(
        &self,
        previous: &Block,
        payload: Vec<Transaction>,
        proposer: Address,
        difficulty: u64,
        now: u64,
    ) -> Result<Block, ConsensusError> {
        let mut block = Block::new(
            previous.hash.clone(),
            payload,
            difficulty,
            previous.header.height + 1,
            proposer,
            now,
        );

        for nonce in 0..self.max_attempts {
            block.header.nonce = nonce;
            let hash = block.compute_hash();
            if hash_meets_target(&hash, difficulty) {
                block.hash = hash;
                info!(
                    "mined block {} at difficulty {} with nonce {}",
                    block.header.height, difficulty, nonce
                );
                return Ok(block);
            }
        }

        debug!(
            "nonce search exhausted for height {} at difficulty {}",
            block.header.height, difficulty
        );
        Err(ConsensusError::NoSolutionFound {
            attempts: self.max_attempts,
            difficulty,
        })
    }

    /// Verify an inbound block's proof of work and hash integrity.
    pub fn verify_pow(&self, block: &Block) -> Result<(), ConsensusError> {
        let height = block.header.height;
        if block.hash != block.compute_hash() {
            return Err(ConsensusError::InvalidBlock {
                height,
                reason: "hash does not match header".to_string(),
            });
        }
        if !hash_meets_target(&block.hash, block.header.difficulty) {
            return Err(ConsensusError::InvalidBlock {
                height,
                reason: format!(
                    "hash does not meet difficulty target {}",
                    block.header.difficulty
                ),
            });
        }
        Ok(())
    }
}

/// Check a hex hash against the difficulty target. The target is the
/// maximum 128-bit prefix divided by difficulty, so doubling difficulty
/// halves the acceptable hash space.
pub fn hash_meets_target(hash_hex: &str, difficulty: u64) -> bool {
    if hash_hex.len() < 32 {
        return false;
    }
    let prefix = match u128::from_str_radix(&hash_hex[..32], 16) {
        Ok(value) => value,
        Err(_) => return false,
    };
    prefix <= u128::MAX / difficulty.max(1) as u128
}

/// Retarget: called at each 2016-block boundary with the elapsed wall time
/// of the completed window. Returns the new difficulty, never below 1.
pub fn adjust_difficulty(current: u64, actual_window_secs: u64) -> u64 {
    let expected = (RETARGET_WINDOW * TARGET_BLOCK_SECS) as f64;
    // Longer-than-expected window means blocks came slow: lower difficulty.
    let raw_factor = if actual_window_secs == 0 {
        MAX_ADJUST_FACTOR
    } else {
        expected / actual_window_secs as f64
    };
    let factor = raw_factor.clamp(MIN_ADJUST_FACTOR, MAX_ADJUST_FACTOR);
    let next = (current as f64 * factor).round() as u64;
    let next = next.max(1);
    if next != current {
        info!(
            "difficulty retarget: {} -> {} (window {}s, factor {:.3})",
            current, next, actual_window_secs, factor
        );
    }
    next
}

/// True at every retarget boundary after genesis.
pub fn should_retarget(height: u64) -> bool {
    height > 0 && height % RETARGET_WINDOW == 0
}

/// Block reward for a height: 5 ZYTH reduced by 10% every 210,000 blocks.
/// Integer arithmetic (x * 9 / 10 per step) so replay is exact.
pub fn reward_for_height(height: u64) -> u64 {
    let reductions = height / REWARD_REDUCTION_INTERVAL;
    let mut amount = REWARD_BASE;
    for _ in 0..reductions {
        if amount == 0 {
            break;
        }
        amount = amount * 9 / 10;
    }
    amount
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis() -> Block {
        Block::new(
            "0".repeat(64),
            vec![],
            1,
            0,
            Address::from_string("ZYTH_GENESIS_00000000000000000000".to_string()),
            1_700_000_000,
        )
    }

    fn miner() -> Address {
        Address::from_string("ZYTH_MINER_0000000000000000000000000000".to_string())
    }

    #[test]
    fn test_mine_block_at_low_difficulty() {
        let engine = PowEngine::new(100_000);
        let previous = genesis();
        let block = engine
            .propose_block(&previous, vec![], miner(), 4, 1_700_000_100)
            .unwrap();

        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.previous_hash, previous.hash);
        assert!(hash_meets_target(&block.hash, 4));
        assert!(engine.verify_pow(&block).is_ok());
    }

    #[test]
    fn test_no_solution_when_budget_exhausted() {
        // One attempt against an astronomically hard target.
        let engine = PowEngine::new(1);
        let result = engine.propose_block(&genesis(), vec![], miner(), u64::MAX, 1_700_000_100);
        assert!(matches!(
            result,
            Err(ConsensusError::NoSolutionFound { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_nonce() {
        let engine = PowEngine::new(100_000);
        let mut block = engine
            .propose_block(&genesis(), vec![], miner(), 4, 1_700_000_100)
            .unwrap();
        block.header.nonce += 1;
        assert!(matches!(
            engine.verify_pow(&block),
            Err(ConsensusError::InvalidBlock { .. })
        ));
    }

    #[test]
    fn test_retarget_is_deterministic() {
        let a = adjust_difficulty(1_000, 40_000);
        let b = adjust_difficulty(1_000, 40_000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_retarget_direction() {
        let expected = RETARGET_WINDOW * TARGET_BLOCK_SECS;
        // slow window -> difficulty drops
        assert!(adjust_difficulty(1_000, expected * 2) < 1_000);
        // fast window -> difficulty rises
        assert!(adjust_difficulty(1_000, expected / 2) > 1_000);
        // on-target window -> unchanged
        assert_eq!(adjust_difficulty(1_000, expected), 1_000);
    }

    #[test]
    fn test_retarget_clamp_bounds() {
        let expected = RETARGET_WINDOW * TARGET_BLOCK_SECS;
        // 100x too slow is clamped to 0.25x
        assert_eq!(adjust_difficulty(1_000, expected * 100), 250);
        // 100x too fast is clamped to 4x
        assert_eq!(adjust_difficulty(1_000, expected / 100), 4_000);
        // zero-length window hits the upper clamp, not a division error
        assert_eq!(adjust_difficulty(1_000, 0), 4_000);
    }

    #[test]
    fn test_difficulty_floor() {
        assert_eq!(adjust_difficulty(1, RETARGET_WINDOW * TARGET_BLOCK_SECS * 100), 1);
    }

    #[test]
    fn test_should_retarget_boundaries() {
        assert!(!should_retarget(0));
        assert!(!should_retarget(2_015));
        assert!(should_retarget(2_016));
        assert!(should_retarget(4_032));
    }

    #[test]
    fn test_reward_schedule_boundary() {
        // 5.0 ZYTH before the first reduction, 4.5 ZYTH at it
        assert_eq!(reward_for_height(0), 5_000_000);
        assert_eq!(reward_for_height(209_999), 5_000_000);
        assert_eq!(reward_for_height(210_000), 4_500_000);
        assert_eq!(reward_for_height(420_000), 4_050_000);
    }

    #[test]
    fn test_reward_monotone_non_increasing() {
        let mut last = reward_for_height(0);
        for step in 1..50 {
            let reward = reward_for_height(step * REWARD_REDUCTION_INTERVAL);
            assert!(reward <= last);
            last = reward;
        }
    }
}
