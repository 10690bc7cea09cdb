// REWARD DISTRIBUTION
//
// INVARIANTS:
// 1. miner + committee + treasury == block reward, exactly, for every
//    height. Integer flooring dust is credited to the treasury.
// 2. The committee pool is split pro-rata by quadratic voting power among
//    the validators whose votes counted toward the quorum.
// 3. Canonical split: 60% miner / 35% committee / 5% treasury.

use log::info;
use serde::{Deserialize, Serialize};

use zyth_core::Address;

/// Miner share of the block reward, basis points.
pub const MINER_SHARE_BPS: u64 = 6_000;

/// Committee share of the block reward, basis points.
pub const COMMITTEE_SHARE_BPS: u64 = 3_500;

/// Treasury share of the block reward, basis points (plus rounding dust).
pub const TREASURY_SHARE_BPS: u64 = 500;

/// Outcome of splitting one finalized block's reward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardShares {
    pub height: u64,
    pub miner: Address,
    pub miner_amount: u64,
    /// Per-voter committee credits, in committee iteration order.
    pub committee: Vec<(Address, u64)>,
    pub treasury: u64,
}

impl RewardShares {
    /// Total distributed; must equal the block reward.
    pub fn total(&self) -> u64 {
        self.miner_amount
            + self.committee.iter().map(|(_, amount)| amount).sum::<u64>()
            + self.treasury
    }
}

#[derive(Debug, Default)]
pub struct RewardDistributor;

impl RewardDistributor {
    pub fn new() -> Self {
        Self
    }

    /// Split `reward` micro-ZYTH for a finalized block.
    ///
    /// `committee` is the set of validators whose votes counted toward the
    /// quorum, with their snapshot voting power. Their pool is 35% of the
    /// reward, shared pro-rata by power with per-seat flooring; whatever the
    /// flooring leaves over goes to the treasury, so the three shares always
    /// sum to exactly `reward`.
    pub fn distribute(
        &self,
        height: u64,
        reward: u64,
        miner: Address,
        committee: &[(Address, f64)],
    ) -> RewardShares {
        let miner_amount = reward * MINER_SHARE_BPS / 10_000;
        let committee_pool = reward * COMMITTEE_SHARE_BPS / 10_000;

        let total_power: f64 = committee.iter().map(|(_, power)| power).sum();
        let mut committee_amounts = Vec::with_capacity(committee.len());
        let mut committee_distributed = 0u64;
        if total_power > 0.0 {
            for (address, power) in committee {
                let share = ((committee_pool as f64) * (power / total_power)).floor() as u64;
                committee_distributed += share;
                committee_amounts.push((address.clone(), share));
            }
        }

        // Conservation: everything not handed to the miner or a committee
        // seat lands in the treasury, including flooring dust.
        let treasury = reward - miner_amount - committee_distributed;

        info!(
            "height {}: reward {} uZYTH split as miner {}, committee {} over {} seat(s), treasury {}",
            height,
            reward,
            miner_amount,
            committee_distributed,
            committee_amounts.len(),
            treasury
        );

        RewardShares {
            height,
            miner,
            miner_amount,
            committee: committee_amounts,
            treasury,
        }
    }
}
