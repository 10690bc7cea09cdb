use serde::{Deserialize, Serialize};

use zyth_core::Address;

/// Mandatory delay between an unstake request and fund release: 72 hours.
pub const UNBONDING_DELAY_SECS: u64 = 72 * 60 * 60;

/// A pending stake withdrawal.
///
/// Created on unstake, credited back to the owner's balance once
/// `release_at` passes, and voided (never credited) if the validator is
/// slashed before release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnbondingRequest {
    pub address: Address,
    /// Amount leaving bond, in micro-ZYTH.
    pub amount: u64,
    pub requested_at: u64,
    pub release_at: u64,
}

impl UnbondingRequest {
    pub fn new(address: Address, amount: u64, requested_at: u64) -> Self {
        Self {
            address,
            amount,
            requested_at,
            release_at: requested_at + UNBONDING_DELAY_SECS,
        }
    }

    pub fn matured(&self, now: u64) -> bool {
        now >= self.release_at
    }
}
