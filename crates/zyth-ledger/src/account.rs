use serde::{Deserialize, Serialize};

use zyth_core::Address;

use crate::error::LedgerError;

/// Commission rate ceiling: 20% in basis points.
pub const MAX_COMMISSION_BPS: u16 = 2_000;

/// Authoritative validator record.
///
/// Accounts are never physically deleted: a validator that exits or falls
/// below the minimum is deactivated and keeps its history. Voting power is
/// derived from stake on demand, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorAccount {
    pub address: Address,
    /// Bonded stake in micro-ZYTH.
    pub stake: u64,
    pub active: bool,
    pub jailed: bool,
    /// Unix-seconds release time for a cooldown jail; `None` while jailed
    /// means indefinite (double-sign).
    pub jailed_until: Option<u64>,
    /// Commission on committee rewards, in basis points (0–2000).
    pub commission_bps: u16,
    /// Unix seconds when the account was first bonded.
    pub bonded_at: u64,
    /// Cumulative slashed amount, for audit queries.
    pub total_slashed: u64,
}

impl ValidatorAccount {
    pub fn new(
        address: Address,
        stake: u64,
        commission_bps: u16,
        bonded_at: u64,
    ) -> Result<Self, LedgerError> {
        if commission_bps > MAX_COMMISSION_BPS {
            return Err(LedgerError::InvalidCommission(commission_bps));
        }
        Ok(Self {
            address,
            stake,
            active: true,
            jailed: false,
            jailed_until: None,
            commission_bps,
            bonded_at,
            total_slashed: 0,
        })
    }

    /// Eligible for committee membership: bonded, active, not jailed.
    pub fn in_committee(&self) -> bool {
        self.active && !self.jailed && self.stake > 0
    }

    pub fn jail(&mut self, until: Option<u64>) {
        self.jailed = true;
        self.jailed_until = until;
    }

    /// Lift a cooldown jail once its release time has passed. Indefinite
    /// jails are never lifted here.
    pub fn try_unjail(&mut self, now: u64) -> bool {
        match self.jailed_until {
            Some(release) if self.jailed && now >= release => {
                self.jailed = false;
                self.jailed_until = None;
                true
            }
            _ => false,
        }
    }
}
