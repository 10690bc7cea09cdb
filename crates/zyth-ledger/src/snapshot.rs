use serde::{Deserialize, Serialize};

use zyth_core::Address;

/// One committee seat in a height snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitteeMember {
    pub address: Address,
    /// Bonded stake at snapshot time, micro-ZYTH.
    pub stake: u64,
    /// Quadratic voting power derived from `stake` at snapshot time.
    pub power: f64,
}

/// Immutable committee view captured at block-proposal time.
///
/// All round-scoped readers (finality accounting, reward split, slashing
/// scan) work from the snapshot, so a stake change mid-round never alters an
/// already-counted vote's weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub height: u64,
    /// Members sorted by address for replay-stable iteration.
    pub members: Vec<CommitteeMember>,
    pub total_power: f64,
}

impl LedgerSnapshot {
    pub fn power_of(&self, address: &Address) -> Option<f64> {
        self.members
            .iter()
            .find(|m| &m.address == address)
            .map(|m| m.power)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.iter().any(|m| &m.address == address)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Quorum threshold: two thirds of total committee power.
    pub fn quorum_power(&self) -> f64 {
        self.total_power * 2.0 / 3.0
    }

    /// Fork-alarm threshold: one third of total committee power.
    pub fn fork_alarm_power(&self) -> f64 {
        self.total_power / 3.0
    }
}
