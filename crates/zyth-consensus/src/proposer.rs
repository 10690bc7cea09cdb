use sha2::{Digest, Sha256};

use zyth_core::Address;
use zyth_ledger::LedgerSnapshot;

/// Deterministic, power-weighted proposer selection for a height.
///
/// Seeded from SHA-256 of (height, previous_hash) so every node with the
/// same committee snapshot computes the same expected proposer. Selection
/// probability is proportional to quadratic voting power, not raw stake.
pub fn select_proposer(
    height: u64,
    previous_hash: &str,
    snapshot: &LedgerSnapshot,
) -> Option<Address> {
    if snapshot.is_empty() || snapshot.total_power <= 0.0 {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(height.to_le_bytes());
    hasher.update(previous_hash.as_bytes());
    let digest = hasher.finalize();
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    let seed = u64::from_le_bytes(seed_bytes);

    // Map the seed onto [0, total_power) and walk the committee.
    let point = (seed as f64 / u64::MAX as f64) * snapshot.total_power;
    let mut accumulated = 0.0;
    for member in &snapshot.members {
        accumulated += member.power;
        if accumulated > point {
            return Some(member.address.clone());
        }
    }
    // Float accumulation can land a hair short of total_power.
    snapshot.members.last().map(|m| m.address.clone())
}
