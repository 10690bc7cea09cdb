// QUADRATIC VOTING POWER
//
// Power(stake) = sqrt(stake in ZYTH). Sub-linear so doubling stake less
// than doubles influence, bounding whale dominance:
//   Power(4s) = 2 * Power(s)

use zyth_core::MICRO_PER_ZYTH;

/// Voting power for a bonded stake (micro-ZYTH in, power units out).
pub fn power(stake_micro: u64) -> f64 {
    (stake_micro as f64 / MICRO_PER_ZYTH as f64).sqrt()
}

/// Total committee power over an iterator of bonded stakes.
pub fn committee_total_power<I: IntoIterator<Item = u64>>(stakes: I) -> f64 {
    stakes.into_iter().map(power).sum()
}
