pub mod rewards;

pub use rewards::{
    RewardDistributor, RewardShares, COMMITTEE_SHARE_BPS, MINER_SHARE_BPS, TREASURY_SHARE_BPS,
};
