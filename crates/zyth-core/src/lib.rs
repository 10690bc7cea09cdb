// === Core Data Model ===
pub mod block;
pub mod crypto;
pub mod error;
pub mod state;
pub mod transaction;

// === Re-exports for broader ecosystem access ===
pub use block::{Block, BlockHeader, ValidatorVote, VoteType};
pub use crypto::{hash_data, verify_signature, Address, KeyPair};
pub use error::CoreError;
pub use state::{Account, AccountState};
pub use transaction::Transaction;

/// Smallest accounting unit: 1 ZYTH = 1,000,000 micro-ZYTH.
///
/// All balances, stakes, and rewards are carried in micro-ZYTH so that
/// percentage splits stay in exact integer arithmetic.
pub const MICRO_PER_ZYTH: u64 = 1_000_000;

/// Block wire format version.
pub const BLOCK_VERSION: u32 = 1;

/// Well-known treasury account address.
pub const TREASURY_ADDRESS: &str = "ZYTH_TREASURY_0000000000000000000";
