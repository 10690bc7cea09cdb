pub mod account;
pub mod error;
pub mod handle;
pub mod ledger;
pub mod snapshot;
pub mod unbonding;
pub mod voting_power;

pub use account::{ValidatorAccount, MAX_COMMISSION_BPS};
pub use error::LedgerError;
pub use handle::{spawn_ledger, LedgerCommand, LedgerHandle, LedgerStats};
pub use ledger::{JailTerm, SlashOutcome, StakeLedger, MINIMUM_VALIDATOR_STAKE};
pub use snapshot::{CommitteeMember, LedgerSnapshot};
pub use unbonding::{UnbondingRequest, UNBONDING_DELAY_SECS};
pub use voting_power::{committee_total_power, power};
