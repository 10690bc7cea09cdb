use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Stake or unstake request below the validator minimum; no state change.
    #[error("insufficient stake: operation requires {required} uZYTH, got {got} uZYTH")]
    InsufficientStake { required: u64, got: u64 },

    /// Address has no validator record.
    #[error("unknown validator {0}")]
    UnknownValidator(String),

    /// Unstake amount exceeds the bonded stake.
    #[error("unstake amount {requested} uZYTH exceeds bonded stake {bonded} uZYTH")]
    ExcessiveUnstake { requested: u64, bonded: u64 },

    /// Commission rate outside the 0–20% bound.
    #[error("commission rate {0} bps exceeds the 2000 bps cap")]
    InvalidCommission(u16),

    /// A debit would drive stake negative. The mutation is aborted and the
    /// ledger flagged; this is the only fatal condition in the ledger.
    #[error("ledger corruption: debit of {debit} uZYTH against {address} with stake {stake} uZYTH")]
    Corruption {
        address: String,
        stake: u64,
        debit: u64,
    },

    /// The single-writer task is gone; commands can no longer be served.
    #[error("ledger mailbox closed")]
    MailboxClosed,
}
