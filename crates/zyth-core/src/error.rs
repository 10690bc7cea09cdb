use thiserror::Error;

/// Errors produced by the core data model.
///
/// Block-shaped failures carry enough context to be logged and audited;
/// a rejected block is dropped by the caller, never a crash.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Block failed structural validation (bad hash link, merkle root, or size).
    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },

    /// Transaction sender is not a known account.
    #[error("unknown account {0}")]
    UnknownAccount(String),

    /// Transaction nonce does not match the account's next nonce.
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    /// Account balance cannot cover amount + fee.
    #[error("insufficient balance: need {needed} uZYTH, have {available} uZYTH")]
    InsufficientBalance { needed: u64, available: u64 },

    /// Key material could not be generated or parsed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Balance arithmetic would overflow; the mutation is aborted.
    #[error("balance overflow crediting {amount} uZYTH to {address}")]
    BalanceOverflow { address: String, amount: u64 },
}
