use thiserror::Error;

use zyth_core::CoreError;
use zyth_ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    /// PoW nonce search exhausted its attempt budget. Not fatal: the caller
    /// retries with a fresh timestamp/payload.
    #[error("no PoW solution within {attempts} attempts at difficulty {difficulty}")]
    NoSolutionFound { attempts: u64, difficulty: u64 },

    /// Block violates a consensus rule (difficulty target, hash integrity).
    /// The block is dropped; peer penalties are out of scope here.
    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },

    /// No open round for the given height.
    #[error("no open finality round for height {0}")]
    UnknownRound(u64),

    /// A round for this height is still pending.
    #[error("finality round already in progress for height {0}")]
    RoundInProgress(u64),

    /// The height already reached FINALIZED or REJECTED.
    #[error("height {0} already decided")]
    HeightDecided(u64),

    /// An expired height may be retried exactly once.
    #[error("height {0} already consumed its single proposer retry")]
    RetryExhausted(u64),

    /// Slashing scans only run over terminal rounds.
    #[error("round at height {0} has not reached a terminal state")]
    RoundNotTerminal(u64),

    /// Malformed slash evidence: rejected, no penalty applied.
    #[error("invalid slash evidence: {0}")]
    SlashEvidenceInvalid(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
