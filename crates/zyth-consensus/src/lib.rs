pub mod error;
pub mod finality;
pub mod pow_engine;
pub mod proposer;
pub mod round;
pub mod slashing_engine;

pub use error::ConsensusError;
pub use finality::{
    FinalityCoordinator, FinalityRecord, FinalityStatus, Round, RoundConfig, ScoreOutcome,
    VoteOutcome,
};
pub use pow_engine::{PowEngine, REWARD_BASE, REWARD_REDUCTION_INTERVAL, RETARGET_WINDOW};
pub use proposer::select_proposer;
pub use round::{run_round, RoundMessage};
pub use slashing_engine::{SlashAction, SlashEvent, SlashKind, SlashingEngine};
