// ROUND COLLECTOR
//
// Async shell around the finality state machine: one collector task per
// proposed block, fed votes and AI scores through a mailbox, cancelled the
// instant the round reaches a terminal state, the deadline fires, or the
// node shuts down. Messages arriving after cancellation are routed to the
// coordinator by the node for audit only.

use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use zyth_ai::AiScore;
use zyth_core::ValidatorVote;

use crate::finality::{FinalityCoordinator, FinalityStatus};

/// Inputs delivered to a round collector.
#[derive(Debug, Clone)]
pub enum RoundMessage {
    Vote(ValidatorVote),
    Score(AiScore),
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Drive the round at `height` until it reaches a terminal state.
///
/// Returns the terminal status. If the shutdown signal fires first, the
/// round is left as it stands (a later evaluate call will expire it) and
/// the current status is returned.
pub async fn run_round(
    coordinator: Arc<Mutex<FinalityCoordinator>>,
    height: u64,
    mut inbox: mpsc::Receiver<RoundMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> FinalityStatus {
    loop {
        // Evaluate outside the select so every message and every timer tick
        // runs the transition function exactly once.
        let (status, next_wake) = {
            let mut coordinator = coordinator.lock();
            let now = now_secs();
            let status = coordinator
                .evaluate(height, now)
                .unwrap_or(FinalityStatus::Expired);
            let next_wake = coordinator
                .round(height)
                .map(|round| {
                    let config = coordinator.config();
                    let grace = round.record.opened_at + config.ai_grace_secs;
                    let deadline = round.record.opened_at + config.round_deadline_secs;
                    // earliest pending boundary strictly after now
                    if now < grace {
                        grace - now
                    } else if now < deadline {
                        deadline - now
                    } else {
                        1
                    }
                })
                .unwrap_or(1);
            (status, next_wake)
        };

        if status.is_terminal() {
            info!("round at height {} closed: {}", height, status.as_str());
            return status;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    warn!("round collector for height {} cancelled by shutdown", height);
                    return status;
                }
            }
            message = inbox.recv() => {
                match message {
                    Some(RoundMessage::Vote(vote)) => {
                        let mut coordinator = coordinator.lock();
                        coordinator.record_vote(vote, now_secs());
                    }
                    Some(RoundMessage::Score(score)) => {
                        let mut coordinator = coordinator.lock();
                        coordinator.record_score(score, now_secs());
                    }
                    None => {
                        // All senders gone; only the timers can close the
                        // round now.
                        tokio::time::sleep(Duration::from_secs(next_wake)).await;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(next_wake)) => {}
        }
    }
}
