// FINALITY STATE MACHINE
//
// INVARIANTS:
// 1. Status transitions are monotone: PENDING -> {FINALIZED, REJECTED,
//    EXPIRED}, all terminal. A decided record never reopens.
// 2. Vote aggregation is commutative: the decision depends only on
//    accumulated totals, not arrival order. The single documented exception
//    is the AI score, which is first-writer-wins.
// 3. FINALIZED requires BOTH a 2/3 power quorum AND an AI gate pass
//    (APPROVE, or no usable verdict once the grace sub-deadline passes).
// 4. REJECTED on an AI REJECT verdict regardless of tally, or when
//    competing-hash power alone exceeds 1/3 of the committee.
// 5. Messages arriving after a terminal state are audit evidence only.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use zyth_ai::{AiDecision, AiScore};
use zyth_core::{Address, Block, ValidatorVote, VoteType};
use zyth_ledger::LedgerSnapshot;

use crate::error::ConsensusError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinalityStatus {
    Pending,
    Finalized,
    Rejected,
    Expired,
}

impl FinalityStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FinalityStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinalityStatus::Pending => "PENDING",
            FinalityStatus::Finalized => "FINALIZED",
            FinalityStatus::Rejected => "REJECTED",
            FinalityStatus::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RoundConfig {
    /// Full round deadline: no quorum by then means EXPIRED.
    pub round_deadline_secs: u64,
    /// Grace sub-deadline after which a missing AI verdict counts as an
    /// abstain-pass, preserving liveness on a slow scorer.
    pub ai_grace_secs: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_deadline_secs: 30,
            ai_grace_secs: 10,
        }
    }
}

/// Decision record for one candidate block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalityRecord {
    pub block_hash: String,
    pub height: u64,
    pub status: FinalityStatus,
    /// Power accumulated from approve votes for this block's hash.
    pub accumulated_power: f64,
    /// Power of distinct voters seen voting for any competing hash.
    pub conflicting_power: f64,
    pub ai_score: Option<AiScore>,
    pub opened_at: u64,
    pub decided_at: Option<u64>,
}

/// What happened to an inbound vote.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    /// Counted toward the quorum accumulator.
    Counted { accumulated_power: f64 },
    /// Recorded but not counted (reject/abstain vote for this hash).
    Recorded,
    /// Same voter, same hash, again. Evidence only.
    Duplicate,
    /// Vote for a different hash at this height. Evidence; feeds the fork
    /// alarm but never the quorum accumulator.
    CompetingHash { conflicting_power: f64 },
    /// Voter is not in the committee snapshot for this height.
    NotInCommittee,
    /// No round is open for the vote's height.
    UnknownRound,
    /// Arrived after the round reached a terminal state. Audit only.
    AfterDecision,
}

/// What happened to an inbound AI score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// First usable verdict for the round; it gates the decision.
    Recorded,
    /// A verdict was already recorded; this one is logged and ignored.
    DuplicateIgnored,
    /// Arrived after a terminal state. Audit only.
    AfterDecision,
    /// Score references a hash that is not this round's candidate.
    WrongBlock,
}

/// One in-flight (or archived) voting round.
#[derive(Debug, Clone)]
pub struct Round {
    pub record: FinalityRecord,
    pub snapshot: LedgerSnapshot,
    /// Every inbound vote, in arrival order, including duplicates and late
    /// arrivals. This is what the slashing scan reads.
    pub audit: Vec<ValidatorVote>,
    /// Voters already counted toward the accumulator.
    counted: BTreeSet<Address>,
    /// Voters whose competing-hash vote was already weighed.
    conflicting_voters: BTreeSet<Address>,
}

impl Round {
    fn new(block_hash: String, height: u64, snapshot: LedgerSnapshot, opened_at: u64) -> Self {
        Self {
            record: FinalityRecord {
                block_hash,
                height,
                status: FinalityStatus::Pending,
                accumulated_power: 0.0,
                conflicting_power: 0.0,
                ai_score: None,
                opened_at,
                decided_at: None,
            },
            snapshot,
            audit: Vec::new(),
            counted: BTreeSet::new(),
            conflicting_voters: BTreeSet::new(),
        }
    }

    /// Voters whose approve votes counted toward the quorum, in address
    /// order. This is the committee slice that shares the block reward.
    pub fn counted_voters(&self) -> Vec<Address> {
        self.counted.iter().cloned().collect()
    }

    /// Addresses that cast at least one vote (any hash) in this round.
    pub fn participants(&self) -> BTreeSet<Address> {
        self.audit.iter().map(|v| v.voter.clone()).collect()
    }

    /// Voters with votes for more than one distinct hash at this height.
    pub fn double_signers(&self) -> BTreeMap<Address, Vec<&ValidatorVote>> {
        let mut by_voter: BTreeMap<Address, Vec<&ValidatorVote>> = BTreeMap::new();
        for vote in &self.audit {
            by_voter.entry(vote.voter.clone()).or_default().push(vote);
        }
        by_voter.retain(|_, votes| {
            let hashes: BTreeSet<&str> = votes.iter().map(|v| v.block_hash.as_str()).collect();
            hashes.len() > 1
        });
        by_voter
    }
}

/// Collects votes and AI scores per height and decides finality.
///
/// Owns every FinalityRecord and the in-flight vote/score sets; the async
/// shell in round.rs drives it, tests drive it directly with a fake clock.
pub struct FinalityCoordinator {
    config: RoundConfig,
    rounds: BTreeMap<u64, Round>,
    /// Archived rounds replaced by a same-height retry.
    history: Vec<Round>,
    /// Heights that already consumed their single retry.
    retried: BTreeSet<u64>,
}

impl FinalityCoordinator {
    pub fn new(config: RoundConfig) -> Self {
        Self {
            config,
            rounds: BTreeMap::new(),
            history: Vec::new(),
            retried: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> RoundConfig {
        self.config
    }

    pub fn round(&self, height: u64) -> Option<&Round> {
        self.rounds.get(&height)
    }

    /// Open a PENDING round for a proposed block.
    ///
    /// A height whose round EXPIRED may be reopened exactly once with a new
    /// candidate; a decided height can never be reopened.
    pub fn open_round(
        &mut self,
        block: &Block,
        snapshot: LedgerSnapshot,
        now: u64,
    ) -> Result<(), ConsensusError> {
        let height = block.header.height;
        if let Some(existing) = self.rounds.get(&height) {
            match existing.record.status {
                FinalityStatus::Pending => return Err(ConsensusError::RoundInProgress(height)),
                FinalityStatus::Finalized | FinalityStatus::Rejected => {
                    return Err(ConsensusError::HeightDecided(height))
                }
                FinalityStatus::Expired => {
                    if self.retried.contains(&height) {
                        return Err(ConsensusError::RetryExhausted(height));
                    }
                    self.retried.insert(height);
                    if let Some(old) = self.rounds.remove(&height) {
                        self.history.push(old);
                    }
                    info!("reopening expired height {} with new candidate", height);
                }
            }
        }

        info!(
            "opened finality round for block {} at height {} (committee of {}, total power {:.2})",
            block.hash,
            height,
            snapshot.len(),
            snapshot.total_power
        );
        self.rounds
            .insert(height, Round::new(block.hash.clone(), height, snapshot, now));
        Ok(())
    }

    /// Record an inbound vote and fold it into the accumulators.
    pub fn record_vote(&mut self, vote: ValidatorVote, now: u64) -> VoteOutcome {
        let round = match self.rounds.get_mut(&vote.height) {
            Some(round) => round,
            None => {
                warn!("vote for unknown height {} dropped", vote.height);
                return VoteOutcome::UnknownRound;
            }
        };

        // Everything lands in the audit trail, decided or not.
        round.audit.push(vote.clone());

        if round.record.status.is_terminal() {
            return VoteOutcome::AfterDecision;
        }

        let power = match round.snapshot.power_of(&vote.voter) {
            Some(power) => power,
            None => {
                warn!(
                    "vote from non-committee address {} at height {} ignored",
                    vote.voter, vote.height
                );
                return VoteOutcome::NotInCommittee;
            }
        };

        if vote.block_hash != round.record.block_hash {
            // Competing-hash vote: evidence plus fork-alarm weight, once per
            // voter.
            if round.conflicting_voters.insert(vote.voter.clone()) {
                round.record.conflicting_power += power;
                warn!(
                    "conflicting vote from {} at height {} (hash {} vs candidate {})",
                    vote.voter, vote.height, vote.block_hash, round.record.block_hash
                );
            }
            let outcome = VoteOutcome::CompetingHash {
                conflicting_power: round.record.conflicting_power,
            };
            self.evaluate(vote.height, now);
            return outcome;
        }

        if round.counted.contains(&vote.voter) {
            return VoteOutcome::Duplicate;
        }

        match vote.vote {
            VoteType::Approve => {
                round.counted.insert(vote.voter.clone());
                round.record.accumulated_power += power;
                let outcome = VoteOutcome::Counted {
                    accumulated_power: round.record.accumulated_power,
                };
                self.evaluate(vote.height, now);
                outcome
            }
            VoteType::Reject | VoteType::Abstain => VoteOutcome::Recorded,
        }
    }

    /// Record an AI score: first usable verdict wins, everything later is
    /// logged and ignored for the decision.
    pub fn record_score(&mut self, score: AiScore, now: u64) -> ScoreOutcome {
        let round = match self.rounds.get_mut(&score.height) {
            Some(round) => round,
            None => {
                warn!("AI score for unknown height {} dropped", score.height);
                return ScoreOutcome::WrongBlock;
            }
        };

        if score.block_hash != round.record.block_hash {
            warn!(
                "AI score for stale hash {} at height {} ignored",
                score.block_hash, score.height
            );
            return ScoreOutcome::WrongBlock;
        }
        if round.record.status.is_terminal() {
            info!(
                "late AI score for decided height {} recorded for audit only",
                score.height
            );
            return ScoreOutcome::AfterDecision;
        }
        if round.record.ai_score.is_some() {
            info!("duplicate AI score for height {} ignored", score.height);
            return ScoreOutcome::DuplicateIgnored;
        }

        info!(
            "AI verdict for height {}: {:?} (score {:.3}, confidence {:.3})",
            score.height, score.decision, score.score, score.confidence
        );
        let height = score.height;
        round.record.ai_score = Some(score.clamped());
        self.evaluate(height, now);
        ScoreOutcome::Recorded
    }

    /// Run the transition function for a height. Idempotent; terminal
    /// states latch.
    pub fn evaluate(&mut self, height: u64, now: u64) -> Option<FinalityStatus> {
        let round = self.rounds.get_mut(&height)?;
        let record = &mut round.record;
        if record.status.is_terminal() {
            return Some(record.status);
        }

        let quorum = round.snapshot.quorum_power();
        let fork_alarm = round.snapshot.fork_alarm_power();

        // AI REJECT overrides any tally.
        if matches!(
            record.ai_score.as_ref().map(|s| s.decision),
            Some(AiDecision::Reject)
        ) {
            warn!("height {} REJECTED by AI verdict", height);
            record.status = FinalityStatus::Rejected;
            record.decided_at = Some(now);
            return Some(record.status);
        }

        // Fork alarm: a third of the committee voting elsewhere is a safety
        // signal, not a liveness blip.
        if record.conflicting_power > fork_alarm {
            warn!(
                "height {} REJECTED: conflicting power {:.2} exceeds fork alarm {:.2}",
                height, record.conflicting_power, fork_alarm
            );
            record.status = FinalityStatus::Rejected;
            record.decided_at = Some(now);
            return Some(record.status);
        }

        // An empty committee has a zero quorum; it must never finalize.
        if !round.snapshot.is_empty() && record.accumulated_power >= quorum {
            let grace_deadline = record.opened_at + self.config.ai_grace_secs;
            let gate_passes = match record.ai_score.as_ref().map(|s| s.decision) {
                Some(AiDecision::Approve) => true,
                // FLAG is advisory; absent and FLAG both become an
                // abstain-pass once the grace window closes.
                Some(AiDecision::Flag) | None => now >= grace_deadline,
                Some(AiDecision::Reject) => false,
            };
            if gate_passes {
                info!(
                    "height {} FINALIZED with power {:.2} / quorum {:.2}",
                    height, record.accumulated_power, quorum
                );
                record.status = FinalityStatus::Finalized;
                record.decided_at = Some(now);
                return Some(record.status);
            }
        }

        if now >= record.opened_at + self.config.round_deadline_secs {
            warn!(
                "height {} EXPIRED with power {:.2} / quorum {:.2}",
                height, record.accumulated_power, quorum
            );
            record.status = FinalityStatus::Expired;
            record.decided_at = Some(now);
            return Some(record.status);
        }

        Some(FinalityStatus::Pending)
    }

    /// True if an expired height may still be retried by its proposer.
    pub fn can_retry(&self, height: u64) -> bool {
        matches!(
            self.rounds.get(&height).map(|r| r.record.status),
            Some(FinalityStatus::Expired)
        ) && !self.retried.contains(&height)
    }

    pub fn archived_rounds(&self) -> &[Round] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zyth_core::MICRO_PER_ZYTH;
    use zyth_ledger::StakeLedger;

    fn addr(tag: u8) -> Address {
        Address::from_string(format!("ZYTH_V{:039}", tag))
    }

    /// Committee of four 2,500-ZYTH validators: each member's power is 50,
    /// total power 200, quorum 133.33, fork alarm 66.67.
    fn snapshot() -> LedgerSnapshot {
        let mut ledger = StakeLedger::new();
        for tag in 1..=4 {
            ledger.stake(addr(tag), 2_500 * MICRO_PER_ZYTH, 0, 0).unwrap();
        }
        ledger.snapshot(1)
    }

    fn block() -> Block {
        Block::new(
            "0".repeat(64),
            vec![],
            1,
            1,
            addr(9),
            1_000,
        )
    }

    fn vote(tag: u8, hash: &str, vote_type: VoteType) -> ValidatorVote {
        ValidatorVote {
            voter: addr(tag),
            block_hash: hash.to_string(),
            height: 1,
            vote: vote_type,
            signature: vec![1],
            timestamp: 1_001,
        }
    }

    fn score(hash: &str, decision: AiDecision) -> AiScore {
        AiScore {
            block_hash: hash.to_string(),
            height: 1,
            score: 0.9,
            confidence: 0.8,
            decision,
            source: "ai-node-1".to_string(),
        }
    }

    fn open(coordinator: &mut FinalityCoordinator) -> Block {
        let candidate = block();
        coordinator.open_round(&candidate, snapshot(), 1_000).unwrap();
        candidate
    }

    #[test]
    fn test_finalizes_on_quorum_and_approve() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        coordinator.record_score(score(&candidate.hash, AiDecision::Approve), 1_001);
        // 3 of 4 members = 150 power >= 133.33 quorum
        coordinator.record_vote(vote(1, &candidate.hash, VoteType::Approve), 1_002);
        coordinator.record_vote(vote(2, &candidate.hash, VoteType::Approve), 1_003);
        assert_eq!(
            coordinator.round(1).unwrap().record.status,
            FinalityStatus::Pending
        );
        coordinator.record_vote(vote(3, &candidate.hash, VoteType::Approve), 1_004);

        let record = &coordinator.round(1).unwrap().record;
        assert_eq!(record.status, FinalityStatus::Finalized);
        assert_eq!(record.decided_at, Some(1_004));
    }

    #[test]
    fn test_ai_reject_beats_sufficient_votes() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        for tag in 1..=4 {
            coordinator.record_vote(vote(tag, &candidate.hash, VoteType::Approve), 1_002);
        }
        // quorum reached but no verdict yet and grace not elapsed
        assert_eq!(
            coordinator.round(1).unwrap().record.status,
            FinalityStatus::Pending
        );

        coordinator.record_score(score(&candidate.hash, AiDecision::Reject), 1_003);
        assert_eq!(
            coordinator.round(1).unwrap().record.status,
            FinalityStatus::Rejected
        );
    }

    #[test]
    fn test_absent_score_passes_after_grace() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        for tag in 1..=3 {
            coordinator.record_vote(vote(tag, &candidate.hash, VoteType::Approve), 1_002);
        }
        assert_eq!(coordinator.evaluate(1, 1_005), Some(FinalityStatus::Pending));
        // grace sub-deadline: opened_at + 10s
        assert_eq!(coordinator.evaluate(1, 1_010), Some(FinalityStatus::Finalized));
    }

    #[test]
    fn test_flag_verdict_behaves_as_abstain() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        coordinator.record_score(score(&candidate.hash, AiDecision::Flag), 1_001);
        for tag in 1..=3 {
            coordinator.record_vote(vote(tag, &candidate.hash, VoteType::Approve), 1_002);
        }
        assert_eq!(coordinator.evaluate(1, 1_003), Some(FinalityStatus::Pending));
        assert_eq!(coordinator.evaluate(1, 1_010), Some(FinalityStatus::Finalized));
    }

    #[test]
    fn test_fork_alarm_rejects() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        // 2 of 4 voters (power 100 > 66.67) vote for a competing hash
        coordinator.record_vote(vote(1, "competing_hash", VoteType::Approve), 1_002);
        assert_eq!(
            coordinator.round(1).unwrap().record.status,
            FinalityStatus::Pending
        );
        coordinator.record_vote(vote(2, "competing_hash", VoteType::Approve), 1_003);

        let record = &coordinator.round(1).unwrap().record;
        assert_eq!(record.status, FinalityStatus::Rejected);
        assert!(record.conflicting_power > 66.0);
        let _ = candidate;
    }

    #[test]
    fn test_round_expires_without_quorum() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        coordinator.record_vote(vote(1, &candidate.hash, VoteType::Approve), 1_002);
        assert_eq!(coordinator.evaluate(1, 1_029), Some(FinalityStatus::Pending));
        assert_eq!(coordinator.evaluate(1, 1_030), Some(FinalityStatus::Expired));
    }

    #[test]
    fn test_terminal_state_latches() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        assert_eq!(coordinator.evaluate(1, 2_000), Some(FinalityStatus::Expired));
        // a quorum arriving later cannot reopen the decision
        for tag in 1..=4 {
            let outcome =
                coordinator.record_vote(vote(tag, &candidate.hash, VoteType::Approve), 2_001);
            assert_eq!(outcome, VoteOutcome::AfterDecision);
        }
        assert_eq!(coordinator.evaluate(1, 2_002), Some(FinalityStatus::Expired));
        // but the late votes are in the audit trail
        assert_eq!(coordinator.round(1).unwrap().audit.len(), 4);
    }

    #[test]
    fn test_duplicate_vote_not_double_counted() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        coordinator.record_vote(vote(1, &candidate.hash, VoteType::Approve), 1_002);
        let outcome = coordinator.record_vote(vote(1, &candidate.hash, VoteType::Approve), 1_003);
        assert_eq!(outcome, VoteOutcome::Duplicate);

        let record = &coordinator.round(1).unwrap().record;
        assert!((record.accumulated_power - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_committee_vote_ignored() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        let outcome = coordinator.record_vote(vote(42, &candidate.hash, VoteType::Approve), 1_002);
        assert_eq!(outcome, VoteOutcome::NotInCommittee);
        assert_eq!(coordinator.round(1).unwrap().record.accumulated_power, 0.0);
    }

    #[test]
    fn test_first_score_wins() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        assert_eq!(
            coordinator.record_score(score(&candidate.hash, AiDecision::Approve), 1_001),
            ScoreOutcome::Recorded
        );
        assert_eq!(
            coordinator.record_score(score(&candidate.hash, AiDecision::Reject), 1_002),
            ScoreOutcome::DuplicateIgnored
        );
        assert_eq!(
            coordinator
                .round(1)
                .unwrap()
                .record
                .ai_score
                .as_ref()
                .unwrap()
                .decision,
            AiDecision::Approve
        );
    }

    #[test]
    fn test_expired_height_retries_exactly_once() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);
        assert_eq!(coordinator.evaluate(1, 2_000), Some(FinalityStatus::Expired));
        assert!(coordinator.can_retry(1));

        // second candidate at the same height
        let retry = Block::new("0".repeat(64), vec![], 1, 1, addr(9), 2_000);
        coordinator.open_round(&retry, snapshot(), 2_000).unwrap();
        assert_eq!(coordinator.archived_rounds().len(), 1);

        assert_eq!(coordinator.evaluate(1, 3_000), Some(FinalityStatus::Expired));
        assert!(!coordinator.can_retry(1));
        let third = Block::new("0".repeat(64), vec![], 1, 1, addr(9), 3_000);
        assert!(matches!(
            coordinator.open_round(&third, snapshot(), 3_000),
            Err(ConsensusError::RetryExhausted(1))
        ));
        let _ = candidate;
    }

    #[test]
    fn test_decided_height_cannot_reopen() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);
        coordinator.record_score(score(&candidate.hash, AiDecision::Reject), 1_001);

        let again = Block::new("0".repeat(64), vec![], 1, 1, addr(9), 1_500);
        assert!(matches!(
            coordinator.open_round(&again, snapshot(), 1_500),
            Err(ConsensusError::HeightDecided(1))
        ));
    }

    #[test]
    fn test_empty_committee_expires_instead_of_finalizing() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = block();
        let empty = StakeLedger::new().snapshot(1);
        coordinator.open_round(&candidate, empty, 1_000).unwrap();
        coordinator.record_score(score(&candidate.hash, AiDecision::Approve), 1_001);

        assert_eq!(coordinator.evaluate(1, 1_011), Some(FinalityStatus::Pending));
        assert_eq!(coordinator.evaluate(1, 1_030), Some(FinalityStatus::Expired));
    }

    #[test]
    fn test_double_signer_detection() {
        let mut coordinator = FinalityCoordinator::new(RoundConfig::default());
        let candidate = open(&mut coordinator);

        coordinator.record_vote(vote(1, &candidate.hash, VoteType::Approve), 1_002);
        coordinator.record_vote(vote(1, "competing_hash", VoteType::Approve), 1_003);
        coordinator.record_vote(vote(2, &candidate.hash, VoteType::Approve), 1_004);

        let double_signers = coordinator.round(1).unwrap().double_signers();
        assert_eq!(double_signers.len(), 1);
        assert!(double_signers.contains_key(&addr(1)));
    }
}
