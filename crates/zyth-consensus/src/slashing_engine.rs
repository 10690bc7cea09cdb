// SLASHING ENGINE
//
// INVARIANTS:
// 1. Runs only over terminal rounds, scanning that round's audit trail.
// 2. Deterministic: the same vote history always reproduces the same
//    SlashEvents (clock values are injected, iteration is ordered).
// 3. One DOUBLE_SIGN event per offender per height, ever.
// 4. The engine never mutates the stake ledger; it emits SlashActions the
//    node forwards to the ledger's single writer, then records the applied
//    event in its append-only history.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use zyth_core::{Address, ValidatorVote};
use zyth_ledger::JailTerm;

use crate::error::ConsensusError;
use crate::finality::Round;

/// Double-sign penalty: 5% of stake, immediate indefinite jail.
pub const DOUBLE_SIGN_PENALTY_BPS: u32 = 500;

/// Missed-round penalty: 0.5% of stake.
pub const NON_PARTICIPATION_PENALTY_BPS: u32 = 50;

/// Downtime penalty: 1% of stake, cooldown jail.
pub const DOWNTIME_PENALTY_BPS: u32 = 100;

/// Availability floor over the trailing participation window.
pub const AVAILABILITY_FLOOR: f64 = 0.95;

/// Trailing rounds considered for downtime.
pub const PARTICIPATION_WINDOW: usize = 100;

/// Consecutive missed rounds before a non-participation jail.
pub const CONSECUTIVE_MISSES_BEFORE_JAIL: u32 = 3;

/// Cooldown jail duration for downtime and escalated non-participation.
pub const JAIL_COOLDOWN_SECS: u64 = 3_600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SlashKind {
    DoubleSign,
    Downtime,
    NonParticipation,
}

impl SlashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlashKind::DoubleSign => "DOUBLE_SIGN",
            SlashKind::Downtime => "DOWNTIME",
            SlashKind::NonParticipation => "NON_PARTICIPATION",
        }
    }
}

/// Penalty request emitted by a scan; applied by the ledger owner.
#[derive(Debug, Clone, PartialEq)]
pub struct SlashAction {
    pub offender: Address,
    pub kind: SlashKind,
    pub penalty_bps: u32,
    pub jail: Option<JailTerm>,
    pub evidence_ref: String,
}

/// Append-only audit record of an applied penalty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlashEvent {
    pub offender: Address,
    pub kind: SlashKind,
    pub evidence_ref: String,
    /// Amount actually debited, micro-ZYTH.
    pub penalty: u64,
    pub applied_at: u64,
}

/// Verify a double-sign evidence pair: same voter, same height, distinct
/// hashes, both signed. Malformed evidence is rejected with no penalty.
pub fn verify_double_sign_evidence(
    a: &ValidatorVote,
    b: &ValidatorVote,
) -> Result<(), ConsensusError> {
    if a.voter != b.voter {
        return Err(ConsensusError::SlashEvidenceInvalid(
            "votes are from different voters".to_string(),
        ));
    }
    if a.height != b.height {
        return Err(ConsensusError::SlashEvidenceInvalid(
            "votes are for different heights".to_string(),
        ));
    }
    if a.block_hash == b.block_hash {
        return Err(ConsensusError::SlashEvidenceInvalid(
            "votes are for the same hash".to_string(),
        ));
    }
    if a.signature.is_empty() || b.signature.is_empty() {
        return Err(ConsensusError::SlashEvidenceInvalid(
            "unsigned vote cannot be evidence".to_string(),
        ));
    }
    Ok(())
}

pub struct SlashingEngine {
    history: Vec<SlashEvent>,
    consecutive_misses: BTreeMap<Address, u32>,
    participation: BTreeMap<Address, VecDeque<bool>>,
    scanned_heights: BTreeSet<u64>,
}

impl SlashingEngine {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            consecutive_misses: BTreeMap::new(),
            participation: BTreeMap::new(),
            scanned_heights: BTreeSet::new(),
        }
    }

    /// Scan a terminal round for offenses. Idempotent per height: a second
    /// scan of the same height yields no actions.
    pub fn scan_round(
        &mut self,
        round: &Round,
        excused: &BTreeSet<Address>,
        now: u64,
    ) -> Result<Vec<SlashAction>, ConsensusError> {
        let height = round.record.height;
        if !round.record.status.is_terminal() {
            return Err(ConsensusError::RoundNotTerminal(height));
        }
        if !self.scanned_heights.insert(height) {
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();

        // --- DOUBLE_SIGN: two votes for different hashes at this height ---
        for (offender, votes) in round.double_signers() {
            let pair = first_conflicting_pair(&votes);
            let Some((first, second)) = pair else {
                continue;
            };
            match verify_double_sign_evidence(first, second) {
                Ok(()) => {
                    warn!(
                        "double-sign by {} at height {}: {} vs {}",
                        offender, height, first.block_hash, second.block_hash
                    );
                    actions.push(SlashAction {
                        offender: offender.clone(),
                        kind: SlashKind::DoubleSign,
                        penalty_bps: DOUBLE_SIGN_PENALTY_BPS,
                        jail: Some(JailTerm::Indefinite),
                        evidence_ref: format!(
                            "double-sign:h{}:{}+{}",
                            height, first.block_hash, second.block_hash
                        ),
                    });
                }
                Err(e) => {
                    warn!("discarding malformed double-sign evidence for {}: {}", offender, e);
                }
            }
        }

        // --- NON_PARTICIPATION: committee member with no vote this round ---
        let participants = round.participants();
        for member in &round.snapshot.members {
            let address = &member.address;
            let participated = participants.contains(address);

            let window = self.participation.entry(address.clone()).or_default();
            window.push_back(participated);
            if window.len() > PARTICIPATION_WINDOW {
                window.pop_front();
            }

            if participated || excused.contains(address) {
                self.consecutive_misses.insert(address.clone(), 0);
                continue;
            }

            let misses = self.consecutive_misses.entry(address.clone()).or_insert(0);
            *misses += 1;
            let jail = if *misses >= CONSECUTIVE_MISSES_BEFORE_JAIL {
                *misses = 0;
                Some(JailTerm::Until(now + JAIL_COOLDOWN_SECS))
            } else {
                None
            };
            actions.push(SlashAction {
                offender: address.clone(),
                kind: SlashKind::NonParticipation,
                penalty_bps: NON_PARTICIPATION_PENALTY_BPS,
                jail,
                evidence_ref: format!("non-participation:h{}", height),
            });
        }

        // --- DOWNTIME: availability below the floor over a full window ---
        for member in &round.snapshot.members {
            let address = &member.address;
            let Some(window) = self.participation.get_mut(address) else {
                continue;
            };
            if window.len() < PARTICIPATION_WINDOW {
                continue;
            }
            let present = window.iter().filter(|p| **p).count();
            let availability = present as f64 / window.len() as f64;
            if availability < AVAILABILITY_FLOOR {
                warn!(
                    "downtime for {}: availability {:.3} over trailing {} rounds",
                    address,
                    availability,
                    window.len()
                );
                actions.push(SlashAction {
                    offender: address.clone(),
                    kind: SlashKind::Downtime,
                    penalty_bps: DOWNTIME_PENALTY_BPS,
                    jail: Some(JailTerm::Until(now + JAIL_COOLDOWN_SECS)),
                    evidence_ref: format!(
                        "downtime:h{}:availability={:.3}",
                        height, availability
                    ),
                });
                // Start a fresh window after the penalty, otherwise the
                // same trailing rounds would be punished again on release.
                window.clear();
            }
        }

        Ok(actions)
    }

    /// Record an applied penalty in the append-only history.
    pub fn record_applied(&mut self, action: &SlashAction, penalty: u64, applied_at: u64) -> SlashEvent {
        info!(
            "slash applied: {} {} {} uZYTH ({})",
            action.kind.as_str(),
            action.offender,
            penalty,
            action.evidence_ref
        );
        let event = SlashEvent {
            offender: action.offender.clone(),
            kind: action.kind,
            evidence_ref: action.evidence_ref.clone(),
            penalty,
            applied_at,
        };
        self.history.push(event.clone());
        event
    }

    pub fn history(&self) -> &[SlashEvent] {
        &self.history
    }

    pub fn total_slashed(&self) -> u64 {
        self.history.iter().map(|e| e.penalty).sum()
    }
}

impl Default for SlashingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First pair of votes with distinct hashes, in arrival order.
fn first_conflicting_pair<'a>(
    votes: &[&'a ValidatorVote],
) -> Option<(&'a ValidatorVote, &'a ValidatorVote)> {
    let first = votes.first()?;
    let second = votes.iter().find(|v| v.block_hash != first.block_hash)?;
    Some((first, second))
}
