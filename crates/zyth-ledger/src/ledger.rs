// STAKE LEDGER
//
// INVARIANTS:
// 1. Single writer: all mutation goes through one owner (see handle.rs);
//    everything else reads per-height snapshots.
// 2. Stake never goes negative; a debit that would underflow aborts the
//    mutation and surfaces LedgerError::Corruption.
// 3. Validator records are deactivated, never deleted.
// 4. A slash voids every pending unbonding request of the offender.

use log::{error, info, warn};
use std::collections::BTreeMap;

use zyth_core::Address;

use crate::account::ValidatorAccount;
use crate::error::LedgerError;
use crate::snapshot::{CommitteeMember, LedgerSnapshot};
use crate::unbonding::UnbondingRequest;
use crate::voting_power::power;

use zyth_core::MICRO_PER_ZYTH;

/// Minimum bonded stake to become (and remain) a validator: 1,000 ZYTH.
pub const MINIMUM_VALIDATOR_STAKE: u64 = 1_000 * MICRO_PER_ZYTH;

/// Jail duration attached to a slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JailTerm {
    /// No automatic release; requires explicit re-activation.
    Indefinite,
    /// Released by the jail sweep once this unix-seconds time passes.
    Until(u64),
}

impl JailTerm {
    fn release_time(self) -> Option<u64> {
        match self {
            JailTerm::Indefinite => None,
            JailTerm::Until(at) => Some(at),
        }
    }
}

/// Result of applying a slash debit.
#[derive(Debug, Clone, PartialEq)]
pub struct SlashOutcome {
    pub address: Address,
    /// Amount actually debited, micro-ZYTH.
    pub penalty: u64,
    /// Stake remaining after the debit.
    pub remaining_stake: u64,
    /// True if the debit dropped the validator below the minimum and it was
    /// deactivated.
    pub deactivated: bool,
    /// Unbonding amounts voided by this slash.
    pub voided_unbonding: u64,
}

/// Authoritative validator stake ledger.
#[derive(Debug, Default)]
pub struct StakeLedger {
    validators: BTreeMap<Address, ValidatorAccount>,
    unbonding: Vec<UnbondingRequest>,
}

impl StakeLedger {
    pub fn new() -> Self {
        Self {
            validators: BTreeMap::new(),
            unbonding: Vec::new(),
        }
    }

    pub fn get(&self, address: &Address) -> Option<&ValidatorAccount> {
        self.validators.get(address)
    }

    /// Bond stake. Creates the validator on first deposit (which must meet
    /// the minimum); later deposits top up an existing account, including a
    /// deactivated one, which is reactivated once back above the minimum.
    pub fn stake(
        &mut self,
        address: Address,
        amount: u64,
        commission_bps: u16,
        now: u64,
    ) -> Result<(), LedgerError> {
        match self.validators.get_mut(&address) {
            Some(account) => {
                account.stake = account.stake.saturating_add(amount);
                if !account.active && account.stake >= MINIMUM_VALIDATOR_STAKE {
                    account.active = true;
                    info!("validator {} reactivated with stake {} uZYTH", address, account.stake);
                }
                Ok(())
            }
            None => {
                if amount < MINIMUM_VALIDATOR_STAKE {
                    return Err(LedgerError::InsufficientStake {
                        required: MINIMUM_VALIDATOR_STAKE,
                        got: amount,
                    });
                }
                let account = ValidatorAccount::new(address.clone(), amount, commission_bps, now)?;
                info!("validator {} bonded with stake {} uZYTH", address, amount);
                self.validators.insert(address, account);
                Ok(())
            }
        }
    }

    /// Begin unbonding. The remaining bonded stake must stay at or above the
    /// minimum, or reach exactly zero (full exit, which deactivates the
    /// account). The withdrawn amount is locked for 72 hours.
    pub fn unstake(
        &mut self,
        address: &Address,
        amount: u64,
        now: u64,
    ) -> Result<UnbondingRequest, LedgerError> {
        let account = self
            .validators
            .get_mut(address)
            .ok_or_else(|| LedgerError::UnknownValidator(address.to_string()))?;

        if amount > account.stake {
            return Err(LedgerError::ExcessiveUnstake {
                requested: amount,
                bonded: account.stake,
            });
        }

        let remaining = account.stake - amount;
        if remaining > 0 && remaining < MINIMUM_VALIDATOR_STAKE {
            return Err(LedgerError::InsufficientStake {
                required: MINIMUM_VALIDATOR_STAKE,
                got: remaining,
            });
        }

        account.stake = remaining;
        if remaining == 0 {
            account.active = false;
            info!("validator {} fully unbonded and deactivated", address);
        }

        let request = UnbondingRequest::new(address.clone(), amount, now);
        self.unbonding.push(request.clone());
        Ok(request)
    }

    /// Release every matured unbonding request, removing it from the queue.
    /// The caller credits the returned amounts to spendable balances.
    pub fn release_matured(&mut self, now: u64) -> Vec<UnbondingRequest> {
        let mut matured = Vec::new();
        self.unbonding.retain(|request| {
            if request.matured(now) {
                matured.push(request.clone());
                false
            } else {
                true
            }
        });
        if !matured.is_empty() {
            info!("released {} matured unbonding request(s)", matured.len());
        }
        matured
    }

    /// Apply a slash debit of `penalty_bps` basis points of current stake,
    /// optionally jailing the offender, and void their pending unbondings.
    pub fn slash(
        &mut self,
        address: &Address,
        penalty_bps: u32,
        jail: Option<JailTerm>,
    ) -> Result<SlashOutcome, LedgerError> {
        let account = self
            .validators
            .get_mut(address)
            .ok_or_else(|| LedgerError::UnknownValidator(address.to_string()))?;

        let penalty = ((account.stake as u128 * penalty_bps as u128) / 10_000) as u64;
        let remaining = account.stake.checked_sub(penalty).ok_or_else(|| {
            // Arithmetic can't underflow here since penalty <= stake; if it
            // ever does, the record is corrupt and the mutation must abort.
            error!(
                "slash underflow for {}: stake {} uZYTH, penalty {} uZYTH",
                address, account.stake, penalty
            );
            LedgerError::Corruption {
                address: address.to_string(),
                stake: account.stake,
                debit: penalty,
            }
        })?;

        account.stake = remaining;
        account.total_slashed = account.total_slashed.saturating_add(penalty);

        if let Some(term) = jail {
            account.jail(term.release_time());
            warn!("validator {} jailed ({:?})", address, term);
        }

        let mut deactivated = false;
        if account.stake < MINIMUM_VALIDATOR_STAKE && account.active {
            account.active = false;
            deactivated = true;
            warn!(
                "validator {} deactivated: stake {} uZYTH below minimum after slash",
                address, account.stake
            );
        }

        let mut voided = 0u64;
        self.unbonding.retain(|request| {
            if &request.address == address {
                voided = voided.saturating_add(request.amount);
                false
            } else {
                true
            }
        });
        if voided > 0 {
            warn!(
                "voided {} uZYTH of pending unbonding for slashed validator {}",
                voided, address
            );
        }

        Ok(SlashOutcome {
            address: address.clone(),
            penalty,
            remaining_stake: remaining,
            deactivated,
            voided_unbonding: voided,
        })
    }

    /// Lift expired cooldown jails. Returns the addresses released.
    pub fn sweep_jails(&mut self, now: u64) -> Vec<Address> {
        let mut released = Vec::new();
        for (address, account) in self.validators.iter_mut() {
            if account.try_unjail(now) {
                info!("validator {} released from jail", address);
                released.push(address.clone());
            }
        }
        released
    }

    /// Capture the committee for a height: active, non-jailed validators
    /// with their stake-derived power, sorted by address.
    pub fn snapshot(&self, height: u64) -> LedgerSnapshot {
        let members: Vec<CommitteeMember> = self
            .validators
            .values()
            .filter(|account| account.in_committee())
            .map(|account| CommitteeMember {
                address: account.address.clone(),
                stake: account.stake,
                power: power(account.stake),
            })
            .collect();
        let total_power = members.iter().map(|m| m.power).sum();
        LedgerSnapshot {
            height,
            members,
            total_power,
        }
    }

    pub fn total_staked(&self) -> u64 {
        self.validators
            .values()
            .filter(|a| a.active)
            .map(|a| a.stake)
            .sum()
    }

    pub fn active_validator_count(&self) -> usize {
        self.validators.values().filter(|a| a.in_committee()).count()
    }

    pub fn pending_unbonding(&self) -> &[UnbondingRequest] {
        &self.unbonding
    }
}
