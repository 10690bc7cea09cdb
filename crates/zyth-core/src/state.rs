use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::Block;
use crate::crypto::Address;
use crate::error::CoreError;
use crate::transaction::Transaction;
use crate::{MICRO_PER_ZYTH, TREASURY_ADDRESS};

/// Balance-carrying account. Stake is tracked separately by the stake
/// ledger; this table only sees bonded/unbonded funds as debits/credits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub address: Address,
    /// Spendable balance in micro-ZYTH.
    pub balance: u64,
    /// Next expected transaction nonce.
    pub nonce: u64,
}

/// Account table, applied per finalized block.
///
/// Uses a BTreeMap so iteration order (and therefore any derived digest or
/// report) is identical across replays.
#[derive(Debug, Default)]
pub struct AccountState {
    accounts: BTreeMap<Address, Account>,
}

impl AccountState {
    pub fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
        }
    }

    pub fn get(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn upsert(&mut self, account: Account) {
        self.accounts.insert(account.address.clone(), account);
    }

    /// Apply every transaction of a finalized block, in block order.
    ///
    /// The first failing transaction aborts the rest; callers only apply
    /// blocks that already passed structural and consensus validation, so a
    /// failure here is logged as a ledger anomaly.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), CoreError> {
        for tx in &block.transactions {
            if let Err(e) = self.apply_transaction(tx) {
                warn!(
                    "transaction {} in finalized block {} failed to apply: {}",
                    tx.hash(),
                    block.header.height,
                    e
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Validate-then-apply a single transfer: nonce and balance are checked
    /// before any state is touched, so a rejected transaction leaves the
    /// table unchanged.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), CoreError> {
        let sender = self
            .accounts
            .get(&tx.from)
            .ok_or_else(|| CoreError::UnknownAccount(tx.from.to_string()))?;

        if sender.nonce != tx.nonce {
            return Err(CoreError::InvalidNonce {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }

        let total_cost = tx.amount.saturating_add(tx.fee);
        if sender.balance < total_cost {
            return Err(CoreError::InsufficientBalance {
                needed: total_cost,
                available: sender.balance,
            });
        }

        if let Some(sender) = self.accounts.get_mut(&tx.from) {
            sender.balance -= total_cost;
            sender.nonce += 1;
        }

        let recipient = self.accounts.entry(tx.to.clone()).or_insert(Account {
            address: tx.to.clone(),
            balance: 0,
            nonce: 0,
        });
        recipient.balance = recipient.balance.saturating_add(tx.amount);

        Ok(())
    }

    /// Credit an address, creating the account on first touch. Used by the
    /// reward distributor and the unbonding release sweep.
    pub fn credit(&mut self, address: &Address, amount: u64) -> Result<(), CoreError> {
        let account = self.accounts.entry(address.clone()).or_insert(Account {
            address: address.clone(),
            balance: 0,
            nonce: 0,
        });
        account.balance = account.balance.checked_add(amount).ok_or_else(|| {
            CoreError::BalanceOverflow {
                address: address.to_string(),
                amount,
            }
        })?;
        Ok(())
    }

    /// Debit an address without nonce bookkeeping (stake deposits).
    pub fn debit(&mut self, address: &Address, amount: u64) -> Result<(), CoreError> {
        let account = self
            .accounts
            .get_mut(address)
            .ok_or_else(|| CoreError::UnknownAccount(address.to_string()))?;
        if account.balance < amount {
            return Err(CoreError::InsufficientBalance {
                needed: amount,
                available: account.balance,
            });
        }
        account.balance -= amount;
        Ok(())
    }

    pub fn total_supply(&self) -> u64 {
        self.accounts.values().map(|a| a.balance).sum()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Seed the genesis allocation.
    pub fn seed_genesis(&mut self) {
        let allocations = [
            ("ZYTH_GENESIS_00000000000000000000", 1_000_000u64),
            ("ZYTH_DEVELOPER_000000000000000000", 100_000u64),
            (TREASURY_ADDRESS, 0u64),
        ];
        for (address, zyth) in allocations {
            self.upsert(Account {
                address: Address::from_string(address.to_string()),
                balance: zyth * MICRO_PER_ZYTH,
                nonce: 0,
            });
        }
    }
}
