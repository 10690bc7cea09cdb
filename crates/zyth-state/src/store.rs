// PERSISTED LAYOUT (collaborator interfaces)
//
// The storage engine itself is an external collaborator; consensus only
// depends on these traits. Layout:
//   - append-only block log keyed by height
//   - append-only audit log (votes / scores / slash events / decisions)
//     keyed by height
// The in-memory store is the reference implementation used by the node and
// by tests; a durable backend implements the same traits.

use log::info;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use zyth_ai::AiScore;
use zyth_consensus::{FinalityRecord, SlashEvent};
use zyth_core::{Address, Block, ValidatorVote};
use zyth_ledger::ValidatorAccount;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Block log appends must be tip + 1.
    #[error("non-monotonic block append: tip is {tip:?}, got height {got}")]
    NonMonotonicAppend { tip: Option<u64>, got: u64 },

    /// A block is already stored at this height.
    #[error("height {0} already occupied")]
    HeightOccupied(u64),
}

/// Append-only canonical block log.
pub trait BlockStore: Send + Sync {
    fn append_block(&self, block: Block) -> Result<(), StoreError>;
    fn block_at(&self, height: u64) -> Option<Block>;
    fn tip(&self) -> Option<Block>;
    fn tip_height(&self) -> Option<u64>;
}

/// One record in the per-height audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AuditEntry {
    Vote(ValidatorVote),
    Score(AiScore),
    Slash(SlashEvent),
    Decision(FinalityRecord),
}

/// Append-only audit trail keyed by height.
pub trait AuditLog: Send + Sync {
    fn append_audit(&self, height: u64, entry: AuditEntry);
    fn audit_at(&self, height: u64) -> Vec<AuditEntry>;
}

/// Durable view of validator records, keyed by address.
pub trait ValidatorTable: Send + Sync {
    fn upsert_validator(&self, account: ValidatorAccount);
    fn validator(&self, address: &Address) -> Option<ValidatorAccount>;
    fn validator_count(&self) -> usize;
}

/// In-memory reference store.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<u64, Block>>,
    audit: RwLock<BTreeMap<u64, Vec<AuditEntry>>>,
    validators: RwLock<BTreeMap<Address, ValidatorAccount>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryStore {
    fn append_block(&self, block: Block) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write();
        let height = block.header.height;
        if blocks.contains_key(&height) {
            return Err(StoreError::HeightOccupied(height));
        }
        let tip = blocks.keys().next_back().copied();
        let expected = tip.map(|t| t + 1).unwrap_or(height);
        if height != expected {
            return Err(StoreError::NonMonotonicAppend { tip, got: height });
        }
        info!("appended block {} ({})", height, block.hash);
        blocks.insert(height, block);
        Ok(())
    }

    fn block_at(&self, height: u64) -> Option<Block> {
        self.blocks.read().get(&height).cloned()
    }

    fn tip(&self) -> Option<Block> {
        self.blocks.read().values().next_back().cloned()
    }

    fn tip_height(&self) -> Option<u64> {
        self.blocks.read().keys().next_back().copied()
    }
}

impl ValidatorTable for MemoryStore {
    fn upsert_validator(&self, account: ValidatorAccount) {
        self.validators.write().insert(account.address.clone(), account);
    }

    fn validator(&self, address: &Address) -> Option<ValidatorAccount> {
        self.validators.read().get(address).cloned()
    }

    fn validator_count(&self) -> usize {
        self.validators.read().len()
    }
}

impl AuditLog for MemoryStore {
    fn append_audit(&self, height: u64, entry: AuditEntry) {
        self.audit.write().entry(height).or_default().push(entry);
    }

    fn audit_at(&self, height: u64) -> Vec<AuditEntry> {
        self.audit.read().get(&height).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zyth_core::Address;

    fn block_at_height(height: u64, previous_hash: &str) -> Block {
        Block::new(
            previous_hash.to_string(),
            vec![],
            1,
            height,
            Address::from_string("ZYTH_MINER_0000000000000000000000000000".to_string()),
            1_700_000_000 + height,
        )
    }

    #[test]
    fn test_append_chain_in_order() {
        let store = MemoryStore::new();
        let genesis = block_at_height(0, &"0".repeat(64));
        let genesis_hash = genesis.hash.clone();
        store.append_block(genesis).unwrap();
        store.append_block(block_at_height(1, &genesis_hash)).unwrap();

        assert_eq!(store.tip_height(), Some(1));
        assert_eq!(store.block_at(0).unwrap().header.height, 0);
    }

    #[test]
    fn test_append_rejects_gap() {
        let store = MemoryStore::new();
        store.append_block(block_at_height(0, &"0".repeat(64))).unwrap();
        let result = store.append_block(block_at_height(5, "x"));
        assert!(matches!(
            result,
            Err(StoreError::NonMonotonicAppend { tip: Some(0), got: 5 })
        ));
    }

    #[test]
    fn test_append_rejects_duplicate_height() {
        let store = MemoryStore::new();
        store.append_block(block_at_height(0, &"0".repeat(64))).unwrap();
        let result = store.append_block(block_at_height(0, "y"));
        assert!(matches!(result, Err(StoreError::HeightOccupied(0))));
    }

    #[test]
    fn test_validator_table_upsert_overwrites() {
        let store = MemoryStore::new();
        let address = Address::from_string("ZYTH_V1".to_string());
        let mut account = ValidatorAccount::new(address.clone(), 1_000, 0, 0).unwrap();
        store.upsert_validator(account.clone());
        assert_eq!(store.validator_count(), 1);

        account.jailed = true;
        store.upsert_validator(account);
        assert_eq!(store.validator_count(), 1);
        assert!(store.validator(&address).unwrap().jailed);
    }

    #[test]
    fn test_audit_log_appends_in_order() {
        let store = MemoryStore::new();
        let vote = ValidatorVote {
            voter: Address::from_string("ZYTH_V1".to_string()),
            block_hash: "h".to_string(),
            height: 3,
            vote: zyth_core::VoteType::Approve,
            signature: vec![1],
            timestamp: 0,
        };
        store.append_audit(3, AuditEntry::Vote(vote.clone()));
        store.append_audit(3, AuditEntry::Vote(vote));

        assert_eq!(store.audit_at(3).len(), 2);
        assert!(store.audit_at(4).is_empty());
    }
}
