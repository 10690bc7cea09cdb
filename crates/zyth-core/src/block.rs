// BLOCK DATA MODEL
//
// INVARIANTS:
// 1. A block's hash is computed over the header EXCLUDING validator_votes;
//    votes are appended after the voting round and must not change the hash.
// 2. Height is monotonic and unique along the canonical chain.
// 3. A block is immutable once hashed; any field change invalidates the hash.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{self, hash_data, Address};
use crate::error::CoreError;
use crate::transaction::Transaction;
use crate::BLOCK_VERSION;

/// Ceiling on transactions per block; blocks above this are rejected.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 10_000;

/// A validator's finality vote on a proposed block.
///
/// One vote per (voter, height): a second vote from the same voter at the
/// same height for a different hash is double-sign evidence, handled by the
/// slashing engine rather than rejected here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorVote {
    pub voter: Address,
    pub block_hash: String,
    pub height: u64,
    pub vote: VoteType,
    pub signature: Vec<u8>,
    pub timestamp: u64,
}

impl ValidatorVote {
    /// The byte string covered by the voter's signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(self.voter.as_str().as_bytes());
        payload.extend_from_slice(self.block_hash.as_bytes());
        payload.extend_from_slice(&self.height.to_le_bytes());
        payload.push(self.vote as u8);
        payload
    }

    pub fn verify(&self, voter_public_key: &[u8]) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        crypto::verify_signature(voter_public_key, &self.signing_payload(), &self.signature)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoteType {
    Approve,
    Reject,
    Abstain,
}

/// Block header as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub previous_hash: String,
    pub merkle_root: String,
    pub timestamp: u64,
    pub difficulty: u64,
    pub nonce: u64,
    /// Votes collected during the finality round. NOT part of the hash.
    pub validator_votes: Vec<ValidatorVote>,
    pub height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Address of the miner that assembled and solved this block.
    pub proposer: Address,
    /// Content hash; set after the PoW nonce search completes.
    pub hash: String,
}

impl Block {
    /// Assemble an unmined candidate block. The nonce starts at zero and the
    /// hash is filled in by the PoW search.
    pub fn new(
        previous_hash: String,
        transactions: Vec<Transaction>,
        difficulty: u64,
        height: u64,
        proposer: Address,
        timestamp: u64,
    ) -> Self {
        let merkle_root = Self::calculate_merkle_root(&transactions);
        let header = BlockHeader {
            version: BLOCK_VERSION,
            previous_hash,
            merkle_root,
            timestamp,
            difficulty,
            nonce: 0,
            validator_votes: Vec::new(),
            height,
        };
        let mut block = Self {
            header,
            transactions,
            proposer,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Compute the content hash: SHA-256 over the header fields excluding
    /// `validator_votes`, plus the proposer.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.header.version.to_le_bytes());
        hasher.update(self.header.previous_hash.as_bytes());
        hasher.update(self.header.merkle_root.as_bytes());
        hasher.update(self.header.timestamp.to_le_bytes());
        hasher.update(self.header.difficulty.to_le_bytes());
        hasher.update(self.header.nonce.to_le_bytes());
        hasher.update(self.header.height.to_le_bytes());
        hasher.update(self.proposer.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Merkle root over transaction hashes: pairwise SHA-256 fold, odd leaf
    /// duplicated. Empty payload hashes to the digest of the empty string.
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        if transactions.is_empty() {
            return hash_data(&[]);
        }

        let mut hashes: Vec<String> = transactions.iter().map(|tx| tx.hash()).collect();
        while hashes.len() > 1 {
            let mut next = Vec::with_capacity((hashes.len() + 1) / 2);
            for chunk in hashes.chunks(2) {
                let combined = match chunk {
                    [left, right] => format!("{}{}", left, right),
                    [single] => format!("{}{}", single, single),
                    _ => unreachable!("chunks(2) yields 1 or 2 elements"),
                };
                next.push(hash_data(combined.as_bytes()));
            }
            hashes = next;
        }
        hashes.remove(0)
    }

    /// Structural validation: hash integrity, merkle integrity, parent link,
    /// and transaction count. Consensus-level checks (difficulty target,
    /// proposer eligibility) live in the consensus crate.
    pub fn validate(&self, expected_previous_hash: &str) -> Result<(), CoreError> {
        let height = self.header.height;

        if self.hash != self.compute_hash() {
            return Err(CoreError::InvalidBlock {
                height,
                reason: "stored hash does not match recomputed hash".to_string(),
            });
        }
        if self.header.previous_hash != expected_previous_hash {
            return Err(CoreError::InvalidBlock {
                height,
                reason: format!(
                    "previous_hash mismatch: block links to {}, chain tip is {}",
                    self.header.previous_hash, expected_previous_hash
                ),
            });
        }
        if self.header.merkle_root != Self::calculate_merkle_root(&self.transactions) {
            return Err(CoreError::InvalidBlock {
                height,
                reason: "merkle root does not match transaction set".to_string(),
            });
        }
        if self.transactions.len() > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(CoreError::InvalidBlock {
                height,
                reason: format!(
                    "transaction count {} exceeds cap {}",
                    self.transactions.len(),
                    MAX_TRANSACTIONS_PER_BLOCK
                ),
            });
        }
        Ok(())
    }

    /// Approximate serialized size in bytes, reported to the AI scorer.
    pub fn size_estimate(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn test_proposer() -> Address {
        Address::from_string("ZYTH_PROPOSER_00000000000000000000000000".to_string())
    }

    fn make_block(transactions: Vec<Transaction>) -> Block {
        Block::new(
            "0".repeat(64),
            transactions,
            4,
            1,
            test_proposer(),
            1_700_000_000,
        )
    }

    fn make_transaction(nonce: u64) -> Transaction {
        let keypair = KeyPair::from_seed(&[5u8; 32]).unwrap();
        let mut tx = Transaction {
            from: keypair.address(),
            to: test_proposer(),
            amount: 500,
            fee: 5,
            nonce,
            signature: vec![],
            timestamp: 1_700_000_000,
            data: None,
        };
        tx.signature = keypair.sign(&tx.signing_payload());
        tx
    }

    #[test]
    fn test_hash_excludes_validator_votes() {
        let mut block = make_block(vec![]);
        let before = block.compute_hash();

        block.header.validator_votes.push(ValidatorVote {
            voter: test_proposer(),
            block_hash: before.clone(),
            height: 1,
            vote: VoteType::Approve,
            signature: vec![1, 2, 3],
            timestamp: 1_700_000_010,
        });

        assert_eq!(block.compute_hash(), before);
    }

    #[test]
    fn test_hash_covers_nonce() {
        let mut block = make_block(vec![]);
        let before = block.compute_hash();
        block.header.nonce = 42;
        assert_ne!(block.compute_hash(), before);
    }

    #[test]
    fn test_validate_accepts_well_formed_block() {
        let block = make_block(vec![make_transaction(0)]);
        assert!(block.validate(&"0".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_rejects_tampered_hash() {
        let mut block = make_block(vec![]);
        block.hash = "deadbeef".to_string();
        assert!(matches!(
            block.validate(&"0".repeat(64)),
            Err(CoreError::InvalidBlock { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_parent() {
        let block = make_block(vec![]);
        let result = block.validate("some_other_tip_hash");
        assert!(matches!(result, Err(CoreError::InvalidBlock { .. })));
    }

    #[test]
    fn test_validate_rejects_tampered_transactions() {
        let mut block = make_block(vec![make_transaction(0)]);
        block.transactions.push(make_transaction(1));
        // merkle root no longer matches
        block.hash = block.compute_hash();
        assert!(matches!(
            block.validate(&"0".repeat(64)),
            Err(CoreError::InvalidBlock { .. })
        ));
    }

    #[test]
    fn test_merkle_root_odd_leaf_duplication() {
        let txs: Vec<Transaction> = (0..3).map(make_transaction).collect();
        let root3 = Block::calculate_merkle_root(&txs);
        let root2 = Block::calculate_merkle_root(&txs[..2]);
        assert_ne!(root3, root2);
        assert_eq!(root3.len(), 64);
    }

    #[test]
    fn test_vote_signature_roundtrip() {
        let keypair = KeyPair::from_seed(&[8u8; 32]).unwrap();
        let mut vote = ValidatorVote {
            voter: keypair.address(),
            block_hash: "abc123".to_string(),
            height: 7,
            vote: VoteType::Approve,
            signature: vec![],
            timestamp: 1_700_000_000,
        };
        vote.signature = keypair.sign(&vote.signing_payload());
        assert!(vote.verify(&keypair.public_key()));

        vote.block_hash = "different".to_string();
        assert!(!vote.verify(&keypair.public_key()));
    }
}
