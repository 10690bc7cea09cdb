use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{self, Address};

/// A value transfer, optionally carrying opaque payload data.
///
/// Transactions are immutable once signed: the signature covers every field
/// except `signature` itself, and the hash covers the signed payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    /// Amount in micro-ZYTH.
    pub amount: u64,
    /// Fee in micro-ZYTH, paid by the sender on top of `amount`.
    pub fee: u64,
    /// Sender's account nonce; must match the account's next nonce exactly.
    pub nonce: u64,
    pub signature: Vec<u8>,
    pub timestamp: u64,
    /// Opaque payload (contract calls live outside this crate).
    pub data: Option<Vec<u8>>,
}

impl Transaction {
    /// The byte string covered by the sender's signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(self.from.as_str().as_bytes());
        payload.extend_from_slice(self.to.as_str().as_bytes());
        payload.extend_from_slice(&self.amount.to_le_bytes());
        payload.extend_from_slice(&self.fee.to_le_bytes());
        payload.extend_from_slice(&self.nonce.to_le_bytes());
        payload.extend_from_slice(&self.timestamp.to_le_bytes());
        if let Some(data) = &self.data {
            payload.extend_from_slice(data);
        }
        payload
    }

    /// Content hash of the transaction (hex SHA-256 over the signed payload).
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_payload());
        hex::encode(hasher.finalize())
    }

    /// Verify the signature against the sender's raw public key.
    pub fn verify(&self, sender_public_key: &[u8]) -> bool {
        if self.signature.is_empty() {
            return false;
        }
        crypto::verify_signature(sender_public_key, &self.signing_payload(), &self.signature)
    }
}
