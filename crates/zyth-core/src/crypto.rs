use ring::{
    rand::SystemRandom,
    signature::{Ed25519KeyPair, KeyPair as _, UnparsedPublicKey, ED25519},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CoreError;

/// Ed25519 keypair used for block and vote signatures.
pub struct KeyPair {
    inner: Ed25519KeyPair,
}

impl KeyPair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Result<Self, CoreError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| CoreError::Crypto(format!("keypair generation failed: {:?}", e)))?;
        let inner = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| CoreError::Crypto(format!("keypair parse failed: {:?}", e)))?;
        Ok(Self { inner })
    }

    /// Derive a keypair from a 32-byte seed (deterministic, used in tests
    /// and for validator identities restored from disk).
    pub fn from_seed(seed: &[u8]) -> Result<Self, CoreError> {
        if seed.len() != 32 {
            return Err(CoreError::Crypto("seed must be 32 bytes".to_string()));
        }
        let inner = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|e| CoreError::Crypto(format!("key derivation failed: {:?}", e)))?;
        Ok(Self { inner })
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.inner.public_key().as_ref().to_vec()
    }

    /// Sign a message; Ed25519 signatures are 64 bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.inner.sign(message).as_ref().to_vec()
    }

    /// Address derived from this keypair's public key.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }
}

/// Verify an Ed25519 signature against a raw public key.
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let public_key = UnparsedPublicKey::new(&ED25519, public_key);
    public_key.verify(message, signature).is_ok()
}

/// SHA-256 digest rendered as lowercase hex.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// On-chain account / validator address.
///
/// Format: `ZYTH_` followed by the first 40 hex chars of the SHA-256 of the
/// public key. Addresses are stable identifiers; the underlying key can be
/// verified independently via `verify_signature`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let hash = hash_data(public_key);
        Self(format!("ZYTH_{}", &hash[..40]))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let keypair = KeyPair::from_seed(&[7u8; 32]).unwrap();
        let message = b"zytherion block header";
        let signature = keypair.sign(message);

        assert_eq!(signature.len(), 64);
        assert!(verify_signature(&keypair.public_key(), message, &signature));
        assert!(!verify_signature(&keypair.public_key(), b"tampered", &signature));
    }

    #[test]
    fn test_seed_determinism() {
        let a = KeyPair::from_seed(&[1u8; 32]).unwrap();
        let b = KeyPair::from_seed(&[1u8; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_bad_seed_length() {
        assert!(KeyPair::from_seed(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_address_format() {
        let keypair = KeyPair::from_seed(&[9u8; 32]).unwrap();
        let address = keypair.address();
        assert!(address.as_str().starts_with("ZYTH_"));
        assert_eq!(address.as_str().len(), 45);
    }
}
