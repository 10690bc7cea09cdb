use serde::{Deserialize, Serialize};
use thiserror::Error;

use zyth_core::{Address, Block};

/// Verdict returned by the external scoring service.
///
/// ADVISORY CONTRACT: APPROVE and REJECT gate finality; FLAG is recorded but
/// never blocks a round on its own. Anything the service returns outside
/// these three values is treated as an unusable response (score absent).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AiDecision {
    #[serde(rename = "APPROVE")]
    Approve,
    #[serde(rename = "FLAG")]
    Flag,
    #[serde(rename = "REJECT")]
    Reject,
}

/// Request body sent to the scoring service for one candidate block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub height: u64,
    pub hash: String,
    pub timestamp: u64,
    pub tx_count: usize,
    pub proposer: String,
    /// Approximate serialized block size in bytes.
    pub size: usize,
}

impl ScoreRequest {
    pub fn for_block(block: &Block) -> Self {
        Self {
            height: block.header.height,
            hash: block.hash.clone(),
            timestamp: block.header.timestamp,
            tx_count: block.transactions.len(),
            proposer: block.proposer.to_string(),
            size: block.size_estimate(),
        }
    }
}

/// Authoritative anomaly score for a block.
///
/// At most one score counts per block (first writer wins in the finality
/// round); later or duplicate scores are logged and ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiScore {
    pub block_hash: String,
    pub height: u64,
    /// Anomaly score in [0, 1]; higher is healthier.
    pub score: f64,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    pub decision: AiDecision,
    /// Identifier of the scoring node that produced this verdict.
    #[serde(rename = "validatorID")]
    pub source: String,
}

impl AiScore {
    /// Clamp score and confidence into [0, 1]; the service is external and
    /// its output is not trusted to be bounded.
    pub fn clamped(mut self) -> Self {
        self.score = self.score.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }

    /// Reference an address-shaped scorer source.
    pub fn source_address(&self) -> Address {
        Address::from_string(self.source.clone())
    }
}

#[derive(Debug, Error)]
pub enum AiClientError {
    /// The scorer did not answer within the deadline. Treated as "score
    /// absent" by the finality round, never as a failure of the round.
    #[error("scoring request for block {block_hash} timed out after {timeout_secs}s")]
    Timeout {
        block_hash: String,
        timeout_secs: u64,
    },

    /// Transport-level failure reaching the scorer.
    #[error("scoring transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The scorer answered with something that is not a usable verdict.
    #[error("unusable scorer response for block {block_hash}: {reason}")]
    UnusableResponse { block_hash: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_names() {
        assert_eq!(
            serde_json::to_string(&AiDecision::Approve).unwrap(),
            "\"APPROVE\""
        );
        let parsed: AiDecision = serde_json::from_str("\"REJECT\"").unwrap();
        assert_eq!(parsed, AiDecision::Reject);
        // the scorer's ERROR fallback must not parse into a verdict
        assert!(serde_json::from_str::<AiDecision>("\"ERROR\"").is_err());
    }

    #[test]
    fn test_score_response_parsing() {
        let body = r#"{
            "score": 0.91,
            "decision": "APPROVE",
            "confidence": 0.87,
            "validatorID": "ai-node-1",
            "blockHash": "abc123",
            "height": 42
        }"#;
        let score: AiScore = serde_json::from_str(body).unwrap();
        assert_eq!(score.height, 42);
        assert_eq!(score.block_hash, "abc123");
        assert_eq!(score.decision, AiDecision::Approve);
        assert_eq!(score.source, "ai-node-1");
    }

    #[test]
    fn test_clamping_out_of_range_scores() {
        let score = AiScore {
            block_hash: "h".to_string(),
            height: 1,
            score: 1.7,
            confidence: -0.2,
            decision: AiDecision::Flag,
            source: "ai-node-1".to_string(),
        }
        .clamped();
        assert_eq!(score.score, 1.0);
        assert_eq!(score.confidence, 0.0);
    }

    #[test]
    fn test_request_field_names() {
        let request = ScoreRequest {
            height: 7,
            hash: "deadbeef".to_string(),
            timestamp: 1_700_000_000,
            tx_count: 12,
            proposer: "ZYTH_MINER".to_string(),
            size: 4_096,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("txCount").is_some());
        assert!(json.get("proposer").is_some());
        assert!(json.get("tx_count").is_none());
    }
}
