use async_trait::async_trait;
use log::{info, warn};
use std::time::Duration;

use crate::types::{AiClientError, AiScore, ScoreRequest};

/// Scoring collaborator seam.
///
/// The consensus round only sees this trait; the production implementation
/// is the HTTP client below, tests use in-process stubs.
#[async_trait]
pub trait BlockScorer: Send + Sync {
    async fn score_block(&self, request: ScoreRequest) -> Result<AiScore, AiClientError>;
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Base URL of the scoring service, e.g. `http://ai-validator:5000`.
    pub base_url: String,
    /// Hard deadline on a single scoring request.
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ai-validator:5000".to_string(),
            timeout_secs: 10,
        }
    }
}

/// HTTP client for the external scoring service.
pub struct HttpScorer {
    config: ScorerConfig,
    client: reqwest::Client,
}

impl HttpScorer {
    pub fn new(config: ScorerConfig) -> Result<Self, AiClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/validate/block", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BlockScorer for HttpScorer {
    async fn score_block(&self, request: ScoreRequest) -> Result<AiScore, AiClientError> {
        let block_hash = request.hash.clone();

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("scorer timed out for block {}", block_hash);
                    AiClientError::Timeout {
                        block_hash: block_hash.clone(),
                        timeout_secs: self.config.timeout_secs,
                    }
                } else {
                    AiClientError::Transport(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(AiClientError::UnusableResponse {
                block_hash,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let score: AiScore = response.json().await.map_err(|e| {
            // Covers the scorer's "ERROR" decision fallback as well as any
            // malformed body: neither yields a usable verdict.
            AiClientError::UnusableResponse {
                block_hash: block_hash.clone(),
                reason: e.to_string(),
            }
        })?;

        let score = score.clamped();
        info!(
            "scored block {}: score={:.3} decision={:?} confidence={:.3}",
            score.block_hash, score.score, score.decision, score.confidence
        );
        Ok(score)
    }
}
