use zyth_consensus::RoundConfig;
use zyth_ledger::MINIMUM_VALIDATOR_STAKE;

/// Node configuration assembled from CLI flags.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network_id: String,
    /// Produce blocks.
    pub mine: bool,
    /// Participate in finality voting (bonds the minimum stake at startup).
    pub validator: bool,
    pub data_dir: String,
    pub rpc_port: u16,
    pub ai_validator_url: String,
    pub initial_difficulty: u64,
    /// Nonce attempts per proposal before NoSolutionFound.
    pub max_pow_attempts: u64,
    pub round: RoundConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: "zytherion-testnet".to_string(),
            mine: false,
            validator: false,
            data_dir: "./data".to_string(),
            rpc_port: 8545,
            ai_validator_url: "http://ai-validator:5000".to_string(),
            initial_difficulty: 4,
            max_pow_attempts: 5_000_000,
            round: RoundConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Stake bonded at startup when running as a validator.
    pub fn bootstrap_stake(&self) -> u64 {
        MINIMUM_VALIDATOR_STAKE
    }
}
