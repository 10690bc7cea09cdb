use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use zyth_ai::{HttpScorer, ScorerConfig};
use zyth_node::{Node, NodeConfig};

#[derive(Parser)]
#[command(name = "zyth-node")]
#[command(about = "Zytherion blockchain node", long_about = None)]
struct Cli {
    /// Enable mining (block production)
    #[arg(long)]
    mine: bool,

    /// Enable validation (bonds the minimum stake and votes on rounds)
    #[arg(long)]
    validator: bool,

    /// Data directory
    #[arg(long, default_value = "./data")]
    datadir: String,

    /// RPC server port
    #[arg(long, default_value_t = 8545)]
    rpcport: u16,

    /// AI validator base URL
    #[arg(long, default_value = "http://ai-validator:5000")]
    aivalidator: String,

    /// Initial PoW difficulty
    #[arg(long, default_value_t = 4)]
    difficulty: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig {
        mine: cli.mine,
        validator: cli.validator,
        data_dir: cli.datadir,
        rpc_port: cli.rpcport,
        ai_validator_url: cli.aivalidator.clone(),
        initial_difficulty: cli.difficulty,
        ..NodeConfig::default()
    };

    info!("starting Zytherion node");
    info!("mining: {}", config.mine);
    info!("validation: {}", config.validator);
    info!("AI validator: {}", config.ai_validator_url);
    info!("RPC port: {}", config.rpc_port);

    let scorer = Arc::new(HttpScorer::new(ScorerConfig {
        base_url: cli.aivalidator,
        timeout_secs: 10,
    })?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let node = Node::new(config, scorer, shutdown_rx).await?;
    if let Err(e) = node.run().await {
        error!("node exited with error: {e}");
        return Err(e);
    }
    Ok(())
}
