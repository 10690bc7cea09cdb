// OPERATOR QUERY SURFACE
//
// Every method is a tagged variant with compile-time-checked fields; a body
// that does not parse into RpcRequest is rejected before any handler runs.
// Handlers only hold narrow capabilities: the ledger handle, the block
// store, and the transaction intake channel.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use warp::{http::StatusCode, Filter, Rejection, Reply};

use zyth_consensus::pow_engine::{reward_for_height, TARGET_BLOCK_SECS};
use zyth_core::{Address, Transaction};
use zyth_economics::COMMITTEE_SHARE_BPS;
use zyth_ledger::{power, LedgerHandle};
use zyth_state::BlockStore;

/// Typed request envelope: one variant per method.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    StakingInfo,
    ValidatorStatus { address: String },
    SubmitTransaction { transaction: Transaction },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StakingInfoResponse {
    total_staked: u64,
    validator_count: usize,
    minimum_stake: u64,
    apy: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidatorStatusResponse {
    is_validator: bool,
    staked_amount: u64,
    voting_power: f64,
    active: bool,
    jailed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitTransactionResponse {
    tx_hash: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Capabilities the handlers need; nothing more.
#[derive(Clone)]
pub struct RpcContext {
    pub ledger: LedgerHandle,
    pub store: Arc<dyn BlockStore>,
    pub tx_sink: mpsc::Sender<Transaction>,
}

/// Build the route tree: `GET /health` plus `POST /` with a typed body.
pub fn routes(
    context: RpcContext,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&"Zytherion RPC is running"));

    let with_context = warp::any().map(move || context.clone());
    let rpc = warp::path::end()
        .and(warp::post())
        .and(warp::body::json())
        .and(with_context)
        .and_then(dispatch);

    health.or(rpc).recover(handle_rejection)
}

/// Serve the query surface on the given port until the process exits.
pub async fn serve(context: RpcContext, port: u16) {
    info!("RPC server listening on 0.0.0.0:{}", port);
    warp::serve(routes(context)).run(([0, 0, 0, 0], port)).await;
}

async fn dispatch(request: RpcRequest, context: RpcContext) -> Result<impl Reply, Rejection> {
    match request {
        RpcRequest::StakingInfo => staking_info(context).await,
        RpcRequest::ValidatorStatus { address } => validator_status(context, address).await,
        RpcRequest::SubmitTransaction { transaction } => {
            submit_transaction(context, transaction).await
        }
    }
}

async fn staking_info(context: RpcContext) -> Result<warp::reply::Response, Rejection> {
    match context.ledger.stats().await {
        Ok(stats) => {
            let height = context.store.tip_height().unwrap_or(0);
            let response = StakingInfoResponse {
                total_staked: stats.total_staked,
                validator_count: stats.validator_count,
                minimum_stake: stats.minimum_stake,
                apy: estimate_apy(height, stats.total_staked),
            };
            Ok(warp::reply::json(&response).into_response())
        }
        Err(e) => {
            error!("staking info query failed: {}", e);
            Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()))
        }
    }
}

async fn validator_status(
    context: RpcContext,
    address: String,
) -> Result<warp::reply::Response, Rejection> {
    let address = Address::from_string(address);
    match context.ledger.get_validator(address).await {
        Ok(Some(account)) => {
            let response = ValidatorStatusResponse {
                is_validator: true,
                staked_amount: account.stake,
                voting_power: power(account.stake),
                active: account.active,
                jailed: account.jailed,
            };
            Ok(warp::reply::json(&response).into_response())
        }
        Ok(None) => {
            let response = ValidatorStatusResponse {
                is_validator: false,
                staked_amount: 0,
                voting_power: 0.0,
                active: false,
                jailed: false,
            };
            Ok(warp::reply::json(&response).into_response())
        }
        Err(e) => {
            error!("validator status query failed: {}", e);
            Ok(error_reply(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()))
        }
    }
}

async fn submit_transaction(
    context: RpcContext,
    transaction: Transaction,
) -> Result<warp::reply::Response, Rejection> {
    if transaction.signature.is_empty() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "transaction is not signed",
        ));
    }

    let tx_hash = transaction.hash();
    match context.tx_sink.send(transaction).await {
        Ok(()) => {
            info!("accepted transaction {}", tx_hash);
            Ok(warp::reply::json(&SubmitTransactionResponse { tx_hash }).into_response())
        }
        Err(_) => Ok(error_reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "transaction intake is closed",
        )),
    }
}

/// Annualized committee-share yield at the current height, as a percentage
/// of total stake. Derived per query, never stored.
fn estimate_apy(height: u64, total_staked: u64) -> f64 {
    if total_staked == 0 {
        return 0.0;
    }
    let blocks_per_year = 365 * 24 * 3600 / TARGET_BLOCK_SECS;
    let committee_per_block = reward_for_height(height) * COMMITTEE_SHARE_BPS / 10_000;
    (committee_per_block as f64 * blocks_per_year as f64) / total_staked as f64 * 100.0
}

fn error_reply(status: StatusCode, message: &str) -> warp::reply::Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorResponse {
            error: message.to_string(),
        }),
        status,
    )
    .into_response()
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Rejection> {
    if rejection.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "not found"));
    }
    if rejection.find::<warp::body::BodyDeserializeError>().is_some() {
        // malformed shapes never reach a handler
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "request does not match any method signature",
        ));
    }
    Err(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zyth_core::KeyPair;
    use zyth_ledger::{spawn_ledger, StakeLedger, MINIMUM_VALIDATOR_STAKE};
    use zyth_state::MemoryStore;

    fn addr(tag: u8) -> Address {
        Address::from_string(format!("ZYTH_V{:039}", tag))
    }

    async fn context_with_stake() -> (RpcContext, mpsc::Receiver<Transaction>) {
        let (ledger, _task) = spawn_ledger(StakeLedger::new());
        ledger
            .stake(addr(1), 4 * MINIMUM_VALIDATOR_STAKE, 100, 0)
            .await
            .unwrap();
        let (tx_sink, tx_rx) = mpsc::channel(16);
        (
            RpcContext {
                ledger,
                store: Arc::new(MemoryStore::new()),
                tx_sink,
            },
            tx_rx,
        )
    }

    #[tokio::test]
    async fn test_staking_info_method() {
        let (context, _rx) = context_with_stake().await;
        let response = warp::test::request()
            .method("POST")
            .path("/")
            .json(&serde_json::json!({ "method": "staking_info" }))
            .reply(&routes(context))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["totalStaked"], 4 * MINIMUM_VALIDATOR_STAKE);
        assert_eq!(body["validatorCount"], 1);
        assert_eq!(body["minimumStake"], MINIMUM_VALIDATOR_STAKE);
        assert!(body["apy"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_validator_status_known_and_unknown() {
        let (context, _rx) = context_with_stake().await;
        let filter = routes(context);

        let known = warp::test::request()
            .method("POST")
            .path("/")
            .json(&serde_json::json!({
                "method": "validator_status",
                "params": { "address": addr(1).as_str() }
            }))
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(known.body()).unwrap();
        assert_eq!(body["isValidator"], true);
        assert_eq!(body["stakedAmount"], 4 * MINIMUM_VALIDATOR_STAKE);
        assert!(body["votingPower"].as_f64().unwrap() > 0.0);

        let unknown = warp::test::request()
            .method("POST")
            .path("/")
            .json(&serde_json::json!({
                "method": "validator_status",
                "params": { "address": "ZYTH_NOBODY" }
            }))
            .reply(&filter)
            .await;
        let body: serde_json::Value = serde_json::from_slice(unknown.body()).unwrap();
        assert_eq!(body["isValidator"], false);
    }

    #[tokio::test]
    async fn test_submit_transaction_reaches_intake() {
        let (context, mut rx) = context_with_stake().await;
        let keypair = KeyPair::from_seed(&[4u8; 32]).unwrap();
        let mut transaction = Transaction {
            from: keypair.address(),
            to: addr(1),
            amount: 1_000,
            fee: 10,
            nonce: 0,
            signature: vec![],
            timestamp: 1_700_000_000,
            data: None,
        };
        transaction.signature = keypair.sign(&transaction.signing_payload());
        let expected_hash = transaction.hash();

        let response = warp::test::request()
            .method("POST")
            .path("/")
            .json(&serde_json::json!({
                "method": "submit_transaction",
                "params": { "transaction": transaction }
            }))
            .reply(&routes(context))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["txHash"], expected_hash);
        assert_eq!(rx.recv().await.unwrap().hash(), expected_hash);
    }

    #[tokio::test]
    async fn test_unsigned_transaction_rejected() {
        let (context, _rx) = context_with_stake().await;
        let transaction = Transaction {
            from: addr(1),
            to: addr(2),
            amount: 1,
            fee: 0,
            nonce: 0,
            signature: vec![],
            timestamp: 0,
            data: None,
        };
        let response = warp::test::request()
            .method("POST")
            .path("/")
            .json(&serde_json::json!({
                "method": "submit_transaction",
                "params": { "transaction": transaction }
            }))
            .reply(&routes(context))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_shape_rejected_before_handlers() {
        let (context, _rx) = context_with_stake().await;
        let response = warp::test::request()
            .method("POST")
            .path("/")
            .json(&serde_json::json!({ "method": "no_such_method", "params": [1, 2, 3] }))
            .reply(&routes(context))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (context, _rx) = context_with_stake().await;
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes(context))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
