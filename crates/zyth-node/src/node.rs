// NODE WIRING
//
// One tokio task per concern, coordinated through message passing:
//   - block production loop (this struct's run loop)
//   - one round collector per proposed block, cancelled on terminal state
//   - transaction intake from the RPC surface into the mempool
//   - periodic unbonding-release and jail sweeps
// The stake ledger is owned by its single-writer task; everything here
// talks to it through the LedgerHandle.

use anyhow::{anyhow, Context};
use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use zyth_ai::{BlockScorer, ScoreRequest};
use zyth_consensus::pow_engine::{self, PowEngine};
use zyth_consensus::{
    run_round, select_proposer, ConsensusError, FinalityCoordinator, FinalityStatus, RoundMessage,
    SlashingEngine,
};
use zyth_core::{
    AccountState, Address, Block, KeyPair, Transaction, ValidatorVote, VoteType, TREASURY_ADDRESS,
};
use zyth_economics::RewardDistributor;
use zyth_ledger::{spawn_ledger, LedgerHandle, StakeLedger};
use zyth_rpc::RpcContext;
use zyth_state::{AuditEntry, AuditLog, BlockStore, MemoryStore, ValidatorTable};

use crate::config::NodeConfig;

const MAX_TXS_PER_PROPOSAL: usize = 1_000;
const MINING_RETRY_LIMIT: u32 = 3;
const SWEEP_INTERVAL_SECS: u64 = 60;

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

pub struct Node {
    config: NodeConfig,
    keypair: KeyPair,
    address: Address,
    ledger: LedgerHandle,
    coordinator: Arc<Mutex<FinalityCoordinator>>,
    slashing: Arc<Mutex<SlashingEngine>>,
    pow: PowEngine,
    distributor: RewardDistributor,
    scorer: Arc<dyn BlockScorer>,
    store: Arc<MemoryStore>,
    accounts: Arc<Mutex<AccountState>>,
    mempool: Arc<Mutex<Vec<Transaction>>>,
    /// Gossip intake seam: the transport layer clones this sender to feed
    /// remote votes and scores into the current round.
    round_intake: Arc<Mutex<Option<mpsc::Sender<RoundMessage>>>>,
    difficulty: u64,
    window_start: u64,
    shutdown: watch::Receiver<bool>,
}

impl Node {
    pub async fn new(
        config: NodeConfig,
        scorer: Arc<dyn BlockScorer>,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let keypair = KeyPair::generate().map_err(|e| anyhow!("{e}"))?;
        let address = keypair.address();
        info!("node identity: {}", address);

        let (ledger, _ledger_task) = spawn_ledger(StakeLedger::new());

        let store = Arc::new(MemoryStore::new());
        let now = now_secs();
        let genesis = Block::new(
            "0".repeat(64),
            vec![],
            config.initial_difficulty,
            0,
            Address::from_string("ZYTH_GENESIS_00000000000000000000".to_string()),
            now,
        );
        store
            .append_block(genesis)
            .map_err(|e| anyhow!("genesis append failed: {e}"))?;

        let mut accounts = AccountState::new();
        accounts.seed_genesis();

        if config.validator {
            ledger
                .stake(address.clone(), config.bootstrap_stake(), 500, now)
                .await
                .map_err(|e| anyhow!("bootstrap stake failed: {e}"))?;
            if let Some(account) = ledger
                .get_validator(address.clone())
                .await
                .map_err(|e| anyhow!("{e}"))?
            {
                store.upsert_validator(account);
            }
            info!("bonded bootstrap stake as validator {}", address);
        }

        Ok(Self {
            difficulty: config.initial_difficulty,
            coordinator: Arc::new(Mutex::new(FinalityCoordinator::new(config.round))),
            slashing: Arc::new(Mutex::new(SlashingEngine::new())),
            pow: PowEngine::new(config.max_pow_attempts),
            distributor: RewardDistributor::new(),
            config,
            keypair,
            address,
            ledger,
            scorer,
            store,
            accounts: Arc::new(Mutex::new(accounts)),
            mempool: Arc::new(Mutex::new(Vec::new())),
            round_intake: Arc::new(Mutex::new(None)),
            window_start: now,
            shutdown,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn ledger(&self) -> LedgerHandle {
        self.ledger.clone()
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn accounts(&self) -> Arc<Mutex<AccountState>> {
        self.accounts.clone()
    }

    /// Mine one candidate, run its finality round to a terminal state, and
    /// apply the round's effects. Returns the terminal status.
    pub async fn produce_block_once(&mut self) -> anyhow::Result<FinalityStatus> {
        let tip = self.store.tip().context("block log is empty")?;
        let height = tip.header.height + 1;

        if pow_engine::should_retarget(height) {
            let actual = now_secs().saturating_sub(self.window_start);
            self.difficulty = pow_engine::adjust_difficulty(self.difficulty, actual);
            self.window_start = now_secs();
        }

        let payload: Vec<Transaction> = {
            let mut mempool = self.mempool.lock();
            let take = mempool.len().min(MAX_TXS_PER_PROPOSAL);
            mempool.drain(..take).collect()
        };

        let snapshot = self
            .ledger
            .snapshot(height)
            .await
            .map_err(|e| anyhow!("{e}"))?;
        if let Some(expected) = select_proposer(height, &tip.hash, &snapshot) {
            if expected != self.address {
                info!(
                    "height {}: expected proposer is {}, mining anyway (open PoW lottery)",
                    height, expected
                );
            }
        }

        // Mine, retrying with a fresh timestamp when the search exhausts.
        let mut block = None;
        for attempt in 0..MINING_RETRY_LIMIT {
            match self.pow.propose_block(
                &tip,
                payload.clone(),
                self.address.clone(),
                self.difficulty,
                now_secs(),
            ) {
                Ok(mined) => {
                    block = Some(mined);
                    break;
                }
                Err(ConsensusError::NoSolutionFound { .. }) => {
                    warn!(
                        "nonce search exhausted at height {} (attempt {}), retrying",
                        height,
                        attempt + 1
                    );
                }
                Err(e) => return Err(anyhow!("{e}")),
            }
        }
        let block = block.context("mining retries exhausted")?;

        let opened_at = now_secs();
        {
            let mut coordinator = self.coordinator.lock();
            coordinator
                .open_round(&block, snapshot.clone(), opened_at)
                .map_err(|e| anyhow!("{e}"))?;
        }

        let (intake, inbox) = mpsc::channel::<RoundMessage>(256);
        *self.round_intake.lock() = Some(intake.clone());
        let collector = tokio::spawn(run_round(
            self.coordinator.clone(),
            height,
            inbox,
            self.shutdown.clone(),
        ));

        // Fire the asynchronous score request; a timeout or unusable reply
        // simply never delivers a score, and the grace window handles it.
        let scorer = self.scorer.clone();
        let score_request = ScoreRequest::for_block(&block);
        let score_intake = intake.clone();
        tokio::spawn(async move {
            match scorer.score_block(score_request).await {
                Ok(score) => {
                    let _ = score_intake.send(RoundMessage::Score(score)).await;
                }
                Err(e) => warn!("score request failed, treating as absent: {}", e),
            }
        });

        if self.config.validator && snapshot.contains(&self.address) {
            let mut vote = ValidatorVote {
                voter: self.address.clone(),
                block_hash: block.hash.clone(),
                height,
                vote: VoteType::Approve,
                signature: vec![],
                timestamp: now_secs(),
            };
            vote.signature = self.keypair.sign(&vote.signing_payload());
            let _ = intake.send(RoundMessage::Vote(vote)).await;
        }
        drop(intake);

        let status = collector
            .await
            .map_err(|e| anyhow!("round collector panicked: {e}"))?;
        *self.round_intake.lock() = None;

        self.archive_round(height);
        match status {
            FinalityStatus::Finalized => self.apply_finalized(block, height).await?,
            FinalityStatus::Rejected => {
                // Safety rejection: operators must see this distinctly from
                // a liveness expiry.
                error!("height {} REJECTED; candidate {} discarded", height, block.hash);
            }
            FinalityStatus::Expired => {
                warn!("height {} EXPIRED without quorum", height);
            }
            FinalityStatus::Pending => {
                warn!("round collector for height {} cancelled mid-flight", height);
                return Ok(status);
            }
        }

        self.run_slashing_scan(height).await?;
        Ok(status)
    }

    /// Copy the round's audit trail and decision record into the audit log.
    fn archive_round(&self, height: u64) {
        let coordinator = self.coordinator.lock();
        if let Some(round) = coordinator.round(height) {
            for vote in &round.audit {
                self.store.append_audit(height, AuditEntry::Vote(vote.clone()));
            }
            if let Some(score) = &round.record.ai_score {
                self.store.append_audit(height, AuditEntry::Score(score.clone()));
            }
            self.store
                .append_audit(height, AuditEntry::Decision(round.record.clone()));
        }
    }

    /// Effects of a FINALIZED round: votes onto the header, block into the
    /// log, transactions into account state, reward split credited.
    async fn apply_finalized(&self, mut block: Block, height: u64) -> anyhow::Result<()> {
        let (counted, committee): (Vec<ValidatorVote>, Vec<(Address, f64)>) = {
            let coordinator = self.coordinator.lock();
            let round = coordinator
                .round(height)
                .ok_or_else(|| anyhow!("round missing for finalized height {height}"))?;
            let voters = round.counted_voters();
            let votes = round
                .audit
                .iter()
                .filter(|v| {
                    v.block_hash == block.hash
                        && v.vote == VoteType::Approve
                        && voters.contains(&v.voter)
                })
                .cloned()
                .collect();
            let committee = voters
                .into_iter()
                .filter_map(|voter| {
                    round.snapshot.power_of(&voter).map(|power| (voter, power))
                })
                .collect();
            (votes, committee)
        };

        let mut seen = BTreeSet::new();
        for vote in counted {
            if seen.insert(vote.voter.clone()) {
                block.header.validator_votes.push(vote);
            }
        }

        self.store
            .append_block(block.clone())
            .map_err(|e| anyhow!("append of finalized block failed: {e}"))?;

        let reward = pow_engine::reward_for_height(height);
        let shares = self
            .distributor
            .distribute(height, reward, block.proposer.clone(), &committee);

        {
            let mut accounts = self.accounts.lock();
            if let Err(e) = accounts.apply_block(&block) {
                error!("finalized block {} had an unappliable transaction: {}", height, e);
            }
            accounts
                .credit(&shares.miner, shares.miner_amount)
                .map_err(|e| anyhow!("{e}"))?;
            for (address, amount) in &shares.committee {
                accounts.credit(address, *amount).map_err(|e| anyhow!("{e}"))?;
            }
            accounts
                .credit(
                    &Address::from_string(TREASURY_ADDRESS.to_string()),
                    shares.treasury,
                )
                .map_err(|e| anyhow!("{e}"))?;
        }

        info!(
            "height {} FINALIZED: reward {} uZYTH split across miner + {} committee seat(s)",
            height,
            reward,
            shares.committee.len()
        );
        Ok(())
    }

    /// Post-round misbehavior scan; penalties flow through the ledger's
    /// single writer and land in the audit log.
    async fn run_slashing_scan(&self, height: u64) -> anyhow::Result<()> {
        let now = now_secs();
        let actions = {
            let coordinator = self.coordinator.lock();
            let round = match coordinator.round(height) {
                Some(round) => round,
                None => return Ok(()),
            };
            self.slashing
                .lock()
                .scan_round(round, &BTreeSet::new(), now)
                .map_err(|e| anyhow!("{e}"))?
        };

        for action in actions {
            match self
                .ledger
                .slash(action.offender.clone(), action.penalty_bps, action.jail)
                .await
            {
                Ok(outcome) => {
                    let event = self
                        .slashing
                        .lock()
                        .record_applied(&action, outcome.penalty, now);
                    self.store.append_audit(height, AuditEntry::Slash(event));
                    // mirror the mutated record into the validator table
                    if let Ok(Some(account)) =
                        self.ledger.get_validator(action.offender.clone()).await
                    {
                        self.store.upsert_validator(account);
                    }
                }
                Err(e) => error!(
                    "slash of {} for {} failed: {}",
                    action.offender,
                    action.kind.as_str(),
                    e
                ),
            }
        }
        Ok(())
    }

    /// Periodic maintenance: release matured unbonding into balances and
    /// lift expired cooldown jails.
    async fn sweep_once(
        ledger: &LedgerHandle,
        accounts: &Arc<Mutex<AccountState>>,
        now: u64,
    ) {
        match ledger.release_matured(now).await {
            Ok(released) => {
                let mut accounts = accounts.lock();
                for request in released {
                    if let Err(e) = accounts.credit(&request.address, request.amount) {
                        error!("unbonding credit for {} failed: {}", request.address, e);
                    }
                }
            }
            Err(e) => error!("unbonding sweep failed: {}", e),
        }
        if let Err(e) = ledger.sweep_jails(now).await {
            error!("jail sweep failed: {}", e);
        }
    }

    /// Run the node until the shutdown signal fires.
    pub async fn run(mut self) -> anyhow::Result<()> {
        // Transaction intake: RPC submissions land in the mempool.
        let (tx_sink, mut tx_rx) = mpsc::channel::<Transaction>(1_024);
        let mempool = self.mempool.clone();
        tokio::spawn(async move {
            while let Some(transaction) = tx_rx.recv().await {
                mempool.lock().push(transaction);
            }
        });

        let rpc_context = RpcContext {
            ledger: self.ledger.clone(),
            store: self.store.clone(),
            tx_sink,
        };
        let rpc_port = self.config.rpc_port;
        tokio::spawn(zyth_rpc::serve(rpc_context, rpc_port));

        // Unbonding / jail sweeps.
        let sweep_ledger = self.ledger.clone();
        let sweep_accounts = self.accounts.clone();
        let mut sweep_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Node::sweep_once(&sweep_ledger, &sweep_accounts, now_secs()).await;
                    }
                    changed = sweep_shutdown.changed() => {
                        if changed.is_err() || *sweep_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        info!(
            "node running (network={}, mine={}, validator={})",
            self.config.network_id, self.config.mine, self.config.validator
        );

        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.config.mine {
                match self.produce_block_once().await {
                    Ok(status) => {
                        if !matches!(status, FinalityStatus::Finalized) {
                            // back off before retrying the height
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                    Err(e) => {
                        error!("block production failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            } else {
                // Non-mining nodes only serve queries and sweeps.
                let _ = tokio::time::timeout(Duration::from_secs(1), shutdown.changed()).await;
            }
        }

        info!("node shut down cleanly");
        Ok(())
    }
}
