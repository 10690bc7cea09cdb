// SINGLE-WRITER LEDGER ACCESS
//
// The StakeLedger is owned by exactly one tokio task. Every mutation and
// every consistent read is a LedgerCommand through that task's mailbox,
// answered over a oneshot channel. Components hold a cloneable LedgerHandle
// and never see the ledger struct itself.

use log::info;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use zyth_core::Address;

use crate::account::ValidatorAccount;
use crate::error::LedgerError;
use crate::ledger::{JailTerm, SlashOutcome, StakeLedger, MINIMUM_VALIDATOR_STAKE};
use crate::snapshot::LedgerSnapshot;
use crate::unbonding::UnbondingRequest;

/// Aggregate figures served to the operator query surface.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerStats {
    pub total_staked: u64,
    pub validator_count: usize,
    pub minimum_stake: u64,
}

/// Commands accepted by the ledger owner task.
#[derive(Debug)]
pub enum LedgerCommand {
    Stake {
        address: Address,
        amount: u64,
        commission_bps: u16,
        now: u64,
        reply: oneshot::Sender<Result<(), LedgerError>>,
    },
    Unstake {
        address: Address,
        amount: u64,
        now: u64,
        reply: oneshot::Sender<Result<UnbondingRequest, LedgerError>>,
    },
    Slash {
        address: Address,
        penalty_bps: u32,
        jail: Option<JailTerm>,
        reply: oneshot::Sender<Result<SlashOutcome, LedgerError>>,
    },
    ReleaseMatured {
        now: u64,
        reply: oneshot::Sender<Vec<UnbondingRequest>>,
    },
    SweepJails {
        now: u64,
        reply: oneshot::Sender<Vec<Address>>,
    },
    Snapshot {
        height: u64,
        reply: oneshot::Sender<LedgerSnapshot>,
    },
    GetValidator {
        address: Address,
        reply: oneshot::Sender<Option<ValidatorAccount>>,
    },
    Stats {
        reply: oneshot::Sender<LedgerStats>,
    },
}

/// Cloneable capability for talking to the ledger owner task.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    pub async fn stake(
        &self,
        address: Address,
        amount: u64,
        commission_bps: u16,
        now: u64,
    ) -> Result<(), LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::Stake {
            address,
            amount,
            commission_bps,
            now,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)?
    }

    pub async fn unstake(
        &self,
        address: Address,
        amount: u64,
        now: u64,
    ) -> Result<UnbondingRequest, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::Unstake {
            address,
            amount,
            now,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)?
    }

    pub async fn slash(
        &self,
        address: Address,
        penalty_bps: u32,
        jail: Option<JailTerm>,
    ) -> Result<SlashOutcome, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::Slash {
            address,
            penalty_bps,
            jail,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)?
    }

    pub async fn release_matured(&self, now: u64) -> Result<Vec<UnbondingRequest>, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::ReleaseMatured { now, reply }).await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)
    }

    pub async fn sweep_jails(&self, now: u64) -> Result<Vec<Address>, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::SweepJails { now, reply }).await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)
    }

    /// Consistent committee snapshot taken inside the owner task, so it can
    /// never interleave with a mutation.
    pub async fn snapshot(&self, height: u64) -> Result<LedgerSnapshot, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::Snapshot { height, reply }).await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)
    }

    pub async fn get_validator(
        &self,
        address: Address,
    ) -> Result<Option<ValidatorAccount>, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::GetValidator { address, reply }).await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)
    }

    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.send(LedgerCommand::Stats { reply }).await?;
        rx.await.map_err(|_| LedgerError::MailboxClosed)
    }

    async fn send(&self, command: LedgerCommand) -> Result<(), LedgerError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| LedgerError::MailboxClosed)
    }
}

/// Spawn the owner task and return its handle. The task drains its mailbox
/// until every handle is dropped.
pub fn spawn_ledger(mut ledger: StakeLedger) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<LedgerCommand>(256);

    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                LedgerCommand::Stake {
                    address,
                    amount,
                    commission_bps,
                    now,
                    reply,
                } => {
                    let _ = reply.send(ledger.stake(address, amount, commission_bps, now));
                }
                LedgerCommand::Unstake {
                    address,
                    amount,
                    now,
                    reply,
                } => {
                    let _ = reply.send(ledger.unstake(&address, amount, now));
                }
                LedgerCommand::Slash {
                    address,
                    penalty_bps,
                    jail,
                    reply,
                } => {
                    let _ = reply.send(ledger.slash(&address, penalty_bps, jail));
                }
                LedgerCommand::ReleaseMatured { now, reply } => {
                    let _ = reply.send(ledger.release_matured(now));
                }
                LedgerCommand::SweepJails { now, reply } => {
                    let _ = reply.send(ledger.sweep_jails(now));
                }
                LedgerCommand::Snapshot { height, reply } => {
                    let _ = reply.send(ledger.snapshot(height));
                }
                LedgerCommand::GetValidator { address, reply } => {
                    let _ = reply.send(ledger.get(&address).cloned());
                }
                LedgerCommand::Stats { reply } => {
                    let _ = reply.send(LedgerStats {
                        total_staked: ledger.total_staked(),
                        validator_count: ledger.active_validator_count(),
                        minimum_stake: MINIMUM_VALIDATOR_STAKE,
                    });
                }
            }
        }
        info!("ledger owner task shutting down");
    });

    (LedgerHandle { tx }, task)
}
