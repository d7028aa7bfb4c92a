//! Crash round engine.
//!
//! A single actor owns the live round: bets, cashouts and phase transitions
//! are processed in received order on one task, and all phase timestamps are
//! scheduled, not measured, so a late poll never shifts the crash instant.
//! Observers never touch round state directly; they read snapshots and the
//! event stream, and recompute the live multiplier themselves.

use crate::config::CrashConfig;
use crate::crash::fairness::{
    self, commit_hash, crash_point_x10000, ms_to_reach, multiplier_x10000, RoundReveal,
};
use crate::crash::types::{
    BetReceipt, CashoutReceipt, CrashBet, CrashRound, RoundPhase, RoundSnapshot,
};
use crate::errors::{EscrowError, RoundError};
use crate::escrow::EscrowService;
use crate::events::{EventHub, RoundEvent};
use crate::ledger::{BetId, NetOutcome, NetSettlement, OwnerId};
use crate::token::Amount;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};

const CRASH_MARKET: &str = "crash";

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Source of server seeds. The production engine draws from the OS; tests
/// inject known seeds to pin the crash point.
pub trait SeedSource: Send {
    fn next_seed(&mut self) -> [u8; 32];
}

/// OS entropy seed source.
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&mut self) -> [u8; 32] {
        fairness::generate_server_seed()
    }
}

/// The round state machine. All methods take the caller's notion of "now" in
/// unix milliseconds; the async actor feeds it the real clock, tests feed it
/// manual time.
pub struct RoundState {
    config: CrashConfig,
    escrow: Arc<EscrowService>,
    hub: Arc<EventHub>,
    operator: OwnerId,
    seeds: Box<dyn SeedSource>,
    server_seed: [u8; 32],
    round: CrashRound,
    next_round_id: u64,
}

impl RoundState {
    pub fn new(config: CrashConfig, escrow: Arc<EscrowService>, hub: Arc<EventHub>, now: u64) -> Self {
        Self::with_seed_source(config, escrow, hub, now, Box::new(OsSeedSource))
    }

    pub fn with_seed_source(
        config: CrashConfig,
        escrow: Arc<EscrowService>,
        hub: Arc<EventHub>,
        now: u64,
        seeds: Box<dyn SeedSource>,
    ) -> Self {
        let operator = escrow.operator().clone();
        let mut state = Self {
            config,
            escrow,
            hub,
            operator,
            seeds,
            server_seed: [0u8; 32],
            round: CrashRound {
                round_id: 0,
                phase: RoundPhase::Cooldown,
                bet_id: BetId::derive(CRASH_MARKET, 0, "round"),
                commit_hash: [0u8; 32],
                server_seed: None,
                crash_x10000: None,
                betting_closes_at: 0,
                running_started_at: None,
                crashed_at: None,
                cooldown_ends_at: None,
                bets: Vec::new(),
            },
            next_round_id: 1,
        };
        state.open_round(now);
        state
    }

    pub fn round(&self) -> &CrashRound {
        &self.round
    }

    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.config.tick_interval_ms
    }

    /// Start a fresh round: new seed, new commit, new betting window.
    fn open_round(&mut self, opened_at: u64) {
        let round_id = self.next_round_id;
        self.next_round_id += 1;

        // The seed is fixed here, before the commit leaves the engine.
        self.server_seed = self.seeds.next_seed();
        let commit = commit_hash(&self.server_seed);
        let betting_closes_at = opened_at + self.config.betting_window_ms;

        self.round = CrashRound {
            round_id,
            phase: RoundPhase::Betting,
            bet_id: BetId::derive(CRASH_MARKET, round_id, "round"),
            commit_hash: commit,
            server_seed: None,
            crash_x10000: None,
            betting_closes_at,
            running_started_at: None,
            crashed_at: None,
            cooldown_ends_at: None,
            bets: Vec::new(),
        };

        tracing::info!(round_id, betting_closes_at, "round opened");
        self.hub.publish(RoundEvent::RoundOpened {
            round_id,
            commit_hash: hex::encode(commit),
            betting_closes_at,
        });
    }

    /// Scheduled crash instant: the smallest time at which the live
    /// multiplier reaches the crash point. Only meaningful once running.
    fn crash_deadline(&self) -> Option<u64> {
        let started = self.round.running_started_at?;
        let crash = self.round.crash_x10000?;
        Some(started + ms_to_reach(crash, self.config.growth_x10000_per_sec))
    }

    /// Advance through every transition that is due at `now`. Transitions
    /// use their scheduled timestamps, so polling late changes nothing.
    pub fn poll(&mut self, now: u64) {
        loop {
            match self.round.phase {
                RoundPhase::Betting if now >= self.round.betting_closes_at => self.freeze(),
                RoundPhase::Running if now >= self.crash_deadline().unwrap() => self.crash(),
                RoundPhase::Crashed => {
                    self.round.phase = RoundPhase::Cooldown;
                }
                RoundPhase::Cooldown if self.round.cooldown_ends_at.is_some() => {
                    let ends_at = self.round.cooldown_ends_at.unwrap();
                    if now < ends_at {
                        break;
                    }
                    self.hub.publish(RoundEvent::CooldownEnded {
                        round_id: self.round.round_id,
                    });
                    self.open_round(ends_at);
                }
                _ => break,
            }
        }
    }

    /// Freeze the bet set and fix the crash point. The point is computed
    /// exactly once and stays hidden until reveal.
    fn freeze(&mut self) {
        let started_at = self.round.betting_closes_at;
        let crash = crash_point_x10000(
            &self.server_seed,
            self.round.round_id,
            self.config.edge_bps,
            self.config.max_multiplier_x10000,
        );
        self.round.crash_x10000 = Some(crash);
        self.round.running_started_at = Some(started_at);
        self.round.phase = RoundPhase::Running;

        tracing::info!(
            round_id = self.round.round_id,
            bets = self.round.bets.len(),
            total_staked = self.round.total_staked(),
            "round running"
        );
        self.hub.publish(RoundEvent::RoundRunning {
            round_id: self.round.round_id,
            running_started_at: started_at,
        });
    }

    /// Crash the round at its scheduled instant: settle every stake, reveal
    /// the seed, enter cooldown.
    fn crash(&mut self) {
        let crashed_at = self.crash_deadline().unwrap();
        let crash = self.round.crash_x10000.unwrap();
        self.round.crashed_at = Some(crashed_at);
        self.round.cooldown_ends_at = Some(crashed_at + self.config.cooldown_ms);
        self.round.server_seed = Some(self.server_seed);
        self.round.phase = RoundPhase::Crashed;

        self.settle_round();

        let reveal = RoundReveal::new(&self.server_seed, self.round.round_id, crash);
        tracing::info!(
            round_id = self.round.round_id,
            crash_x10000 = crash,
            "round crashed"
        );
        self.hub.publish(RoundEvent::RoundCrashed {
            round_id: reveal.round_id,
            server_seed: reveal.server_seed,
            derived_hash: reveal.derived_hash,
            u_numerator: reveal.u_numerator,
            crash_x10000: reveal.crash_x10000,
        });
    }

    /// One net settlement for the whole round: cashed-out owners win their
    /// latched net, everyone else forfeits their stake.
    fn settle_round(&self) {
        if self.round.bets.is_empty() {
            return;
        }
        let entries: Vec<NetSettlement> = self
            .round
            .bets
            .iter()
            .map(|bet| {
                if bet.cashed_out {
                    NetSettlement {
                        owner: bet.owner.clone(),
                        net: bet.payout.unwrap_or(bet.stake) - bet.stake,
                        outcome: NetOutcome::Win,
                    }
                } else {
                    NetSettlement {
                        owner: bet.owner.clone(),
                        net: bet.stake,
                        outcome: NetOutcome::Lose,
                    }
                }
            })
            .collect();

        if let Err(e) = self
            .escrow
            .settle_net(&self.operator, &self.round.bet_id, &entries)
        {
            // A reconciliation failure here is a bug, never something to
            // paper over with a partial payout. Funds stay locked.
            tracing::error!(
                round_id = self.round.round_id,
                bet_id = %self.round.bet_id,
                error = %e,
                "round settlement failed; stakes remain locked"
            );
        }
    }

    /// Accept a bet for the current round. Valid only during its betting
    /// window, once per owner; the stake is locked in escrow immediately.
    pub fn place_bet(
        &mut self,
        now: u64,
        owner: &OwnerId,
        round_id: u64,
        amount: Amount,
    ) -> Result<BetReceipt, RoundError> {
        self.poll(now);

        if round_id != self.round.round_id {
            return Err(RoundError::StaleRound {
                current: self.round.round_id,
                requested: round_id,
            });
        }
        if self.round.phase != RoundPhase::Betting {
            return Err(RoundError::WrongPhase(self.round.phase));
        }
        if self.round.bet_for(owner).is_some() {
            return Err(RoundError::DuplicateBet);
        }

        self.escrow
            .lock_for_bet(&self.round.bet_id, owner, &self.config.token.symbol, amount)?;
        self.round.bets.push(CrashBet {
            owner: owner.clone(),
            stake: amount,
            cashed_out: false,
            cashout_multiplier_x10000: None,
            payout: None,
        });

        self.hub.publish(RoundEvent::BetPlaced {
            round_id,
            owner: owner.clone(),
            stake: amount,
        });
        Ok(BetReceipt {
            round_id,
            owner: owner.clone(),
            stake: amount,
        })
    }

    /// Cash out at the live multiplier. The crash timestamp is authoritative:
    /// a request at or after the scheduled crash instant loses, even if it
    /// was sent before the client saw the crash event.
    ///
    /// The multiplier and payout are latched here, but balances move only in
    /// the round's single settlement at crash time; a caller polling their
    /// available balance right after the receipt will not see the payout yet.
    pub fn cashout(
        &mut self,
        now: u64,
        owner: &OwnerId,
        round_id: u64,
    ) -> Result<CashoutReceipt, RoundError> {
        self.poll(now);

        if round_id != self.round.round_id {
            return Err(RoundError::StaleRound {
                current: self.round.round_id,
                requested: round_id,
            });
        }
        match self.round.phase {
            RoundPhase::Running => {}
            RoundPhase::Crashed | RoundPhase::Cooldown => return Err(RoundError::RoundCrashed),
            phase => return Err(RoundError::WrongPhase(phase)),
        }

        let elapsed = now.saturating_sub(self.round.running_started_at.unwrap());
        let multiplier = multiplier_x10000(elapsed, self.config.growth_x10000_per_sec);
        if multiplier >= self.round.crash_x10000.unwrap() {
            return Err(RoundError::RoundCrashed);
        }

        let bet = self
            .round
            .bets
            .iter_mut()
            .find(|b| &b.owner == owner)
            .ok_or(RoundError::MissingBet)?;
        if bet.cashed_out {
            return Err(RoundError::AlreadyCashedOut);
        }

        let payout = u64::try_from(
            bet.stake as u128 * multiplier as u128 / crate::crash::types::MULTIPLIER_SCALE as u128,
        )
        .map_err(|_| EscrowError::AmountOverflow)?;
        bet.cashed_out = true;
        bet.cashout_multiplier_x10000 = Some(multiplier);
        bet.payout = Some(payout);

        tracing::debug!(round_id, %owner, multiplier, payout, "cashout accepted");
        self.hub.publish(RoundEvent::CashedOut {
            round_id,
            owner: owner.clone(),
            multiplier_x10000: multiplier,
            payout,
        });
        Ok(CashoutReceipt {
            round_id,
            owner: owner.clone(),
            multiplier_x10000: multiplier,
            payout,
        })
    }

    pub fn snapshot(&self, now: u64) -> RoundSnapshot {
        let multiplier = match self.round.phase {
            RoundPhase::Running => {
                let elapsed = now.saturating_sub(self.round.running_started_at.unwrap());
                Some(multiplier_x10000(elapsed, self.config.growth_x10000_per_sec))
            }
            _ => None,
        };
        RoundSnapshot {
            round_id: self.round.round_id,
            phase: self.round.phase,
            commit_hash: hex::encode(self.round.commit_hash),
            betting_closes_at: self.round.betting_closes_at,
            running_started_at: self.round.running_started_at,
            multiplier_x10000: multiplier,
            bet_count: self.round.bets.len(),
            total_staked: self.round.total_staked(),
        }
    }

    /// Broadcast the live multiplier. Cheap and idempotent: observers could
    /// just as well derive it from `running_started_at` themselves.
    pub fn publish_tick(&self, now: u64) {
        if self.round.phase != RoundPhase::Running {
            return;
        }
        let elapsed = now.saturating_sub(self.round.running_started_at.unwrap());
        self.hub.publish(RoundEvent::Tick {
            round_id: self.round.round_id,
            multiplier_x10000: multiplier_x10000(elapsed, self.config.growth_x10000_per_sec),
        });
    }

    /// Wall-clock instant of the next due transition.
    pub fn next_deadline(&self, now: u64) -> u64 {
        match self.round.phase {
            RoundPhase::Betting => self.round.betting_closes_at,
            RoundPhase::Running => self.crash_deadline().unwrap(),
            RoundPhase::Crashed => now,
            RoundPhase::Cooldown => self.round.cooldown_ends_at.unwrap_or(now),
        }
    }
}

enum Command {
    PlaceBet {
        owner: OwnerId,
        round_id: u64,
        amount: Amount,
        reply: oneshot::Sender<Result<BetReceipt, RoundError>>,
    },
    Cashout {
        owner: OwnerId,
        round_id: u64,
        reply: oneshot::Sender<Result<CashoutReceipt, RoundError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoundSnapshot>,
    },
    Shutdown,
}

/// Handle to the engine actor. Cloneable; all clones talk to the same round.
#[derive(Clone)]
pub struct CrashEngine {
    cmd_tx: mpsc::Sender<Command>,
}

impl CrashEngine {
    /// Spawn the engine actor on the current runtime and open round 1.
    pub fn spawn(config: CrashConfig, escrow: Arc<EscrowService>, hub: Arc<EventHub>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let state = RoundState::new(config, escrow, hub, now_ms());
        tokio::spawn(run_loop(state, cmd_rx));
        Self { cmd_tx }
    }

    pub async fn place_bet(
        &self,
        owner: OwnerId,
        round_id: u64,
        amount: Amount,
    ) -> Result<BetReceipt, RoundError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PlaceBet {
                owner,
                round_id,
                amount,
                reply,
            })
            .await
            .map_err(|_| RoundError::EngineClosed)?;
        rx.await.map_err(|_| RoundError::EngineClosed)?
    }

    pub async fn cashout(&self, owner: OwnerId, round_id: u64) -> Result<CashoutReceipt, RoundError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Cashout {
                owner,
                round_id,
                reply,
            })
            .await
            .map_err(|_| RoundError::EngineClosed)?;
        rx.await.map_err(|_| RoundError::EngineClosed)?
    }

    pub async fn snapshot(&self) -> Result<RoundSnapshot, RoundError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| RoundError::EngineClosed)?;
        rx.await.map_err(|_| RoundError::EngineClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

async fn run_loop(mut state: RoundState, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut next_tick: u64 = 0;
    loop {
        let now = now_ms();
        state.poll(now);

        let mut wake = state.next_deadline(now);
        if state.phase() == RoundPhase::Running {
            if now >= next_tick {
                state.publish_tick(now);
                next_tick = now + state.tick_interval_ms();
            }
            wake = wake.min(next_tick);
        }

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(Command::Shutdown) => break,
                Some(Command::PlaceBet { owner, round_id, amount, reply }) => {
                    let _ = reply.send(state.place_bet(now_ms(), &owner, round_id, amount));
                }
                Some(Command::Cashout { owner, round_id, reply }) => {
                    let _ = reply.send(state.cashout(now_ms(), &owner, round_id));
                }
                Some(Command::Snapshot { reply }) => {
                    let _ = reply.send(state.snapshot(now_ms()));
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(wake.saturating_sub(now))) => {}
        }
    }
    tracing::info!("crash engine stopped");
}
