//! Record types for the crash round engine.

use crate::ledger::{BetId, OwnerId};
use crate::token::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale for multipliers and crash points: 10_000 == 1.0x.
pub const MULTIPLIER_SCALE: u64 = 10_000;

/// Round lifecycle, strictly cyclic:
/// betting -> running -> crashed -> cooldown -> betting (next round).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Betting,
    Running,
    Crashed,
    Cooldown,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Betting => write!(f, "betting"),
            RoundPhase::Running => write!(f, "running"),
            RoundPhase::Crashed => write!(f, "crashed"),
            RoundPhase::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// One owner's bet within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashBet {
    pub owner: OwnerId,
    pub stake: Amount,
    pub cashed_out: bool,
    /// Latched at cashout time; payout = stake * multiplier.
    pub cashout_multiplier_x10000: Option<u64>,
    pub payout: Option<Amount>,
}

/// Full round record. Owned exclusively by the engine; the secret server
/// seed lives outside this record until reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRound {
    pub round_id: u64,
    pub phase: RoundPhase,
    pub bet_id: BetId,
    pub commit_hash: [u8; 32],
    /// Populated at reveal, nil before.
    pub server_seed: Option<[u8; 32]>,
    /// Computed once at round freeze, hidden until reveal.
    pub crash_x10000: Option<u64>,
    pub betting_closes_at: u64,
    pub running_started_at: Option<u64>,
    pub crashed_at: Option<u64>,
    pub cooldown_ends_at: Option<u64>,
    pub bets: Vec<CrashBet>,
}

impl CrashRound {
    pub fn total_staked(&self) -> Amount {
        self.bets.iter().map(|b| b.stake).sum()
    }

    pub fn bet_for(&self, owner: &OwnerId) -> Option<&CrashBet> {
        self.bets.iter().find(|b| &b.owner == owner)
    }
}

/// Projection of the live round, safe to hand to any observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: u64,
    pub phase: RoundPhase,
    pub commit_hash: String,
    pub betting_closes_at: u64,
    pub running_started_at: Option<u64>,
    /// Present only while running; recomputed on demand from elapsed time.
    pub multiplier_x10000: Option<u64>,
    pub bet_count: usize,
    pub total_staked: Amount,
}

/// Returned to a bettor when their bet is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetReceipt {
    pub round_id: u64,
    pub owner: OwnerId,
    pub stake: Amount,
}

/// Returned to a bettor when their cashout lands before the crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutReceipt {
    pub round_id: u64,
    pub owner: OwnerId,
    pub multiplier_x10000: u64,
    pub payout: Amount,
}
