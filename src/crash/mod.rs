pub mod engine;
pub mod fairness;
pub mod types;

pub use engine::{CrashEngine, OsSeedSource, RoundState, SeedSource};
pub use fairness::{crash_point_x10000, multiplier_x10000, verify_round, RoundReveal};
pub use types::{
    BetReceipt, CashoutReceipt, CrashBet, CrashRound, RoundPhase, RoundSnapshot, MULTIPLIER_SCALE,
};
