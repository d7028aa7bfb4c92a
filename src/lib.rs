//! Wagervault - fund-custody ledger and provably-fair round engine
//!
//! The custody core of a wagering platform: users keep custody of their
//! funds except while a bet is live. Three load-bearing pieces:
//!
//! - the [`ledger`] and [`escrow`] operations (deposit, withdraw,
//!   lock-for-bet, settle), which enforce conservation and authorization;
//! - the pure pari-mutuel [`settlement`] calculator for leaderboard-style
//!   markets;
//! - the [`crash`] round engine, a single actor driving commit-reveal
//!   rounds, live multipliers, bets and cashouts.
//!
//! Everything user-facing (rendering, wallets, transport) lives outside this
//! crate and talks to it through the escrow surface and the [`events`] hub.

pub mod config;
pub mod crash;
pub mod errors;
pub mod escrow;
pub mod events;
pub mod ledger;
pub mod settlement;
pub mod token;

pub use config::{CrashConfig, EscrowConfig, VaultConfig};
pub use crash::{CrashEngine, RoundPhase, RoundSnapshot};
pub use errors::{EscrowError, RoundError};
pub use escrow::{EscrowService, NoopTransfer, TokenTransfer, TransferError};
pub use events::{EventHub, RoundEvent};
pub use ledger::{AccountView, Balance, BetId, BetRecord, Ledger, NetOutcome, NetSettlement, OwnerId};
pub use token::{Amount, Token};
