//! Error taxonomy for the custody core.
//!
//! Every escrow operation is all-or-nothing: on any error below, no partial
//! state change is visible and the caller receives the specific kind.

use crate::crash::types::RoundPhase;
use crate::token::Amount;

/// Errors raised by ledger and escrow operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("unsupported token: {0}")]
    UnsupportedToken(String),

    #[error("insufficient available balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    #[error("bet {bet_id} is bound to token {expected}, got {got}")]
    BetTokenMismatch {
        bet_id: String,
        expected: String,
        got: String,
    },

    #[error("unknown bet: {0}")]
    UnknownBet(String),

    #[error("participant {0} has no stake in this bet")]
    MissingStake(String),

    #[error("settlement does not reconcile: {0}")]
    InvalidSettlement(String),

    #[error("bet {0} already settled")]
    BetAlreadySettled(String),

    #[error("treasury lacks funds: need {needed}, have {available}")]
    TreasuryInsufficient { needed: Amount, available: Amount },

    #[error("caller is not the settlement operator")]
    Unauthorized,

    #[error("a transfer is already in flight for this account")]
    ReentrancyRejected,

    #[error("external transfer failed: {0}")]
    TransferFailed(String),

    #[error("amount arithmetic overflow")]
    AmountOverflow,
}

/// Errors raised by the crash round engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("round {current} is current, request targeted round {requested}")]
    StaleRound { current: u64, requested: u64 },

    #[error("action not valid in phase {0}")]
    WrongPhase(RoundPhase),

    #[error("owner already has a bet in this round")]
    DuplicateBet,

    #[error("owner has no bet in this round")]
    MissingBet,

    #[error("owner already cashed out this round")]
    AlreadyCashedOut,

    #[error("round already crashed")]
    RoundCrashed,

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error("round engine is not running")]
    EngineClosed,
}
