//! Configuration with validation and defaults.

use crate::ledger::OwnerId;
use crate::token::Token;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the custody core.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    pub escrow: EscrowConfig,
    pub crash: CrashConfig,
}

/// Ledger and escrow configuration.
///
/// The operator, treasury and fee pool are ordinary ledger owners with
/// reserved identities; the operator is the only caller allowed to settle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowConfig {
    pub supported_tokens: Vec<Token>,
    pub operator: OwnerId,
    pub treasury: OwnerId,
    pub fee_pool: OwnerId,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            supported_tokens: Token::all_supported(),
            operator: OwnerId::from("vault:operator"),
            treasury: OwnerId::from("vault:treasury"),
            fee_pool: OwnerId::from("vault:fee-pool"),
        }
    }
}

/// Crash round engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrashConfig {
    /// Token crash bets are denominated in.
    pub token: Token,
    /// Length of the betting window in milliseconds.
    pub betting_window_ms: u64,
    /// Delay between crash and the next betting window.
    pub cooldown_ms: u64,
    /// House edge in basis points of 1.0 (200 = 2%).
    pub edge_bps: u32,
    /// Multiplier growth per second, in x10000 fixed point (5000 = +0.5x/s).
    pub growth_x10000_per_sec: u64,
    /// Crash point clamp ceiling, x10000 fixed point (500000 = 50x).
    pub max_multiplier_x10000: u64,
    /// Interval between live multiplier broadcasts while running.
    pub tick_interval_ms: u64,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            token: Token::usdc(),
            betting_window_ms: 8_000,
            cooldown_ms: 4_000,
            edge_bps: 200,
            growth_x10000_per_sec: 5_000,
            max_multiplier_x10000: 500_000,
            tick_interval_ms: 100,
        }
    }
}

/// Configuration validation failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid config value for {field}: {reason}")]
pub struct ConfigError {
    pub field: String,
    pub reason: String,
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl EscrowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_tokens.is_empty() {
            return Err(invalid("escrow.supported_tokens", "must not be empty"));
        }
        let house = [&self.operator, &self.treasury, &self.fee_pool];
        for (i, a) in house.iter().enumerate() {
            for b in house.iter().skip(i + 1) {
                if a == b {
                    return Err(invalid(
                        "escrow",
                        "operator, treasury and fee pool must be distinct owners",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn is_supported(&self, symbol: &str) -> bool {
        self.supported_tokens.iter().any(|t| t.symbol == symbol)
    }
}

impl CrashConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.betting_window_ms == 0 {
            return Err(invalid("crash.betting_window_ms", "must be positive"));
        }
        if self.edge_bps >= 10_000 {
            return Err(invalid("crash.edge_bps", "must be below 10000"));
        }
        if self.growth_x10000_per_sec == 0 {
            return Err(invalid("crash.growth_x10000_per_sec", "must be positive"));
        }
        if self.max_multiplier_x10000 < crate::crash::types::MULTIPLIER_SCALE {
            return Err(invalid("crash.max_multiplier_x10000", "must be at least 1.0x"));
        }
        Ok(())
    }
}

impl VaultConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.escrow.validate()?;
        self.crash.validate()?;
        if !self.escrow.is_supported(&self.crash.token.symbol) {
            return Err(invalid(
                "crash.token",
                "crash token must be in escrow.supported_tokens",
            ));
        }
        Ok(())
    }
}
