//! Token registry and fixed-point amount helpers.
//!
//! All custody and payout arithmetic runs on integer base units; the decimal
//! scale is declared per token and only matters at the display boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in token base units (fixed-point, scale = token decimals).
pub type Amount = u64;

/// A fungible token the ledger is willing to custody.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Token {
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    /// Native SOL token
    pub fn sol() -> Self {
        Self {
            symbol: "SOL".to_string(),
            decimals: 9,
        }
    }

    /// USDC SPL token
    pub fn usdc() -> Self {
        Self {
            symbol: "USDC".to_string(),
            decimals: 6,
        }
    }

    /// USDT SPL token
    pub fn usdt() -> Self {
        Self {
            symbol: "USDT".to_string(),
            decimals: 6,
        }
    }

    /// List of all supported tokens
    pub fn all_supported() -> Vec<Self> {
        vec![Self::sol(), Self::usdc(), Self::usdt()]
    }

    /// Convert a whole-token count to base units, `None` on overflow.
    pub fn base_units(&self, whole: u64) -> Option<Amount> {
        let scale = 10u128.checked_pow(self.decimals as u32)?;
        let units = (whole as u128).checked_mul(scale)?;
        u64::try_from(units).ok()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_units() {
        let usdc = Token::usdc();
        assert_eq!(usdc.base_units(1), Some(1_000_000));
        assert_eq!(usdc.base_units(250), Some(250_000_000));

        let sol = Token::sol();
        assert_eq!(sol.base_units(2), Some(2_000_000_000));
    }

    #[test]
    fn test_base_units_overflow() {
        let sol = Token::sol();
        assert_eq!(sol.base_units(u64::MAX), None);
    }

    #[test]
    fn test_supported_set() {
        let all = Token::all_supported();
        assert!(all.iter().any(|t| t.symbol == "USDC"));
        assert!(all.iter().any(|t| t.symbol == "SOL"));
    }
}
