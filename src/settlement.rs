//! Pure pari-mutuel payout calculator.
//!
//! No internal state and no ledger access: re-derivable at any time from the
//! full bet history for audit. Output feeds pool settlement in the escrow.

use crate::ledger::OwnerId;
use crate::token::Amount;
use std::collections::HashMap;

/// Payout for one wager: `min(wager / stake_on_pick * pot, pot)` in integer
/// math, truncating. Zero on an empty pot or an unbacked pick, so there is
/// never a division by zero.
pub fn pool_payout(pot: Amount, stake_on_pick: Amount, wager: Amount) -> Amount {
    if pot == 0 || stake_on_pick == 0 || wager == 0 {
        return 0;
    }
    let raw = (wager as u128 * pot as u128) / stake_on_pick as u128;
    raw.min(pot as u128) as Amount
}

/// Payout for a wager on `pick` given the per-pick stake totals.
pub fn payout_for_pick(
    pot: Amount,
    stake_by_pick: &HashMap<String, Amount>,
    pick: &str,
    wager: Amount,
) -> Amount {
    let stake_on_pick = stake_by_pick.get(pick).copied().unwrap_or(0);
    pool_payout(pot, stake_on_pick, wager)
}

/// Full distribution of one pot over the winning stakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDistribution {
    pub payouts: Vec<(OwnerId, Amount)>,
    /// Truncation remainder: `pot - sum(payouts)`. Where it goes (fee,
    /// carryover, first winner) is the settlement caller's decision; the
    /// calculator only reports it.
    pub residual: Amount,
}

/// Distribute `pot` proportionally over `winning_stakes`. Deterministic for a
/// given input order; truncating division, residual reported separately.
pub fn distribute_pool(pot: Amount, winning_stakes: &[(OwnerId, Amount)]) -> PoolDistribution {
    let stake_on_pick: u128 = winning_stakes.iter().map(|(_, s)| *s as u128).sum();
    if pot == 0 || stake_on_pick == 0 {
        return PoolDistribution {
            payouts: Vec::new(),
            residual: pot,
        };
    }
    let stake_on_pick = stake_on_pick.min(u64::MAX as u128) as Amount;

    let mut payouts = Vec::with_capacity(winning_stakes.len());
    let mut paid: u128 = 0;
    for (owner, wager) in winning_stakes {
        let payout = pool_payout(pot, stake_on_pick, *wager);
        paid += payout as u128;
        payouts.push((owner.clone(), payout));
    }

    PoolDistribution {
        payouts,
        residual: (pot as u128 - paid) as Amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pot_redistributed_proportionally() {
        // pot = 10; A staked 4 and B staked 6 on the winning pick.
        let stakes = vec![(OwnerId::from("a"), 4), (OwnerId::from("b"), 6)];
        let dist = distribute_pool(10, &stakes);
        assert_eq!(dist.payouts, vec![(OwnerId::from("a"), 4), (OwnerId::from("b"), 6)]);
        assert_eq!(dist.residual, 0);
    }

    #[test]
    fn test_payout_capped_at_pot() {
        assert_eq!(pool_payout(10, 3, 7), 10);
    }

    #[test]
    fn test_empty_pot_and_unbacked_pick_pay_zero() {
        assert_eq!(pool_payout(0, 5, 5), 0);
        assert_eq!(pool_payout(10, 0, 5), 0);

        let by_pick = HashMap::from([("alpha".to_string(), 10u64)]);
        assert_eq!(payout_for_pick(10, &by_pick, "beta", 5), 0);
    }

    #[test]
    fn test_truncation_residual_reported() {
        // pot 10 over stakes 3/3/3: each gets floor(3 * 10 / 9) = 3, residual 1.
        let stakes = vec![
            (OwnerId::from("a"), 3),
            (OwnerId::from("b"), 3),
            (OwnerId::from("c"), 3),
        ];
        let dist = distribute_pool(10, &stakes);
        assert!(dist.payouts.iter().all(|(_, p)| *p == 3));
        assert_eq!(dist.residual, 1);
    }

    #[test]
    fn test_deterministic_for_same_input() {
        let stakes = vec![(OwnerId::from("a"), 17), (OwnerId::from("b"), 83)];
        assert_eq!(distribute_pool(1_000, &stakes), distribute_pool(1_000, &stakes));
    }
}
