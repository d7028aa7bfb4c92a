//! Per-(owner, token) balance store and per-bet stake registry.
//!
//! The ledger is the only place funds live. Available balance only increases
//! via deposit or settlement credit and only decreases via withdraw or lock;
//! locked balance is released exclusively by settlement. Every mutating entry
//! point takes the state write lock once, validates fully, then applies, so
//! operations are serial per ledger and all-or-nothing.

use crate::errors::EscrowError;
use crate::token::Amount;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Authenticated account identity (wallet address or session id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 32-byte bet fingerprint, derived deterministically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BetId(pub [u8; 32]);

impl BetId {
    /// Derive a bet id from market, round and position.
    pub fn derive(market: &str, round: u64, position: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(market.as_bytes());
        hasher.update(b":");
        hasher.update(round.to_be_bytes());
        hasher.update(b":");
        hasher.update(position.as_bytes());
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Balance record for one (owner, token) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Amount,
    pub locked: Amount,
}

/// Stake registry entry for one bet id. `settled` flips exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecord {
    pub token: String,
    pub total_staked: Amount,
    pub settled: bool,
    pub stakes: HashMap<OwnerId, Amount>,
}

/// Read-only balance projection polled by the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub owner: OwnerId,
    pub token: String,
    pub available: Amount,
    pub locked: Amount,
}

/// Net settlement outcome for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetOutcome {
    Win,
    Lose,
}

/// One participant's line in a net settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetSettlement {
    pub owner: OwnerId,
    pub net: Amount,
    pub outcome: NetOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AccountKey {
    owner: OwnerId,
    token: String,
}

impl AccountKey {
    fn new(owner: &OwnerId, token: &str) -> Self {
        Self {
            owner: owner.clone(),
            token: token.to_string(),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<AccountKey, Balance>,
    bets: HashMap<BetId, BetRecord>,
}

fn balance_mut<'a>(
    balances: &'a mut HashMap<AccountKey, Balance>,
    owner: &OwnerId,
    token: &str,
) -> &'a mut Balance {
    balances.entry(AccountKey::new(owner, token)).or_default()
}

/// Verify that crediting `amount` of available balance to `owner` cannot
/// overflow, tracking earlier planned credits in the same settlement.
fn plan_credit(
    balances: &HashMap<AccountKey, Balance>,
    projected: &mut HashMap<AccountKey, u128>,
    owner: &OwnerId,
    token: &str,
    amount: Amount,
) -> Result<(), EscrowError> {
    let key = AccountKey::new(owner, token);
    let entry = projected
        .entry(key.clone())
        .or_insert_with(|| balances.get(&key).map(|b| b.available as u128).unwrap_or(0));
    *entry += amount as u128;
    if *entry > u64::MAX as u128 {
        return Err(EscrowError::AmountOverflow);
    }
    Ok(())
}

/// The fund-custody ledger. Owned exclusively by the escrow/round-engine
/// process; clients only ever see projections.
pub struct Ledger {
    inner: RwLock<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerState::default()),
        }
    }

    pub fn available_balance(&self, owner: &OwnerId, token: &str) -> Amount {
        let state = self.inner.read().unwrap();
        state
            .balances
            .get(&AccountKey::new(owner, token))
            .map(|b| b.available)
            .unwrap_or(0)
    }

    pub fn locked_balance(&self, owner: &OwnerId, token: &str) -> Amount {
        let state = self.inner.read().unwrap();
        state
            .balances
            .get(&AccountKey::new(owner, token))
            .map(|b| b.locked)
            .unwrap_or(0)
    }

    pub fn account_view(&self, owner: &OwnerId, token: &str) -> AccountView {
        let state = self.inner.read().unwrap();
        let balance = state
            .balances
            .get(&AccountKey::new(owner, token))
            .copied()
            .unwrap_or_default();
        AccountView {
            owner: owner.clone(),
            token: token.to_string(),
            available: balance.available,
            locked: balance.locked,
        }
    }

    /// Snapshot of a bet record, if it exists.
    pub fn bet(&self, bet_id: &BetId) -> Option<BetRecord> {
        let state = self.inner.read().unwrap();
        state.bets.get(bet_id).cloned()
    }

    /// Total value in custody for one token, across all owners.
    /// Audit helper: deposits minus withdrawals must equal this at all times.
    pub fn total_in_custody(&self, token: &str) -> u128 {
        let state = self.inner.read().unwrap();
        state
            .balances
            .iter()
            .filter(|(key, _)| key.token == token)
            .map(|(_, b)| b.available as u128 + b.locked as u128)
            .sum()
    }

    /// Credit available balance. Called by escrow after an external pull.
    pub(crate) fn credit_available(
        &self,
        owner: &OwnerId,
        token: &str,
        amount: Amount,
    ) -> Result<(), EscrowError> {
        let mut state = self.inner.write().unwrap();
        let balance = balance_mut(&mut state.balances, owner, token);
        balance.available = balance
            .available
            .checked_add(amount)
            .ok_or(EscrowError::AmountOverflow)?;
        Ok(())
    }

    /// Debit available balance. Called by escrow before an external push.
    pub(crate) fn debit_available(
        &self,
        owner: &OwnerId,
        token: &str,
        amount: Amount,
    ) -> Result<(), EscrowError> {
        let mut state = self.inner.write().unwrap();
        let balance = balance_mut(&mut state.balances, owner, token);
        if balance.available < amount {
            return Err(EscrowError::InsufficientBalance {
                needed: amount,
                available: balance.available,
            });
        }
        balance.available -= amount;
        Ok(())
    }

    /// Move `amount` from available to locked and register the stake.
    ///
    /// The first lock against a fresh bet id creates the record and binds its
    /// token; later locks must use the same token. A settled bet id is dead
    /// forever and rejects further locks.
    pub(crate) fn lock_for_bet(
        &self,
        bet_id: &BetId,
        owner: &OwnerId,
        token: &str,
        amount: Amount,
    ) -> Result<(), EscrowError> {
        let mut state = self.inner.write().unwrap();

        if let Some(bet) = state.bets.get(bet_id) {
            if bet.settled {
                return Err(EscrowError::BetAlreadySettled(bet_id.to_string()));
            }
            if bet.token != token {
                return Err(EscrowError::BetTokenMismatch {
                    bet_id: bet_id.to_string(),
                    expected: bet.token.clone(),
                    got: token.to_string(),
                });
            }
            bet.total_staked
                .checked_add(amount)
                .ok_or(EscrowError::AmountOverflow)?;
        }

        {
            let balance = state
                .balances
                .get(&AccountKey::new(owner, token))
                .copied()
                .unwrap_or_default();
            if balance.available < amount {
                return Err(EscrowError::InsufficientBalance {
                    needed: amount,
                    available: balance.available,
                });
            }
            balance
                .locked
                .checked_add(amount)
                .ok_or(EscrowError::AmountOverflow)?;
        }

        let balance = balance_mut(&mut state.balances, owner, token);
        balance.available -= amount;
        balance.locked += amount;

        let bet = state.bets.entry(*bet_id).or_insert_with(|| BetRecord {
            token: token.to_string(),
            total_staked: 0,
            settled: false,
            stakes: HashMap::new(),
        });
        bet.total_staked += amount;
        *bet.stakes.entry(owner.clone()).or_insert(0) += amount;

        Ok(())
    }

    /// Pool settlement (pari-mutuel): release every locked stake into the
    /// pot, then credit payouts, fee and carryover. Requires exact
    /// reconciliation `sum(payouts) + fee + carryover == total_staked`.
    pub(crate) fn settle_pool(
        &self,
        bet_id: &BetId,
        payouts: &[(OwnerId, Amount)],
        fee: Amount,
        carryover: Amount,
        fee_pool: &OwnerId,
        treasury: &OwnerId,
    ) -> Result<(), EscrowError> {
        let mut state = self.inner.write().unwrap();

        let (token, total_staked, stakes) = {
            let bet = state
                .bets
                .get(bet_id)
                .ok_or_else(|| EscrowError::UnknownBet(bet_id.to_string()))?;
            if bet.settled {
                return Err(EscrowError::BetAlreadySettled(bet_id.to_string()));
            }
            (bet.token.clone(), bet.total_staked, bet.stakes.clone())
        };

        let mut payout_sum: u128 = 0;
        let mut seen = HashSet::new();
        for (owner, payout) in payouts {
            if !seen.insert(owner) {
                return Err(EscrowError::InvalidSettlement(format!(
                    "duplicate participant {}",
                    owner
                )));
            }
            if !stakes.contains_key(owner) {
                return Err(EscrowError::MissingStake(owner.to_string()));
            }
            payout_sum += *payout as u128;
        }

        let credited = payout_sum + fee as u128 + carryover as u128;
        if credited != total_staked as u128 {
            return Err(EscrowError::InvalidSettlement(format!(
                "payouts {} + fee {} + carryover {} != total staked {}",
                payout_sum, fee, carryover, total_staked
            )));
        }

        for (owner, stake) in &stakes {
            let locked = state
                .balances
                .get(&AccountKey::new(owner, &token))
                .map(|b| b.locked)
                .unwrap_or(0);
            if locked < *stake {
                return Err(EscrowError::InvalidSettlement(format!(
                    "stake of {} exceeds locked balance for {}",
                    stake, owner
                )));
            }
        }

        let mut projected = HashMap::new();
        for (owner, payout) in payouts {
            plan_credit(&state.balances, &mut projected, owner, &token, *payout)?;
        }
        plan_credit(&state.balances, &mut projected, fee_pool, &token, fee)?;
        plan_credit(&state.balances, &mut projected, treasury, &token, carryover)?;

        // Validation complete; apply. Nothing below can fail.
        for (owner, stake) in &stakes {
            balance_mut(&mut state.balances, owner, &token).locked -= *stake;
        }
        for (owner, payout) in payouts {
            balance_mut(&mut state.balances, owner, &token).available += *payout;
        }
        balance_mut(&mut state.balances, fee_pool, &token).available += fee;
        balance_mut(&mut state.balances, treasury, &token).available += carryover;
        state.bets.get_mut(bet_id).unwrap().settled = true;

        Ok(())
    }

    /// Net settlement (head-to-head / table games): every stake is returned to
    /// available first; winners then receive their net from the treasury,
    /// losers forfeit their net (at most their stake) to it. Every staker of
    /// the bet must be covered exactly once so that no funds stay locked.
    pub(crate) fn settle_net(
        &self,
        bet_id: &BetId,
        entries: &[NetSettlement],
        treasury: &OwnerId,
    ) -> Result<(), EscrowError> {
        let mut state = self.inner.write().unwrap();

        let (token, stakes) = {
            let bet = state
                .bets
                .get(bet_id)
                .ok_or_else(|| EscrowError::UnknownBet(bet_id.to_string()))?;
            if bet.settled {
                return Err(EscrowError::BetAlreadySettled(bet_id.to_string()));
            }
            (bet.token.clone(), bet.stakes.clone())
        };

        let mut covered = HashSet::new();
        let mut win_total: u128 = 0;
        let mut lose_total: u128 = 0;
        for entry in entries {
            if !covered.insert(&entry.owner) {
                return Err(EscrowError::InvalidSettlement(format!(
                    "duplicate participant {}",
                    entry.owner
                )));
            }
            let stake = *stakes
                .get(&entry.owner)
                .ok_or_else(|| EscrowError::MissingStake(entry.owner.to_string()))?;
            match entry.outcome {
                NetOutcome::Win => win_total += entry.net as u128,
                NetOutcome::Lose => {
                    if entry.net > stake {
                        return Err(EscrowError::InvalidSettlement(format!(
                            "loss of {} exceeds stake of {} for {}",
                            entry.net, stake, entry.owner
                        )));
                    }
                    lose_total += entry.net as u128;
                }
            }
        }
        if covered.len() != stakes.len() {
            return Err(EscrowError::InvalidSettlement(
                "every staked participant must be settled".to_string(),
            ));
        }

        let mut projected = HashMap::new();
        for entry in entries {
            let stake = stakes[&entry.owner];
            if state
                .balances
                .get(&AccountKey::new(&entry.owner, &token))
                .map(|b| b.locked)
                .unwrap_or(0)
                < stake
            {
                return Err(EscrowError::InvalidSettlement(format!(
                    "stake of {} exceeds locked balance for {}",
                    stake, entry.owner
                )));
            }
            let credit = match entry.outcome {
                NetOutcome::Win => stake
                    .checked_add(entry.net)
                    .ok_or(EscrowError::AmountOverflow)?,
                NetOutcome::Lose => stake - entry.net,
            };
            plan_credit(&state.balances, &mut projected, &entry.owner, &token, credit)?;
        }

        // Losses collected within this settlement fund wins before the
        // treasury float is tapped; the whole move is atomic. The treasury
        // may itself hold a stake in the bet, so sufficiency is checked
        // against its projected balance, with its own stake return included.
        let treasury_key = AccountKey::new(treasury, &token);
        let treasury_projected = projected.get(&treasury_key).copied().unwrap_or_else(|| {
            state
                .balances
                .get(&treasury_key)
                .map(|b| b.available as u128)
                .unwrap_or(0)
        });
        if treasury_projected + lose_total < win_total {
            return Err(EscrowError::TreasuryInsufficient {
                needed: (win_total - lose_total) as Amount,
                available: treasury_projected as Amount,
            });
        }
        if treasury_projected + lose_total - win_total > u64::MAX as u128 {
            return Err(EscrowError::AmountOverflow);
        }

        // Validation complete; apply. The treasury delta is applied on top of
        // whatever its own settlement entry credited, never overwriting it.
        for entry in entries {
            let stake = stakes[&entry.owner];
            let balance = balance_mut(&mut state.balances, &entry.owner, &token);
            balance.locked -= stake;
            balance.available += match entry.outcome {
                NetOutcome::Win => stake + entry.net,
                NetOutcome::Lose => stake - entry.net,
            };
        }
        let treasury_balance = balance_mut(&mut state.balances, treasury, &token);
        treasury_balance.available =
            (treasury_balance.available as u128 + lose_total - win_total) as Amount;
        state.bets.get_mut(bet_id).unwrap().settled = true;

        Ok(())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "USDC";

    fn funded_ledger(owners: &[(&str, Amount)]) -> Ledger {
        let ledger = Ledger::new();
        for (owner, amount) in owners {
            ledger
                .credit_available(&OwnerId::from(*owner), TOKEN, *amount)
                .unwrap();
        }
        ledger
    }

    #[test]
    fn test_bet_id_is_deterministic_and_distinct() {
        let a = BetId::derive("crash", 7, "round");
        let b = BetId::derive("crash", 7, "round");
        let c = BetId::derive("crash", 8, "round");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_lock_moves_available_to_locked() {
        let ledger = funded_ledger(&[("alice", 100)]);
        let bet_id = BetId::derive("leaderboard", 1, "alice-top3");
        let alice = OwnerId::from("alice");

        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 40).unwrap();
        assert_eq!(ledger.available_balance(&alice, TOKEN), 60);
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 40);

        let bet = ledger.bet(&bet_id).unwrap();
        assert_eq!(bet.total_staked, 40);
        assert_eq!(bet.stakes[&alice], 40);
        assert!(!bet.settled);
    }

    #[test]
    fn test_lock_rejects_token_mismatch() {
        let ledger = funded_ledger(&[("alice", 100), ("bob", 100)]);
        ledger
            .credit_available(&OwnerId::from("bob"), "SOL", 100)
            .unwrap();
        let bet_id = BetId::derive("leaderboard", 1, "slot");

        ledger
            .lock_for_bet(&bet_id, &OwnerId::from("alice"), TOKEN, 10)
            .unwrap();
        let err = ledger
            .lock_for_bet(&bet_id, &OwnerId::from("bob"), "SOL", 10)
            .unwrap_err();
        assert!(matches!(err, EscrowError::BetTokenMismatch { .. }));
    }

    #[test]
    fn test_lock_rejects_insufficient_balance() {
        let ledger = funded_ledger(&[("alice", 5)]);
        let err = ledger
            .lock_for_bet(
                &BetId::derive("m", 1, "p"),
                &OwnerId::from("alice"),
                TOKEN,
                10,
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_pool_settlement_redistributes_exactly() {
        let ledger = funded_ledger(&[("alice", 4), ("bob", 6), ("carol", 10)]);
        let bet_id = BetId::derive("leaderboard", 2, "winner-slot");
        let (alice, bob, carol) = (
            OwnerId::from("alice"),
            OwnerId::from("bob"),
            OwnerId::from("carol"),
        );
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 4).unwrap();
        ledger.lock_for_bet(&bet_id, &bob, TOKEN, 6).unwrap();
        ledger.lock_for_bet(&bet_id, &carol, TOKEN, 10).unwrap();

        // carol loses her 10; the pot of 20 goes 8/12 to alice/bob.
        let payouts = vec![(alice.clone(), 8), (bob.clone(), 12)];
        ledger
            .settle_pool(
                &bet_id,
                &payouts,
                0,
                0,
                &OwnerId::from("fees"),
                &OwnerId::from("treasury"),
            )
            .unwrap();

        assert_eq!(ledger.available_balance(&alice, TOKEN), 8);
        assert_eq!(ledger.available_balance(&bob, TOKEN), 12);
        assert_eq!(ledger.available_balance(&carol, TOKEN), 0);
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 0);
        assert_eq!(ledger.locked_balance(&carol, TOKEN), 0);
        assert_eq!(ledger.total_in_custody(TOKEN), 20);
    }

    #[test]
    fn test_pool_settlement_rejects_bad_reconciliation() {
        let ledger = funded_ledger(&[("alice", 10)]);
        let bet_id = BetId::derive("leaderboard", 3, "slot");
        let alice = OwnerId::from("alice");
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 10).unwrap();

        let err = ledger
            .settle_pool(
                &bet_id,
                &[(alice.clone(), 9)],
                0,
                0,
                &OwnerId::from("fees"),
                &OwnerId::from("treasury"),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidSettlement(_)));

        // Nothing moved.
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 10);
        assert_eq!(ledger.available_balance(&alice, TOKEN), 0);
        assert!(!ledger.bet(&bet_id).unwrap().settled);
    }

    #[test]
    fn test_pool_settlement_rejects_unknown_participant() {
        let ledger = funded_ledger(&[("alice", 10)]);
        let bet_id = BetId::derive("leaderboard", 4, "slot");
        ledger
            .lock_for_bet(&bet_id, &OwnerId::from("alice"), TOKEN, 10)
            .unwrap();

        let err = ledger
            .settle_pool(
                &bet_id,
                &[(OwnerId::from("mallory"), 10)],
                0,
                0,
                &OwnerId::from("fees"),
                &OwnerId::from("treasury"),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::MissingStake(_)));
    }

    #[test]
    fn test_settlement_is_idempotent() {
        let ledger = funded_ledger(&[("alice", 10)]);
        let bet_id = BetId::derive("leaderboard", 5, "slot");
        let alice = OwnerId::from("alice");
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 10).unwrap();

        let payouts = vec![(alice.clone(), 10)];
        ledger
            .settle_pool(
                &bet_id,
                &payouts,
                0,
                0,
                &OwnerId::from("fees"),
                &OwnerId::from("treasury"),
            )
            .unwrap();
        let err = ledger
            .settle_pool(
                &bet_id,
                &payouts,
                0,
                0,
                &OwnerId::from("fees"),
                &OwnerId::from("treasury"),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::BetAlreadySettled(_)));
        assert_eq!(ledger.available_balance(&alice, TOKEN), 10);
    }

    #[test]
    fn test_settled_bet_id_is_never_reused() {
        let ledger = funded_ledger(&[("alice", 20)]);
        let bet_id = BetId::derive("leaderboard", 6, "slot");
        let alice = OwnerId::from("alice");
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 10).unwrap();
        ledger
            .settle_pool(
                &bet_id,
                &[(alice.clone(), 10)],
                0,
                0,
                &OwnerId::from("fees"),
                &OwnerId::from("treasury"),
            )
            .unwrap();

        let err = ledger.lock_for_bet(&bet_id, &alice, TOKEN, 5).unwrap_err();
        assert!(matches!(err, EscrowError::BetAlreadySettled(_)));
    }

    #[test]
    fn test_net_settlement_win_and_lose() {
        let ledger = funded_ledger(&[("alice", 50), ("bob", 50), ("treasury", 100)]);
        let bet_id = BetId::derive("blackjack", 1, "table-9");
        let (alice, bob, treasury) = (
            OwnerId::from("alice"),
            OwnerId::from("bob"),
            OwnerId::from("treasury"),
        );
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 20).unwrap();
        ledger.lock_for_bet(&bet_id, &bob, TOKEN, 20).unwrap();

        let entries = vec![
            NetSettlement {
                owner: alice.clone(),
                net: 30,
                outcome: NetOutcome::Win,
            },
            NetSettlement {
                owner: bob.clone(),
                net: 20,
                outcome: NetOutcome::Lose,
            },
        ];
        ledger.settle_net(&bet_id, &entries, &treasury).unwrap();

        assert_eq!(ledger.available_balance(&alice, TOKEN), 80);
        assert_eq!(ledger.available_balance(&bob, TOKEN), 30);
        assert_eq!(ledger.available_balance(&treasury, TOKEN), 90);
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 0);
        assert_eq!(ledger.total_in_custody(TOKEN), 200);
    }

    #[test]
    fn test_net_settlement_rejects_loss_above_stake() {
        let ledger = funded_ledger(&[("alice", 20), ("treasury", 0)]);
        let bet_id = BetId::derive("blackjack", 2, "table-9");
        let alice = OwnerId::from("alice");
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 20).unwrap();

        let err = ledger
            .settle_net(
                &bet_id,
                &[NetSettlement {
                    owner: alice.clone(),
                    net: 21,
                    outcome: NetOutcome::Lose,
                }],
                &OwnerId::from("treasury"),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidSettlement(_)));
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 20);
    }

    #[test]
    fn test_net_settlement_requires_full_coverage() {
        let ledger = funded_ledger(&[("alice", 20), ("bob", 20)]);
        let bet_id = BetId::derive("blackjack", 3, "table-9");
        ledger
            .lock_for_bet(&bet_id, &OwnerId::from("alice"), TOKEN, 10)
            .unwrap();
        ledger
            .lock_for_bet(&bet_id, &OwnerId::from("bob"), TOKEN, 10)
            .unwrap();

        let err = ledger
            .settle_net(
                &bet_id,
                &[NetSettlement {
                    owner: OwnerId::from("alice"),
                    net: 0,
                    outcome: NetOutcome::Win,
                }],
                &OwnerId::from("treasury"),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::InvalidSettlement(_)));
    }

    #[test]
    fn test_net_settlement_treasury_insufficient() {
        let ledger = funded_ledger(&[("alice", 20)]);
        let bet_id = BetId::derive("blackjack", 4, "table-9");
        let alice = OwnerId::from("alice");
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 20).unwrap();

        let err = ledger
            .settle_net(
                &bet_id,
                &[NetSettlement {
                    owner: alice.clone(),
                    net: 5,
                    outcome: NetOutcome::Win,
                }],
                &OwnerId::from("treasury"),
            )
            .unwrap_err();
        assert!(matches!(err, EscrowError::TreasuryInsufficient { .. }));
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 20);
    }

    #[test]
    fn test_net_settlement_with_treasury_staker_conserves_value() {
        let ledger = funded_ledger(&[("treasury", 100)]);
        let bet_id = BetId::derive("blackjack", 6, "table-9");
        let treasury = OwnerId::from("treasury");
        ledger.lock_for_bet(&bet_id, &treasury, TOKEN, 50).unwrap();

        ledger
            .settle_net(
                &bet_id,
                &[NetSettlement {
                    owner: treasury.clone(),
                    net: 20,
                    outcome: NetOutcome::Lose,
                }],
                &treasury,
            )
            .unwrap();

        // The treasury losing to itself is a wash; nothing may vanish.
        assert_eq!(ledger.available_balance(&treasury, TOKEN), 100);
        assert_eq!(ledger.locked_balance(&treasury, TOKEN), 0);
        assert_eq!(ledger.total_in_custody(TOKEN), 100);
    }

    #[test]
    fn test_net_settlement_treasury_stake_return_survives_other_entries() {
        let ledger = funded_ledger(&[("alice", 30), ("treasury", 100)]);
        let bet_id = BetId::derive("blackjack", 7, "table-9");
        let (alice, treasury) = (OwnerId::from("alice"), OwnerId::from("treasury"));
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 30).unwrap();
        ledger.lock_for_bet(&bet_id, &treasury, TOKEN, 50).unwrap();

        ledger
            .settle_net(
                &bet_id,
                &[
                    NetSettlement {
                        owner: alice.clone(),
                        net: 20,
                        outcome: NetOutcome::Win,
                    },
                    NetSettlement {
                        owner: treasury.clone(),
                        net: 20,
                        outcome: NetOutcome::Lose,
                    },
                ],
                &treasury,
            )
            .unwrap();

        // alice: 30 stake back + 20 net. treasury: 50 stake - 20 loss back,
        // plus the loss collected, minus the win funded.
        assert_eq!(ledger.available_balance(&alice, TOKEN), 50);
        assert_eq!(ledger.available_balance(&treasury, TOKEN), 80);
        assert_eq!(ledger.locked_balance(&treasury, TOKEN), 0);
        assert_eq!(ledger.total_in_custody(TOKEN), 130);
    }

    #[test]
    fn test_full_refund_restores_pre_lock_balance() {
        let ledger = funded_ledger(&[("alice", 73)]);
        let bet_id = BetId::derive("blackjack", 5, "table-9");
        let alice = OwnerId::from("alice");
        ledger.lock_for_bet(&bet_id, &alice, TOKEN, 73).unwrap();

        ledger
            .settle_net(
                &bet_id,
                &[NetSettlement {
                    owner: alice.clone(),
                    net: 0,
                    outcome: NetOutcome::Win,
                }],
                &OwnerId::from("treasury"),
            )
            .unwrap();
        assert_eq!(ledger.available_balance(&alice, TOKEN), 73);
        assert_eq!(ledger.locked_balance(&alice, TOKEN), 0);
    }
}
