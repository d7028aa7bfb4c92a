//! Escrow operations: the only mutators of the ledger.
//!
//! Deposits and withdrawals touch an external token transfer backend; the
//! internal ledger is always fully updated before any external call, and a
//! failed push is compensated explicitly. Settlement is restricted to the
//! configured operator and reconciles exactly or not at all.

use crate::config::EscrowConfig;
use crate::errors::EscrowError;
use crate::ledger::{AccountView, BetId, BetRecord, Ledger, NetSettlement, OwnerId};
use crate::token::{Amount, Token};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Failure reported by the external transfer backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransferError(pub String);

/// External token transfer collaborator (chain RPC, custodial bridge, ...).
///
/// `pull` draws funds from the owner into custody, `push` pays funds out.
/// Implementations must settle synchronously from the caller's point of
/// view: a returned `Ok` means the transfer happened.
#[async_trait]
pub trait TokenTransfer: Send + Sync {
    async fn pull(&self, owner: &OwnerId, token: &Token, amount: Amount)
        -> Result<(), TransferError>;
    async fn push(&self, owner: &OwnerId, token: &Token, amount: Amount)
        -> Result<(), TransferError>;
}

/// Transfer backend that always succeeds. Used by the simulator and tests.
pub struct NoopTransfer;

#[async_trait]
impl TokenTransfer for NoopTransfer {
    async fn pull(
        &self,
        _owner: &OwnerId,
        _token: &Token,
        _amount: Amount,
    ) -> Result<(), TransferError> {
        Ok(())
    }

    async fn push(
        &self,
        _owner: &OwnerId,
        _token: &Token,
        _amount: Amount,
    ) -> Result<(), TransferError> {
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct InFlightKey {
    owner: OwnerId,
    token: String,
}

/// Removes the in-flight marker when the operation ends, success or not.
struct InFlightGuard<'a> {
    map: &'a DashMap<InFlightKey, ()>,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// The escrow service: deposit, withdraw, lock-for-bet and settle.
pub struct EscrowService {
    ledger: Arc<Ledger>,
    config: EscrowConfig,
    transfer: Arc<dyn TokenTransfer>,
    in_flight: DashMap<InFlightKey, ()>,
}

impl EscrowService {
    pub fn new(config: EscrowConfig, transfer: Arc<dyn TokenTransfer>) -> Self {
        Self {
            ledger: Arc::new(Ledger::new()),
            config,
            transfer,
            in_flight: DashMap::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn operator(&self) -> &OwnerId {
        &self.config.operator
    }

    pub fn treasury(&self) -> &OwnerId {
        &self.config.treasury
    }

    fn token(&self, symbol: &str) -> Result<Token, EscrowError> {
        self.config
            .supported_tokens
            .iter()
            .find(|t| t.symbol == symbol)
            .cloned()
            .ok_or_else(|| EscrowError::UnsupportedToken(symbol.to_string()))
    }

    fn begin_transfer(&self, owner: &OwnerId, token: &str) -> Result<InFlightGuard<'_>, EscrowError> {
        use dashmap::mapref::entry::Entry;
        let key = InFlightKey {
            owner: owner.clone(),
            token: token.to_string(),
        };
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => Err(EscrowError::ReentrancyRejected),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlightGuard {
                    map: &self.in_flight,
                    key,
                })
            }
        }
    }

    /// Pull `amount` of `token` from the owner and credit their available
    /// balance. The external pull happens first: if it fails, the ledger is
    /// untouched and the operation aborts as a whole.
    pub async fn deposit(
        &self,
        owner: &OwnerId,
        token: &str,
        amount: Amount,
    ) -> Result<(), EscrowError> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let token_info = self.token(token)?;
        let _guard = self.begin_transfer(owner, token)?;

        self.transfer
            .pull(owner, &token_info, amount)
            .await
            .map_err(|e| EscrowError::TransferFailed(e.to_string()))?;

        self.ledger.credit_available(owner, token, amount)?;
        tracing::info!(%owner, token, amount, "deposit credited");
        Ok(())
    }

    /// Debit the owner's available balance, then push the funds out. A failed
    /// push re-credits the debit (explicit compensation) and surfaces the
    /// transfer failure.
    pub async fn withdraw(
        &self,
        owner: &OwnerId,
        token: &str,
        amount: Amount,
    ) -> Result<(), EscrowError> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let token_info = self.token(token)?;
        let _guard = self.begin_transfer(owner, token)?;

        self.ledger.debit_available(owner, token, amount)?;

        if let Err(e) = self.transfer.push(owner, &token_info, amount).await {
            if let Err(credit_err) = self.ledger.credit_available(owner, token, amount) {
                tracing::error!(
                    %owner, token, amount, error = %credit_err,
                    "compensating credit failed; withdrawn debit not restored"
                );
                return Err(EscrowError::TransferFailed(format!(
                    "{}; compensating credit failed: {}",
                    e, credit_err
                )));
            }
            tracing::warn!(%owner, token, amount, error = %e, "withdraw push failed, debit compensated");
            return Err(EscrowError::TransferFailed(e.to_string()));
        }

        tracing::info!(%owner, token, amount, "withdraw pushed");
        Ok(())
    }

    /// Move `amount` from the owner's available balance into the bet's locked
    /// stake. Purely internal; no external transfer is involved.
    pub fn lock_for_bet(
        &self,
        bet_id: &BetId,
        owner: &OwnerId,
        token: &str,
        amount: Amount,
    ) -> Result<(), EscrowError> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        self.token(token)?;
        self.ledger.lock_for_bet(bet_id, owner, token, amount)?;
        tracing::debug!(%owner, %bet_id, token, amount, "stake locked");
        Ok(())
    }

    /// Pool settlement, operator only. `sum(payouts) + fee + carryover` must
    /// equal the bet's total stake exactly.
    pub fn settle_pool(
        &self,
        actor: &OwnerId,
        bet_id: &BetId,
        payouts: &[(OwnerId, Amount)],
        fee: Amount,
        carryover: Amount,
    ) -> Result<(), EscrowError> {
        self.authorize(actor)?;
        self.ledger.settle_pool(
            bet_id,
            payouts,
            fee,
            carryover,
            &self.config.fee_pool,
            &self.config.treasury,
        )?;
        tracing::info!(%bet_id, participants = payouts.len(), fee, carryover, "pool settled");
        Ok(())
    }

    /// Net settlement, operator only. Every staker of the bet must be covered.
    pub fn settle_net(
        &self,
        actor: &OwnerId,
        bet_id: &BetId,
        entries: &[NetSettlement],
    ) -> Result<(), EscrowError> {
        self.authorize(actor)?;
        self.ledger
            .settle_net(bet_id, entries, &self.config.treasury)?;
        tracing::info!(%bet_id, participants = entries.len(), "net settled");
        Ok(())
    }

    fn authorize(&self, actor: &OwnerId) -> Result<(), EscrowError> {
        if actor != &self.config.operator {
            tracing::warn!(%actor, "settlement attempt by non-operator");
            return Err(EscrowError::Unauthorized);
        }
        Ok(())
    }

    pub fn available_balance(&self, owner: &OwnerId, token: &str) -> Amount {
        self.ledger.available_balance(owner, token)
    }

    pub fn locked_balance(&self, owner: &OwnerId, token: &str) -> Amount {
        self.ledger.locked_balance(owner, token)
    }

    pub fn account_view(&self, owner: &OwnerId, token: &str) -> AccountView {
        self.ledger.account_view(owner, token)
    }

    pub fn bet(&self, bet_id: &BetId) -> Option<BetRecord> {
        self.ledger.bet(bet_id)
    }
}
