//! Round event broadcast hub.
//!
//! The transport layer (HTTP polling, WebSockets, whatever) subscribes here;
//! the round engine is the only publisher. Events are fire-and-forget for the
//! engine, but `wait_for_crash` gives callers at-least-once delivery of the
//! crash-reveal event for a specific round.

use crate::ledger::OwnerId;
use crate::token::Amount;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

/// Everything observers can see about a round, in published order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    RoundOpened {
        round_id: u64,
        commit_hash: String,
        betting_closes_at: u64,
    },
    RoundRunning {
        round_id: u64,
        running_started_at: u64,
    },
    Tick {
        round_id: u64,
        multiplier_x10000: u64,
    },
    BetPlaced {
        round_id: u64,
        owner: OwnerId,
        stake: Amount,
    },
    CashedOut {
        round_id: u64,
        owner: OwnerId,
        multiplier_x10000: u64,
        payout: Amount,
    },
    RoundCrashed {
        round_id: u64,
        server_seed: String,
        derived_hash: String,
        u_numerator: u64,
        crash_x10000: u64,
    },
    CooldownEnded {
        round_id: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("crash event for round {round_id} not seen within {timeout_ms}ms")]
    Timeout { round_id: u64, timeout_ms: u64 },

    #[error("event hub closed")]
    Closed,
}

/// Broadcast hub for round events.
pub struct EventHub {
    tx: broadcast::Sender<RoundEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers. A hub with no subscribers
    /// drops the event silently; the engine does not care.
    pub fn publish(&self, event: RoundEvent) {
        let _ = self.tx.send(event);
    }

    /// Wait until the crash-reveal event for `round_id` is published.
    ///
    /// The subscription is taken at call time, so any reveal published after
    /// this returns its future is never missed; a lagged receiver keeps
    /// draining rather than giving up, since reveal events are sparse.
    pub fn wait_for_crash(
        &self,
        round_id: u64,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<RoundEvent, WaitError>> + Send {
        let mut rx = self.subscribe();
        async move {
            let wait = async {
                loop {
                    match rx.recv().await {
                        Ok(event @ RoundEvent::RoundCrashed { round_id: r, .. })
                            if r == round_id =>
                        {
                            return Ok(event);
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(round_id, skipped, "crash waiter lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return Err(WaitError::Closed),
                    }
                }
            };

            match tokio::time::timeout(timeout, wait).await {
                Ok(result) => result,
                Err(_) => Err(WaitError::Timeout {
                    round_id,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}
