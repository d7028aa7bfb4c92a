//! Crash round simulator: runs a few live rounds against the real engine
//! with simulated players, printing the event stream. Useful for eyeballing
//! round pacing and settlement without any transport layer.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use wagervault::crash::MULTIPLIER_SCALE;
use wagervault::{
    CrashConfig, CrashEngine, EscrowConfig, EscrowService, EventHub, NoopTransfer, OwnerId,
    RoundEvent, VaultConfig,
};

const ROUNDS: u64 = 3;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = VaultConfig {
        crash: CrashConfig {
            betting_window_ms: 2_000,
            cooldown_ms: 1_000,
            tick_interval_ms: 500,
            // 5x per second keeps even high crash points under ten seconds.
            growth_x10000_per_sec: 50_000,
            ..CrashConfig::default()
        },
        escrow: EscrowConfig::default(),
    };
    config.validate().expect("config");
    let token = config.crash.token.symbol.clone();

    let escrow = Arc::new(EscrowService::new(
        config.escrow.clone(),
        Arc::new(NoopTransfer),
    ));
    let players = vec![OwnerId::from("alice"), OwnerId::from("bob")];
    let treasury = escrow.treasury().clone();
    escrow.deposit(&treasury, &token, 10_000_000).await.unwrap();
    for player in &players {
        escrow.deposit(player, &token, 10_000).await.unwrap();
    }

    let hub = Arc::new(EventHub::new(1024));
    let engine = CrashEngine::spawn(config.crash.clone(), escrow.clone(), hub.clone());

    let mut rx = hub.subscribe();
    let mut crashes = 0u64;
    while crashes < ROUNDS {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            RoundEvent::RoundOpened { round_id, .. } => {
                for player in &players {
                    let engine = engine.clone();
                    let player = player.clone();
                    let stake = rand::thread_rng().gen_range(100..=500);
                    let hold_ms = rand::thread_rng().gen_range(0..3_000);
                    tokio::spawn(async move {
                        if engine.place_bet(player.clone(), round_id, stake).await.is_ok() {
                            tokio::time::sleep(Duration::from_millis(
                                2_000 + hold_ms,
                            ))
                            .await;
                            match engine.cashout(player.clone(), round_id).await {
                                Ok(receipt) => tracing::info!(
                                    %player,
                                    multiplier = receipt.multiplier_x10000 as f64
                                        / MULTIPLIER_SCALE as f64,
                                    payout = receipt.payout,
                                    "cashed out"
                                ),
                                Err(e) => tracing::info!(%player, error = %e, "cashout lost"),
                            }
                        }
                    });
                }
            }
            RoundEvent::RoundCrashed {
                round_id,
                crash_x10000,
                ..
            } => {
                crashes += 1;
                tracing::info!(
                    round_id,
                    crash = crash_x10000 as f64 / MULTIPLIER_SCALE as f64,
                    "round crashed"
                );
            }
            RoundEvent::Tick {
                multiplier_x10000, ..
            } => {
                tracing::debug!(
                    multiplier = multiplier_x10000 as f64 / MULTIPLIER_SCALE as f64,
                    "tick"
                );
            }
            _ => {}
        }
    }

    engine.shutdown().await;
    for player in &players {
        let view = escrow.account_view(player, &token);
        tracing::info!(%player, available = view.available, locked = view.locked, "final balance");
    }
    let treasury_view = escrow.account_view(&treasury, &token);
    tracing::info!(available = treasury_view.available, "treasury");
}
