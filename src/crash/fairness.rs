//! Commit-reveal fairness for crash rounds.
//!
//! The server seed is chosen once, before the commit hash is published, and
//! revealed at crash time. Anyone holding `{server_seed, round_id}` can
//! re-derive the crash point from scratch and check it against the commit.
//! All derivation runs on integers; nothing here touches floating point.

use crate::crash::types::MULTIPLIER_SCALE;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fresh 32-byte server seed from the OS entropy source.
pub fn generate_server_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Commit published at round open: `H(server_seed)`.
pub fn commit_hash(server_seed: &[u8; 32]) -> [u8; 32] {
    Sha256::digest(server_seed).into()
}

/// Per-round derivation hash: `H(server_seed || round_id_be)`.
pub fn derived_hash(server_seed: &[u8; 32], round_id: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.update(round_id.to_be_bytes());
    hasher.finalize().into()
}

/// First 8 bytes of the derivation hash, big-endian. The uniform draw is
/// `u = (u_numerator + 1) / 2^64`, so u lies in (0, 1] and the division
/// below can never hit zero.
pub fn u_numerator(derived: &[u8; 32]) -> u64 {
    u64::from_be_bytes(derived[..8].try_into().unwrap())
}

/// Crash point for a round, x10000 fixed point.
///
/// `crash = (1 - edge) / u`, clamped to `[1.0, max]`. Computed once at round
/// freeze and never recomputed.
pub fn crash_point_x10000(
    server_seed: &[u8; 32],
    round_id: u64,
    edge_bps: u32,
    max_x10000: u64,
) -> u64 {
    let u_num = u_numerator(&derived_hash(server_seed, round_id)) as u128 + 1;
    let numer = ((MULTIPLIER_SCALE - edge_bps as u64) as u128) << 64;
    let raw = numer / u_num;
    raw.clamp(MULTIPLIER_SCALE as u128, max_x10000 as u128) as u64
}

/// Live multiplier after `elapsed_ms` of running time, x10000 fixed point.
///
/// Pure in elapsed time: monotone, continuous, and idempotent to recompute,
/// so any observer can derive it without server-side tick state.
pub fn multiplier_x10000(elapsed_ms: u64, growth_x10000_per_sec: u64) -> u64 {
    let gained = elapsed_ms as u128 * growth_x10000_per_sec as u128 / 1_000;
    (MULTIPLIER_SCALE as u128)
        .saturating_add(gained)
        .min(u64::MAX as u128) as u64
}

/// Smallest elapsed time at which the live multiplier reaches `target`.
/// This is the authoritative crash instant for `target = crash point`.
pub fn ms_to_reach(target_x10000: u64, growth_x10000_per_sec: u64) -> u64 {
    let gain = (target_x10000.saturating_sub(MULTIPLIER_SCALE)) as u128;
    let growth = growth_x10000_per_sec.max(1) as u128;
    ((gain * 1_000 + growth - 1) / growth).min(u64::MAX as u128) as u64
}

/// Everything published at crash time for independent verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReveal {
    pub round_id: u64,
    pub server_seed: String,
    pub derived_hash: String,
    pub u_numerator: u64,
    pub crash_x10000: u64,
}

impl RoundReveal {
    pub fn new(server_seed: &[u8; 32], round_id: u64, crash_x10000: u64) -> Self {
        let derived = derived_hash(server_seed, round_id);
        Self {
            round_id,
            server_seed: hex::encode(server_seed),
            derived_hash: hex::encode(derived),
            u_numerator: u_numerator(&derived),
            crash_x10000,
        }
    }
}

/// Re-derive a round's crash point from a revealed seed and check it against
/// the published commit and crash point.
pub fn verify_round(
    server_seed: &[u8; 32],
    round_id: u64,
    expected_commit: &[u8; 32],
    expected_crash_x10000: u64,
    edge_bps: u32,
    max_x10000: u64,
) -> bool {
    commit_hash(server_seed) == *expected_commit
        && crash_point_x10000(server_seed, round_id, edge_bps, max_x10000)
            == expected_crash_x10000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_is_reproducible() {
        let seed = generate_server_seed();
        let commit = commit_hash(&seed);
        let crash = crash_point_x10000(&seed, 42, 200, 500_000);

        assert!(verify_round(&seed, 42, &commit, crash, 200, 500_000));
    }

    #[test]
    fn test_verification_rejects_wrong_seed() {
        let seed = generate_server_seed();
        let commit = commit_hash(&seed);
        let crash = crash_point_x10000(&seed, 1, 200, 500_000);

        let mut other = seed;
        other[0] ^= 0xff;
        assert!(!verify_round(&other, 1, &commit, crash, 200, 500_000));
    }

    #[test]
    fn test_crash_point_clamped() {
        // Whatever the draw, the crash point must stay inside the clamp
        // window; draws above (1 - edge) clamp to the 1.0x floor.
        let seed = [0xffu8; 32];
        for round_id in 0..64 {
            let crash = crash_point_x10000(&seed, round_id, 200, 500_000);
            assert!((MULTIPLIER_SCALE..=500_000).contains(&crash));
        }
    }

    #[test]
    fn test_distinct_rounds_get_distinct_draws() {
        let seed = generate_server_seed();
        let a = derived_hash(&seed, 1);
        let b = derived_hash(&seed, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_multiplier_is_monotone_from_one() {
        assert_eq!(multiplier_x10000(0, 5_000), MULTIPLIER_SCALE);
        let mut last = 0;
        for t in [1, 10, 100, 1_000, 10_000, 100_000] {
            let m = multiplier_x10000(t, 5_000);
            assert!(m > last);
            last = m;
        }
        // +0.5x per second.
        assert_eq!(multiplier_x10000(2_000, 5_000), 20_000);
    }

    #[test]
    fn test_ms_to_reach_is_exact_inverse_bound() {
        for target in [10_000u64, 10_001, 15_000, 123_456, 500_000] {
            let t = ms_to_reach(target, 5_000);
            assert!(multiplier_x10000(t, 5_000) >= target);
            if t > 0 {
                assert!(multiplier_x10000(t - 1, 5_000) < target);
            }
        }
    }
}
