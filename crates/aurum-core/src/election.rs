// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - PROPOSER ELECTION
//
// Stake-weighted random choice among active validators. The RNG is ChaCha20
// seeded from the previous block's header hash, so every node derives the
// same proposer for height h+1 before it is produced. A per-call OS-seeded
// PRNG here would fork the network.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::Validator;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Elect the proposer for the block following the block whose header hash is
/// `parent_hash`. Returns None when no validator is active.
///
/// A point is drawn in [0, Σ stake); the winner is the first validator in
/// address order whose cumulative stake crosses the point, so selection
/// probability is proportional to stake.
pub fn elect_proposer(
    validators: &BTreeMap<String, Validator>,
    parent_hash: &str,
) -> Option<String> {
    let total_stake: u128 = validators
        .values()
        .filter(|v| v.active)
        .map(|v| v.stake as u128)
        .sum();
    if total_stake == 0 {
        return None;
    }

    let seed: [u8; 32] = Sha256::digest(parent_hash.as_bytes()).into();
    let mut rng = ChaCha20Rng::from_seed(seed);
    let point = rng.gen_range(0..total_stake);

    // BTreeMap iterates in address order, deterministic across nodes
    let mut cumulative: u128 = 0;
    for validator in validators.values().filter(|v| v.active) {
        cumulative += validator.stake as u128;
        if point < cumulative {
            return Some(validator.address.clone());
        }
    }
    None
}
