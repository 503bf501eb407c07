//! Deterministic random number generation for simulated delivery.
//!
//! RULE: Nothing in the engine consumes randomness. Only the in-process
//! bus does, to drop messages reproducibly when simulating a lossy link.
//!
//! Each link gets its own stream seeded from (master_seed XOR index),
//! so attaching another endpoint never changes existing links' streams.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct DeliveryRng {
    inner: Pcg64Mcg,
}

impl DeliveryRng {
    /// Create a link RNG from the master seed and a stable link index.
    pub fn new(master_seed: u64, link_index: u64) -> Self {
        let derived_seed = master_seed ^ (link_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}
