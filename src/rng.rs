//! Seedable random source used by every stage of the generator.
//!
//! All randomness flows through a single [`RandomSource`]; identical seed and
//! inputs reproduce the output bit-for-bit. Draw order is part of the
//! contract: inserting a draw in an early stage reshuffles everything after
//! it, which the pinned-seed scenario tests are designed to catch.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub trait RandomSource {
    fn set_seed(&mut self, seed: u64);
    fn seed(&self) -> u64;

    /// Uniform draw in `[0, max]` (inclusive).
    fn gen(&mut self, max: u64) -> u64;

    /// Uniform draw in `[0, max]` for small ranges. Separate entry point so
    /// cheap rolls (coin flips, variant picks) are visible at call sites.
    fn gen_small(&mut self, max: u8) -> u8;

    fn gen_sequence(&mut self, size: usize, max: u64) -> Vec<u64> {
        (0..size).map(|_| self.gen(max)).collect()
    }

    fn gen_min_max(&mut self, min: u64, max: u64) -> u64 {
        debug_assert!(min <= max);
        min + self.gen(max - min)
    }

    /// Draw around an average: `avg - dispersion + gen(dispersion * 2)`.
    fn gen_dispersed(&mut self, avg: i64, dispersion: u64) -> i64 {
        if dispersion == 0 {
            return avg;
        }
        avg - dispersion as i64 + self.gen(dispersion * 2) as i64
    }
}

/// ChaCha-backed implementation. The stream cipher core gives identical
/// sequences on every platform for the same 64-bit seed.
pub struct ChaChaSource {
    rng: ChaCha8Rng,
    seed: u64,
}

impl ChaChaSource {
    pub fn new(seed: u64) -> Self {
        ChaChaSource {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }
}

impl RandomSource for ChaChaSource {
    fn set_seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.seed = seed;
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn gen(&mut self, max: u64) -> u64 {
        // Every call consumes exactly one word, even for max == 0, so the
        // draw order stays stable when a range degenerates.
        let raw = self.rng.next_u64();
        if max == u64::MAX {
            raw
        } else {
            raw % (max + 1)
        }
    }

    fn gen_small(&mut self, max: u8) -> u8 {
        (self.gen(max as u64)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproducible() {
        let mut a = ChaChaSource::new(0xC0FFEE);
        let mut b = ChaChaSource::new(0xC0FFEE);
        let seq_a = a.gen_sequence(64, 1000);
        let seq_b = b.gen_sequence(64, 1000);
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn reseed_restarts_stream() {
        let mut a = ChaChaSource::new(7);
        let first = a.gen(u64::MAX);
        a.gen_sequence(10, 100);
        a.set_seed(7);
        assert_eq!(a.gen(u64::MAX), first);
    }

    #[test]
    fn dispersed_range() {
        let mut a = ChaChaSource::new(1);
        for _ in 0..100 {
            let v = a.gen_dispersed(100, 10);
            assert!((90..=110).contains(&v));
        }
        assert_eq!(a.gen_dispersed(42, 0), 42);
    }

    #[test]
    fn min_max_range() {
        let mut a = ChaChaSource::new(2);
        for _ in 0..100 {
            let v = a.gen_min_max(5, 9);
            assert!((5..=9).contains(&v));
        }
    }
}
