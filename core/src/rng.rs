//! Referral code generation.
//!
//! Codes are drawn from a PCG stream over an alphabet without look-alike
//! characters (no 0/O, 1/I/L). Uniqueness is enforced by the users table,
//! not here; callers retry on collision.
//!
//! A seeded generator gives reproducible codes in tests and replay tooling.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::sync::Mutex;

const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub struct CodeRng {
    inner: Pcg64Mcg,
}

impl CodeRng {
    pub fn seeded(seed: u64) -> Self {
        Self { inner: Pcg64Mcg::seed_from_u64(seed) }
    }

    /// Seed from a fresh v4 UUID.
    pub fn from_entropy() -> Self {
        let bits = uuid::Uuid::new_v4().as_u128();
        Self::seeded((bits >> 64) as u64 ^ bits as u64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }
}

/// Thread-safe code source shared by one engine.
pub struct ReferralCodeGenerator {
    rng:    Mutex<CodeRng>,
    length: usize,
}

impl ReferralCodeGenerator {
    pub fn new(rng: CodeRng, length: usize) -> Self {
        Self { rng: Mutex::new(rng), length }
    }

    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        (0..self.length)
            .map(|_| ALPHABET[rng.next_u64_below(ALPHABET.len() as u64) as usize] as char)
            .collect()
    }
}

/// Codes are matched case-insensitively and ignore surrounding whitespace.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
