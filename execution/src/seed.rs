//! Deterministic seed hashing.
//!
//! Seeds are hashed with 32-bit FNV-1a over UTF-16 code units followed by a
//! shift/add avalanche, then reduced to a fraction in `[0, 1)`. The output is
//! stable across processes and restarts and hash-compatible with the deployed
//! handler: the same seed string yields the same fraction. Outcomes only carry
//! over when the secret and bucket key are also the same.
//!
//! This is not a cryptographic hash. Fairness relies on the shared secret being
//! part of every seed, not on the hash being one-way.

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Resolution of [`seed_fraction`]; outputs are multiples of `1 / SEED_MODULUS`.
pub const SEED_MODULUS: u32 = 1_000_000;

/// Hash a seed string to a well-mixed 32-bit value.
pub fn seed_hash(seed: &str) -> u32 {
    let mut h = FNV_OFFSET_BASIS;
    for unit in seed.encode_utf16() {
        h ^= u32::from(unit);
        h = h.wrapping_mul(FNV_PRIME);
    }

    // Plain FNV leaves the low bits poorly mixed for short, similar inputs
    // (consecutive dates, neighbouring subnets).
    h = h.wrapping_add(h << 13);
    h ^= h >> 7;
    h = h.wrapping_add(h << 3);
    h ^= h >> 17;
    h = h.wrapping_add(h << 5);
    h
}

/// Hash a seed string to a fraction in `[0, 1)`.
pub fn seed_fraction(seed: &str) -> f64 {
    f64::from(seed_hash(seed) % SEED_MODULUS) / f64::from(SEED_MODULUS)
}
