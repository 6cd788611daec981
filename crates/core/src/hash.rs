//! Deterministic 128-bit hashing for the Bloom filter's double-hashing scheme:
//! a single 128-bit hash split into two 64-bit halves, with the i-th hash
//! index computed as `(h1 + i*h2) mod m`. Must be stable across runs and
//! platforms, so we use a fixed seed and a maintained non-cryptographic hash
//! rather than the default hasher (which is seed-randomized per process).

use twox_hash::xxh3::hash128_with_seed;

/// Fixed seed so identical inputs hash identically across processes and hosts.
const SEED: u64 = 0x6273_6c6f_6f6d_6430;

/// Returns `(h1, h2)`, the two 64-bit halves of a 128-bit hash of `data`.
pub fn double_hash(data: &[u8]) -> (u64, u64) {
    let h = hash128_with_seed(data, SEED);
    ((h >> 64) as u64, h as u64)
}

/// The i-th of `k` hash positions into an `m`-bit array, per the double
/// hashing formula `(h1 + i*h2) mod m`.
pub fn nth_index(h1: u64, h2: u64, i: u64, m: u64) -> u64 {
    h1.wrapping_add(i.wrapping_mul(h2)) % m
}
