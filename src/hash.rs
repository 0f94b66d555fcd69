// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Turns a key into the two things the index needs: a [`Fingerprint`] to
//! route on, and a wider pool of bits to draw `NUMBER_EXTRA_BITS` from so
//! a false-positive trie match can usually be rejected without a log read.

use crate::fingerprint::Fingerprint;

/// Computes the fingerprint and extra-bit pool for a key.
///
/// Implementations should be cheap, deterministic, and well-distributed
/// across both halves of the digest independently — `Fingerprint` and
/// the extra-bit pool must not be derivable from one another, or
/// `NUMBER_EXTRA_BITS` stops filtering anything.
pub trait Hasher: Send + Sync {
    /// Returns `(fingerprint, extra_bits_pool)`. The caller masks the low
    /// `NUMBER_EXTRA_BITS` bits of the pool for storage in a `Payload`.
    fn hash_digest(&self, key: &[u8]) -> (Fingerprint, u64);
}

/// The default hasher: a single 128-bit `xxh3` digest, split into a
/// fingerprint half and an extra-bits half.
#[derive(Clone, Copy, Debug, Default)]
pub struct Xxh3Hasher;

impl Hasher for Xxh3Hasher {
    fn hash_digest(&self, key: &[u8]) -> (Fingerprint, u64) {
        let digest = xxhash_rust::xxh3::xxh3_128(key);
        let fingerprint = digest as u64;
        let extra_pool = (digest >> 64) as u64;
        (Fingerprint::from(fingerprint), extra_pool)
    }
}
