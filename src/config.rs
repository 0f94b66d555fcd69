// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Compile-time parameters.
//!
//! The original implementation expresses these as C++ template
//! parameters on a `Traits` struct. The idiomatic Rust rendition is a
//! trait with associated constants, implemented by a small number of
//! concrete marker types and threaded through `Block<C>`, `Segment<C>`,
//! `Directory<C>` as a type parameter — a capability type known entirely
//! at construction time, never a runtime flag.

/// Which of the three equivalent `Block::get_index` implementations a
/// read should use. All three must return identical `(index, found)`
/// pairs for every input (Testable Property 6); the choice only matters
/// for benchmarking.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(test, derive(strum::EnumIter))]
pub enum ReadStrategy {
    /// Walk the bit-trie leaf by leaf.
    #[default]
    TrieWalk,
    /// Scan the slot header directly without materializing a trie.
    BitScan,
    /// The `DHT_EVERYTHING` fast path (only valid when
    /// `SegmentConfig::DHT_EVERYTHING` is `true`).
    Dht,
}

/// The compile-time shape of a [`crate::block::Block`] / [`crate::segment::Segment`] /
/// [`crate::directory::Directory`] stack.
///
/// All associated constants mirror spec.md §6 one-for-one.
pub trait SegmentConfig: Clone + Send + Sync + 'static {
    /// Number of logical slots per block. Must be a power of two.
    const COUNT_SLOT: usize;

    /// Width, in bits, of a [`crate::bitstore::BitStore`].
    const N: usize;

    /// Capacity of a block's payload list.
    const PAYLOADS_LENGTH: usize;

    /// Number of extra fingerprint bits retained per payload for
    /// false-positive reduction. May be zero.
    const NUMBER_EXTRA_BITS: usize;

    /// Number of extension blocks pooled per segment (ignored when
    /// `DHT_EVERYTHING` is `true`).
    const SEGMENT_EXTENSION_BLOCK_SIZE: usize;

    /// Slack entries reserved in slot 0 of a freshly filled block, so
    /// that a short run of same-slot inserts never needs the extension
    /// layer (see Testable Scenario S3).
    const SAFETY_PAYLOADS: usize;

    /// When `true`, each primary block owns at most one lazily allocated
    /// secondary block addressed by the migrated slot's own logical slot
    /// index, instead of a shared pool. A build-time policy, not
    /// interchangeable at runtime within one directory.
    const DHT_EVERYTHING: bool;

    /// Number of bits needed to select one of `COUNT_SLOT` slots.
    const SLOT_BITS: u32 = Self::COUNT_SLOT.ilog2();
}

/// The configuration spec.md's examples are built around:
/// `COUNT_SLOT = 64`, `N = 256`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfig;

impl SegmentConfig for DefaultConfig {
    const COUNT_SLOT: usize = 64;
    const N: usize = 256;
    const PAYLOADS_LENGTH: usize = 56;
    const NUMBER_EXTRA_BITS: usize = 8;
    const SEGMENT_EXTENSION_BLOCK_SIZE: usize = 16;
    const SAFETY_PAYLOADS: usize = 4;
    const DHT_EVERYTHING: bool = false;
}

/// A smaller configuration used by unit tests that want to exercise
/// overflow and extension paths without inserting thousands of keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct TinyConfig;

impl SegmentConfig for TinyConfig {
    const COUNT_SLOT: usize = 8;
    const N: usize = 128;
    const PAYLOADS_LENGTH: usize = 10;
    const NUMBER_EXTRA_BITS: usize = 4;
    const SEGMENT_EXTENSION_BLOCK_SIZE: usize = 4;
    const SAFETY_PAYLOADS: usize = 2;
    const DHT_EVERYTHING: bool = false;
}

/// The same small shape, but using the per-primary lazy secondary block
/// instead of a pooled extension layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TinyDhtConfig;

impl SegmentConfig for TinyDhtConfig {
    const COUNT_SLOT: usize = 8;
    const N: usize = 128;
    const PAYLOADS_LENGTH: usize = 10;
    const NUMBER_EXTRA_BITS: usize = 4;
    const SEGMENT_EXTENSION_BLOCK_SIZE: usize = 4;
    const SAFETY_PAYLOADS: usize = 2;
    const DHT_EVERYTHING: bool = true;
}
