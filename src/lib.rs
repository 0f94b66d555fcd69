// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A bit-packed, extendible-hashing index for hash-based key-value stores
//! whose record bodies live in an append-only log on secondary storage.
//!
//! The index maps a key's fingerprint (a hash digest) to the log offset
//! where its `(key, value)` record was written, under concurrent load,
//! using only a few bits per entry and without fixed presizing. It does
//! not itself persist anything or recover from a crash — the external
//! log is the source of truth — and it does not support range scans,
//! ordered iteration, or transactions spanning multiple keys.
//!
//! The moving parts, leaves first:
//!
//! - [`bitstore`] — a fixed-size bit vector with range reads/writes that
//!   may cross a machine-word boundary.
//! - [`payload`] — the `(log offset, extra fingerprint bits)` pair a
//!   block's leaves point at, and the block-local array that holds them.
//! - [`bst`] — an ephemeral binary tree reconstructed from a block's
//!   bit-trie region whenever a write, remove, or segment expand needs to
//!   perform structural surgery on it.
//! - [`block`] — one [`bitstore::BitStore`] plus one
//!   [`payload::PayloadList`], encoding `COUNT_SLOT` logical slots' worth
//!   of fingerprint suffixes.
//! - [`extension`] — the overflow layer ([`extension::ExtensionPool`] or
//!   [`extension::DhtExtension`]) that absorbs a block's trailing slots
//!   once it runs out of room.
//! - [`segment`] — `COUNT_SLOT` primary blocks plus their overflow layer,
//!   with in-place [`segment::Segment::expand`] into two children.
//! - [`directory`] — the extendible-hash directory of shared segment
//!   handles, dispatching through a [`worker::WorkerPool`] and doubling
//!   when a segment at maximum local depth needs to split.
//!
//! Two traits mark this crate's boundary with the rest of a key-value
//! store: [`log::Log`] (the external append-only record store) and
//! [`hash::Hasher`] (the function that turns a key into a
//! [`fingerprint::Fingerprint`]). Both ship a default implementation —
//! [`log::InMemoryLog`] and [`hash::Xxh3Hasher`] — usable standalone for
//! tests, benchmarks, and embedders that don't need a different one.
//!
//! The compile-time shape of a given index (slot count, bit-store width,
//! payload capacity, and so on) is the [`config::SegmentConfig`] trait;
//! [`config::DefaultConfig`] is the shape spec.md's examples are built
//! around (`COUNT_SLOT = 64`, `N = 256`).

pub mod bitstore;
pub mod block;
pub mod bst;
pub mod config;
pub mod directory;
mod error;
pub mod extension;
pub mod fingerprint;
pub mod hash;
pub mod log;
pub mod payload;
pub mod segment;
mod worker;

pub use config::{DefaultConfig, SegmentConfig};
pub use directory::Directory;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use hash::{Hasher, Xxh3Hasher};
pub use log::{InMemoryLog, Log};
pub use payload::{LogOffset, Payload};
pub use worker::JobHandle;
