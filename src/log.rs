// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The append-only record log the index points into.
//!
//! This crate owns none of the on-disk format — a record body lives
//! entirely behind whatever [`Log`] implementation the embedder supplies.
//! The index only ever needs two things back from it: a fresh offset when
//! appending, and the `(key, value)` pair stored at a previously returned
//! offset, so a read can confirm a candidate leaf really is the key it
//! was looking for rather than a fingerprint collision.

use crate::payload::LogOffset;

/// The append-only store backing the index. Implementations are expected
/// to be cheap to share across worker threads (`Send + Sync`); this crate
/// never assumes exclusive access.
pub trait Log: Send + Sync {
    /// Appends `key`/`value` and returns the offset the pair was written
    /// at, for later use as a [`crate::payload::Payload::offset`].
    fn append(&self, key: &[u8], value: &[u8]) -> crate::Result<LogOffset>;

    /// Reads back the `(key, value)` pair previously written at `offset`.
    fn read(&self, offset: LogOffset) -> crate::Result<(Vec<u8>, Vec<u8>)>;
}

/// A `Vec`-backed [`Log`] for tests and benchmarks. Not meant for
/// production use — it never reclaims space and pays a lock per access.
#[derive(Default)]
pub struct InMemoryLog {
    records: std::sync::Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl InMemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("log mutex poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Log for InMemoryLog {
    fn append(&self, key: &[u8], value: &[u8]) -> crate::Result<LogOffset> {
        let mut records = self.records.lock().expect("log mutex poisoned");
        let offset = LogOffset(records.len() as u64);
        records.push((key.to_vec(), value.to_vec()));
        Ok(offset)
    }

    fn read(&self, offset: LogOffset) -> crate::Result<(Vec<u8>, Vec<u8>)> {
        let records = self.records.lock().expect("log mutex poisoned");
        records
            .get(offset.0 as usize)
            .cloned()
            .ok_or_else(|| crate::Error::Log(format!("no record at offset {}", offset.0).into()))
    }
}
