// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The extendible-hash directory: a resizable table of `{segment,
//! localDepth}` entries routing requests to shared [`Segment`]s, doubling
//! in place when a segment at `localDepth == globalDepth` needs to split.
//!
//! Grounded on `original_source/directory/directory_tests.cpp` for the
//! doubling/split-propagation invariants, and on the teacher's
//! `Segment(Arc<Inner>)` pattern (`src/segment/mod.rs`) for why a segment
//! is reached through `Arc` here: a split must let old and new directory
//! entries share the surviving children without a stop-the-world pause.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, trace};

use crate::config::SegmentConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FINGERPRINT_SIZE};
use crate::hash::Hasher;
use crate::log::Log;
use crate::payload::Payload;
use crate::segment::{Segment, WriteOutcome};
use crate::worker::{JobHandle, WorkerPool};

/// A segment reachable from the directory, plus whether [`Directory::split_at`]
/// has already replaced it with two children. `Segment::expand` takes
/// `&self` and leaves the original object fully valid, so a caller that
/// captured this handle via [`Directory::entry_for`] just before a split
/// started can still lock and write to it after the split's own brief
/// lock is released — unless it checks `retired` first and re-resolves,
/// that write lands in an object no directory entry points at anymore and
/// is silently lost.
struct SharedSegment<C: SegmentConfig> {
    segment: Mutex<Segment<C>>,
    retired: AtomicBool,
}

impl<C: SegmentConfig> SharedSegment<C> {
    fn new(segment: Segment<C>) -> Arc<Self> {
        Arc::new(Self {
            segment: Mutex::new(segment),
            retired: AtomicBool::new(false),
        })
    }
}

/// One directory slot: a shared handle to a segment plus the depth at
/// which it was last split. Entries whose low `local_depth` bits agree
/// all point at the same segment (classical extendible hashing).
struct DirEntry<C: SegmentConfig> {
    segment: Arc<SharedSegment<C>>,
    local_depth: u32,
}

impl<C: SegmentConfig> Clone for DirEntry<C> {
    fn clone(&self) -> Self {
        Self {
            segment: Arc::clone(&self.segment),
            local_depth: self.local_depth,
        }
    }
}

/// An extendible-hash directory of shared segment references, dispatched
/// through a [`WorkerPool`] keyed by directory index so a single segment
/// is never mutated by two workers at once.
pub struct Directory<C: SegmentConfig, L: Log + 'static, H: Hasher + 'static> {
    entries: RwLock<Vec<DirEntry<C>>>,
    workers: WorkerPool,
    active: AtomicUsize,
    log: Arc<L>,
    hasher: H,
    max_splits: u32,
}

/// `dirIdx = low G bits of fp`, read under the directory's read lock.
fn dir_idx(fp: Fingerprint, global_depth: u32) -> usize {
    fp.range(0, global_depth) as usize
}

fn low_bits_match(a: usize, b: usize, depth: u32) -> bool {
    if depth == 0 {
        true
    } else {
        let mask = (1usize << depth) - 1;
        (a & mask) == (b & mask)
    }
}

impl<C: SegmentConfig, L: Log + 'static, H: Hasher + 'static> Directory<C, L, H> {
    /// A fresh directory with a single segment at `globalDepth = 0`,
    /// dispatched across `num_threads` workers.
    #[must_use]
    pub fn new(log: Arc<L>, hasher: H, num_threads: usize) -> Self {
        let root = Segment::<C>::new(2 * C::SLOT_BITS);
        Self {
            entries: RwLock::new(vec![DirEntry {
                segment: SharedSegment::new(root),
                local_depth: 0,
            }]),
            workers: WorkerPool::new(num_threads),
            active: AtomicUsize::new(0),
            log,
            hasher,
            max_splits: FINGERPRINT_SIZE - 2 * C::SLOT_BITS,
        }
    }

    #[must_use]
    pub fn global_depth(&self) -> u32 {
        let entries = self.entries.read().expect("directory lock poisoned");
        entries.len().trailing_zeros()
    }

    /// Whether any operation is currently in flight. Callers that need
    /// quiescence before shutdown should poll this rather than assume
    /// submission order implies completion order.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    /// `total_entries()` of every distinct segment currently reachable from
    /// the directory, deduplicated by identity (several entries can share
    /// one segment before it next splits). Mostly useful for tests and
    /// diagnostics.
    #[must_use]
    pub fn segment_sizes(&self) -> Vec<usize> {
        let entries = self.entries.read().expect("directory lock poisoned");
        let mut seen: Vec<*const SharedSegment<C>> = Vec::new();
        let mut sizes = Vec::new();
        for entry in entries.iter() {
            let ptr = Arc::as_ptr(&entry.segment);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            sizes.push(entry.segment.segment.lock().expect("segment lock poisoned").total_entries());
        }
        sizes
    }

    fn entry_for(&self, fp: Fingerprint) -> (Arc<SharedSegment<C>>, usize) {
        let entries = self.entries.read().expect("directory lock poisoned");
        let global_depth = entries.len().trailing_zeros();
        let idx = dir_idx(fp, global_depth);
        (Arc::clone(&entries[idx].segment), idx)
    }

    /// Inserts or updates `key`/`value`. Appends to the log first so the
    /// segment write always has a valid offset to point at.
    pub fn write(self: &Arc<Self>, key: &[u8], value: &[u8]) -> JobHandle<Result<()>> {
        self.dispatch_write(key, value, false)
    }

    /// As [`Self::write`], but fails with [`Error::UpdateNotPossible`] if
    /// `key` does not already have an entry.
    pub fn update(self: &Arc<Self>, key: &[u8], value: &[u8]) -> JobHandle<Result<()>> {
        self.dispatch_write(key, value, true)
    }

    fn extra_bits_of(pool: u64) -> u32 {
        if C::NUMBER_EXTRA_BITS == 0 {
            0
        } else {
            let width = (C::NUMBER_EXTRA_BITS as u32).min(31);
            (pool as u32) & ((1u32 << width) - 1)
        }
    }

    fn dispatch_write(self: &Arc<Self>, key: &[u8], value: &[u8], guarantee_update: bool) -> JobHandle<Result<()>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let (fp, extra_bits_pool) = self.hasher.hash_digest(key);
        let extra_bits = Self::extra_bits_of(extra_bits_pool);

        let (_, worker_id) = self.entry_for(fp);
        let this = Arc::clone(self);
        let key = key.to_vec();
        let value = value.to_vec();

        self.workers.submit(worker_id, move || {
            let result = this.write_with_retry(fp, &key, &value, extra_bits, guarantee_update);
            this.active.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    fn write_with_retry(&self, fp: Fingerprint, key: &[u8], value: &[u8], extra_bits: u32, guarantee_update: bool) -> Result<()> {
        // The log offset is claimed once, up front: retries after a split
        // only redrive the segment-level write against the (now correct)
        // child segment, they never re-append the value.
        let offset = self.log.append(key, value)?;
        let payload = Payload::new(offset, extra_bits);

        for attempt in 0..=self.max_splits {
            let (shared, dir_idx_hit) = self.entry_for(fp);

            let outcome = {
                let mut guard = shared.segment.lock().expect("segment lock poisoned");
                if shared.retired.load(Ordering::SeqCst) {
                    // `split_at` already replaced this entry; the Arc we
                    // just resolved raced a concurrent split and is stale.
                    // Drop it and re-resolve rather than write into an
                    // object no directory entry points at anymore.
                    trace!("directory write: segment retired mid-split, re-resolving, attempt={attempt}, dir_idx={dir_idx_hit}");
                    continue;
                }
                guard.write(fp, payload, guarantee_update)?
            };

            match outcome {
                WriteOutcome::Successful => return Ok(()),
                WriteOutcome::NeedsSplit => {
                    trace!("directory write: segment needs split, retrying, attempt={attempt}, dir_idx={dir_idx_hit}");
                    self.split_at(dir_idx_hit)?;
                }
            }
        }
        Err(Error::SplitImpossible)
    }

    /// Looks up `key`.
    pub fn read(self: &Arc<Self>, key: &[u8]) -> JobHandle<Result<Option<(Vec<u8>, Vec<u8>)>>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let (fp, extra_bits_pool) = self.hasher.hash_digest(key);
        let extra_bits = Self::extra_bits_of(extra_bits_pool);

        let (_, worker_id) = self.entry_for(fp);
        let this = Arc::clone(self);
        let key = key.to_vec();

        self.workers.submit(worker_id, move || {
            let result = (|| {
                let payload = loop {
                    let (shared, _) = this.entry_for(fp);
                    let guard = shared.segment.lock().expect("segment lock poisoned");
                    if shared.retired.load(Ordering::SeqCst) {
                        continue;
                    }
                    break guard.read(fp, extra_bits, &key, this.log.as_ref())?;
                };
                match payload {
                    Some(p) => {
                        let (_, value) = this.log.read(p.offset)?;
                        Ok(Some((key.clone(), value)))
                    }
                    None => Ok(None),
                }
            })();
            this.active.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    /// Removes `key`, if present.
    pub fn remove(self: &Arc<Self>, key: &[u8]) -> JobHandle<Result<bool>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let (fp, _) = self.hasher.hash_digest(key);

        let (_, worker_id) = self.entry_for(fp);
        let this = Arc::clone(self);

        self.workers.submit(worker_id, move || {
            let result = (|| loop {
                let (shared, _) = this.entry_for(fp);
                let mut guard = shared.segment.lock().expect("segment lock poisoned");
                if shared.retired.load(Ordering::SeqCst) {
                    continue;
                }
                return guard.remove(fp).map(|p| p.is_some());
            })();
            this.active.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    /// Blocking convenience wrapper around [`Self::write`], for tests and
    /// callers that don't need the async handle.
    pub fn write_sync(self: &Arc<Self>, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(key, value).wait()
    }

    pub fn update_sync(self: &Arc<Self>, key: &[u8], value: &[u8]) -> Result<()> {
        self.update(key, value).wait()
    }

    pub fn read_sync(self: &Arc<Self>, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.read(key).wait()
    }

    pub fn remove_sync(self: &Arc<Self>, key: &[u8]) -> Result<bool> {
        self.remove(key).wait()
    }

    /// Doubles the directory (if the segment at `idx` is already at
    /// `localDepth == globalDepth`), splits its segment via
    /// [`Segment::expand`], and atomically repoints every directory entry
    /// that used to share it onto the correct child.
    fn split_at(&self, idx: usize) -> Result<()> {
        let mut entries = self.entries.write().expect("directory lock poisoned");

        let global_depth = entries.len().trailing_zeros();
        let local_depth = entries[idx].local_depth;

        if local_depth == global_depth {
            debug!("directory doubling, global_depth={global_depth}");
            let old_len = entries.len();
            let duplicate: Vec<DirEntry<C>> = entries.clone();
            entries.extend(duplicate);
            debug_assert_eq!(entries.len(), old_len * 2);
        }

        let old_segment = Arc::clone(&entries[idx].segment);
        let (child0, child1) = {
            let guard = old_segment.segment.lock().expect("segment lock poisoned");
            let children = guard.expand()?;
            // Mark retired while still holding `old_segment`'s own lock:
            // any writer/remover blocked on that lock sees `retired` the
            // instant it acquires the guard, and re-resolves through
            // `entry_for` instead of mutating an object `entries[]` is
            // about to stop pointing at.
            old_segment.retired.store(true, Ordering::SeqCst);
            children
        };

        let child0 = SharedSegment::new(child0);
        let child1 = SharedSegment::new(child1);
        let new_local_depth = local_depth + 1;

        // Every entry that used to share `old_segment` (same low
        // `local_depth` bits as `idx`) is repointed at the child selected
        // by the newly discriminating bit, at position `local_depth`.
        let len = entries.len();
        for i in 0..len {
            if !low_bits_match(i, idx, local_depth) {
                continue;
            }
            let bit = (i >> local_depth) & 1;
            entries[i] = DirEntry {
                segment: if bit == 0 { Arc::clone(&child0) } else { Arc::clone(&child1) },
                local_depth: new_local_depth,
            };
        }

        debug!("segment split complete, idx={idx}, new_local_depth={new_local_depth}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TinyConfig;
    use crate::hash::Xxh3Hasher;
    use crate::log::InMemoryLog;
    use test_log::test;

    #[test]
    fn dir_idx_reads_the_low_global_depth_bits() {
        let fp = Fingerprint::from(0b1011_0110u64);
        assert_eq!(dir_idx(fp, 0), 0);
        assert_eq!(dir_idx(fp, 3), 0b110);
        assert_eq!(dir_idx(fp, 4), 0b0110);
    }

    #[test]
    fn low_bits_match_ignores_bits_at_or_above_depth() {
        assert!(low_bits_match(0b0110, 0b1110, 0));
        assert!(low_bits_match(0b0110, 0b1110, 3));
        assert!(!low_bits_match(0b0110, 0b1110, 4));
    }

    #[test]
    fn fresh_directory_starts_at_global_depth_zero_with_one_segment() {
        let log = Arc::new(InMemoryLog::new());
        let directory = Directory::<TinyConfig, InMemoryLog, Xxh3Hasher>::new(log, Xxh3Hasher, 1);
        assert_eq!(directory.global_depth(), 0);
        assert_eq!(directory.segment_sizes(), vec![0]);
    }

    #[test]
    fn writes_past_one_segments_capacity_force_doubling_and_stay_readable() {
        let log = Arc::new(InMemoryLog::new());
        let directory = Arc::new(Directory::<TinyConfig, InMemoryLog, Xxh3Hasher>::new(log, Xxh3Hasher, 2));

        for i in 0u32..500 {
            let key = format!("dir-key-{i}").into_bytes();
            directory.write_sync(&key, &i.to_le_bytes()).unwrap();
        }

        assert!(directory.global_depth() > 0, "500 keys into a TinyConfig segment must force at least one split");

        for i in 0u32..500 {
            let key = format!("dir-key-{i}").into_bytes();
            let (_, value) = directory.read_sync(&key).unwrap().expect("key must survive repeated doubling");
            assert_eq!(value, i.to_le_bytes());
        }
    }

    #[test]
    fn update_on_missing_key_fails_without_mutating_the_segment() {
        let log = Arc::new(InMemoryLog::new());
        let directory = Arc::new(Directory::<TinyConfig, InMemoryLog, Xxh3Hasher>::new(log, Xxh3Hasher, 1));
        let result = directory.update_sync(b"never-written", b"value");
        assert!(matches!(result, Err(Error::UpdateNotPossible)));
        assert_eq!(directory.segment_sizes(), vec![0]);
    }

    /// Regression test for a lost-write race: a caller that resolved a
    /// segment through [`Directory::entry_for`] before a split must see
    /// `retired` once it (re-)locks that segment afterward, and a fresh
    /// `entry_for` call must hand back a different, live handle instead.
    #[test]
    fn split_at_retires_the_old_segment_so_stale_handles_must_resolve_again() {
        let log = Arc::new(InMemoryLog::new());
        let directory = Directory::<TinyConfig, InMemoryLog, Xxh3Hasher>::new(log, Xxh3Hasher, 1);

        let fp = Fingerprint::from(0u64);
        let (stale, idx) = directory.entry_for(fp);
        assert!(!stale.retired.load(Ordering::SeqCst));

        directory.split_at(idx).unwrap();

        assert!(stale.retired.load(Ordering::SeqCst), "the pre-split segment must be marked retired");

        let (fresh, _) = directory.entry_for(fp);
        assert!(
            !std::ptr::eq(Arc::as_ptr(&stale), Arc::as_ptr(&fresh)),
            "a re-resolved handle must point at a live child, not the retired segment"
        );
        assert!(!fresh.retired.load(Ordering::SeqCst));
    }

    #[test]
    fn remove_then_read_reports_absence() {
        let log = Arc::new(InMemoryLog::new());
        let directory = Arc::new(Directory::<TinyConfig, InMemoryLog, Xxh3Hasher>::new(log, Xxh3Hasher, 1));
        directory.write_sync(b"gone-soon", b"value").unwrap();
        assert!(directory.remove_sync(b"gone-soon").unwrap());
        assert_eq!(directory.read_sync(b"gone-soon").unwrap(), None);
    }
}
