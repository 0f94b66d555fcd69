// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The bit-packed block: one [`BitStore`] plus one [`PayloadList`],
//! encoding up to `COUNT_SLOT` logical slots' worth of fingerprint
//! suffixes and the log offsets they point at.
//!
//! Layout within the `BitStore`, low bit to high bit:
//!
//! ```text
//! [ slot header | COUNT_SLOT bits ]
//! [ unary ten-count terminators    ]
//! [ trie region, grown upward      ]
//! ...
//! [ extension tail guard, fixed at the top ]
//! ```
//!
//! The header is one bit per slot (set iff the slot holds at least one
//! entry). The terminator region is the concatenation, in slot order, of
//! `ten_i` bits per occupied slot (`ten_i - 1` zeros then a one) — its
//! total length is always exactly the block's total entry count. The trie
//! region holds each occupied slot's [`crate::bst::Bst`] serialization
//! back to back. The guard is `COUNT_SLOT - first_extended_lslot` bits
//! reserved at the top of the store, marking where extension slots begin.

use std::marker::PhantomData;

use log::trace;

use crate::bitstore::BitStore;
use crate::bst::Bst;
use crate::config::SegmentConfig;
use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, FINGERPRINT_SIZE};
use crate::log::Log;
use crate::payload::{Payload, PayloadList};

/// The outcome of a successful [`Block::write`] call. Space-exhaustion
/// cases are reported as `Err` instead (see [`crate::error::Error`]) so
/// callers can use `?` for the genuinely exceptional paths and `match`
/// only on the two outcomes that are really just "where did it go".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The entry now lives in this block.
    Successful,
    /// `lslot` is at or past `first_extended_lslot`; the caller (the
    /// owning [`crate::segment::Segment`]) must retry against the
    /// extension layer.
    NeedsExtension { lslot: usize },
}

/// A fixed-capacity block of `COUNT_SLOT` logical slots.
pub struct Block<C: SegmentConfig> {
    bits: BitStore,
    payloads: PayloadList,
    ten: Vec<u32>,
    trie_len: Vec<u32>,
    first_extended_lslot: usize,
    _config: PhantomData<C>,
}

impl<C: SegmentConfig> Block<C> {
    /// An empty block with no entries and no extended slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: BitStore::new(C::N),
            payloads: PayloadList::new(C::PAYLOADS_LENGTH),
            ten: vec![0; C::COUNT_SLOT],
            trie_len: vec![0; C::COUNT_SLOT],
            first_extended_lslot: C::COUNT_SLOT,
            _config: PhantomData,
        }
    }

    /// Total number of entries currently stored in this block (the sum
    /// of every slot's `ten`).
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.ten.iter().map(|&t| t as usize).sum()
    }

    /// The count of entries held by `slot` (`ten` in spec terms).
    #[must_use]
    pub fn get_ten(&self, slot: usize) -> u32 {
        self.ten[slot]
    }

    /// Whether `slot`'s storage has migrated to the extension layer.
    #[must_use]
    pub fn is_extended(&self, slot: usize) -> bool {
        slot >= self.first_extended_lslot
    }

    #[must_use]
    pub fn first_extended_lslot(&self) -> usize {
        self.first_extended_lslot
    }

    /// Free bits remaining in the trie region before the extension
    /// guard. Informational, as in spec.md's `remainingBits`.
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        self.capacity_bits().saturating_sub(self.trie_region_end())
    }

    fn guard_len(&self) -> usize {
        C::COUNT_SLOT - self.first_extended_lslot
    }

    fn capacity_bits(&self) -> usize {
        C::N - self.guard_len()
    }

    fn terminator_len(&self) -> usize {
        self.total_entries()
    }

    fn trie_region_start(&self) -> usize {
        C::COUNT_SLOT + self.terminator_len()
    }

    /// The bit offset where `slot`'s sub-trie begins. `get_lslot_start(COUNT_SLOT)`
    /// is the current end of the whole trie region.
    #[must_use]
    pub fn get_lslot_start(&self, slot: usize) -> usize {
        self.trie_region_start() + self.trie_len[..slot].iter().map(|&l| l as usize).sum::<usize>()
    }

    fn trie_region_end(&self) -> usize {
        self.get_lslot_start(C::COUNT_SLOT)
    }

    fn slot_of(fp: Fingerprint, fp_index: u32) -> usize {
        fp.range(fp_index - C::SLOT_BITS, fp_index) as usize
    }

    fn tail_of(fp: Fingerprint, fp_index: u32) -> u64 {
        fp.range(fp_index, FINGERPRINT_SIZE)
    }

    fn tail_width(fp_index: u32) -> u32 {
        FINGERPRINT_SIZE - fp_index
    }

    /// Rebuilds `slot`'s sub-trie as an ephemeral [`Bst`].
    fn rebuild_slot(&self, slot: usize, tail_width: u32) -> Bst {
        if self.ten[slot] == 0 {
            return Bst::empty(tail_width);
        }
        let (bst, end) = Bst::create_bst(&self.bits, self.get_lslot_start(slot), self.ten[slot] as usize, tail_width);
        debug_assert_eq!(end, self.get_lslot_start(slot + 1));
        bst
    }

    /// The global payload rank of the `rank_in_slot`-th leaf of `slot`
    /// (leaves of earlier slots all sort before it).
    fn global_rank(&self, slot: usize, rank_in_slot: usize) -> usize {
        let preceding: usize = self.ten[..slot].iter().map(|&t| t as usize).sum();
        preceding + rank_in_slot
    }

    /// Grows `slot`'s unary terminator region by one entry: the old
    /// trailing `1` becomes a `0`, and a new trailing `1` is appended,
    /// shifting every later bit one position right.
    fn grow_terminator(&mut self, slot: usize) {
        let region_start = C::COUNT_SLOT + self.ten[..slot].iter().map(|&t| t as usize).sum::<usize>();
        let region_len = self.ten[slot] as usize;
        let insert_at = region_start + region_len;

        self.shift_right(insert_at, 1);
        if region_len > 0 {
            self.bits.set(insert_at - 1, false);
        }
        self.bits.set(insert_at, true);
        self.ten[slot] += 1;
        if region_len == 0 {
            self.bits.set(slot, true);
        }
    }

    /// Shrinks `slot`'s unary terminator region by one entry: drops the
    /// trailing `1`, and — if the slot still holds entries — turns its
    /// new trailing `0` into a `1`, shifting everything after it left.
    fn shrink_terminator(&mut self, slot: usize) {
        let region_start = C::COUNT_SLOT + self.ten[..slot].iter().map(|&t| t as usize).sum::<usize>();
        let old_len = self.ten[slot] as usize;
        let remove_at = region_start + old_len - 1;

        self.shift_left(remove_at, 1);
        if old_len > 1 {
            self.bits.set(region_start + old_len - 2, true);
        } else {
            self.bits.set(slot, false);
        }
        self.ten[slot] -= 1;
    }

    /// Shifts every bit in `[pos, used_len)` right by `by` positions,
    /// leaving `by` undefined bits at `pos` for the caller to fill.
    fn shift_right(&mut self, pos: usize, by: usize) {
        let used = self.trie_region_end().max(pos);
        for i in (pos..used).rev() {
            let bit = self.bits.get(i);
            self.bits.set(i + by, bit);
        }
        for i in pos..pos + by {
            self.bits.set(i, false);
        }
    }

    /// Shifts every bit in `[pos + by, used_len)` left by `by` positions.
    fn shift_left(&mut self, pos: usize, by: usize) {
        let used = self.trie_region_end();
        for i in pos + by..used {
            let bit = self.bits.get(i);
            self.bits.set(i - by, bit);
        }
        for i in used - by..used {
            self.bits.set(i, false);
        }
    }

    /// Replaces `slot`'s serialized sub-trie with `bst`'s, shifting every
    /// later slot's bits by the resulting length delta.
    fn commit_slot_trie(&mut self, slot: usize, bst: &Bst) {
        let old_start = self.get_lslot_start(slot);
        let old_len = self.trie_len[slot] as usize;
        let new_len = bst.encoded_len();

        if new_len > old_len {
            self.shift_right(old_start + old_len, new_len - old_len);
        } else if new_len < old_len {
            self.shift_left(old_start + new_len, old_len - new_len);
        }

        bst.serialize(&mut self.bits, old_start);
        self.trie_len[slot] = new_len as u32;
    }

    /// Checks whether committing `new_trie_len` for `slot` (replacing
    /// `old_trie_len`) and one more payload would fit, without mutating
    /// anything.
    fn has_room_for(&self, old_trie_len: usize, new_trie_len: usize) -> bool {
        let delta = new_trie_len as isize - old_trie_len as isize;
        let projected_trie_end = self.trie_region_end() as isize + delta + 1; // +1 terminator bit
        projected_trie_end <= self.capacity_bits() as isize
    }

    /// Inserts `payload` for `fp` at `fp_index`. `guarantee_update` demands
    /// that an entry for this exact fingerprint tail already exist; if it
    /// doesn't (or can't be located), this returns `Err(UpdateNotPossible)`
    /// without mutating the block.
    pub fn write(
        &mut self,
        fp: Fingerprint,
        fp_index: u32,
        payload: Payload,
        guarantee_update: bool,
    ) -> Result<WriteOutcome> {
        self.write_at_slot(Self::slot_of(fp, fp_index), fp, fp_index, payload, guarantee_update)
    }

    /// As [`Self::write`], but writes into `slot` directly instead of
    /// deriving it from `fp`'s bits. Used by
    /// [`crate::extension::ExtensionBlock`], whose physical slot a given
    /// fingerprint lands in is not generally its primary block's logical
    /// slot.
    pub(crate) fn write_at_slot(
        &mut self,
        slot: usize,
        fp: Fingerprint,
        fp_index: u32,
        payload: Payload,
        guarantee_update: bool,
    ) -> Result<WriteOutcome> {
        if self.is_extended(slot) {
            return Ok(WriteOutcome::NeedsExtension { lslot: slot });
        }

        let tail_width = Self::tail_width(fp_index);
        let tail = Self::tail_of(fp, fp_index);
        let mut bst = self.rebuild_slot(slot, tail_width);

        if let Some(rank_in_slot) = bst.find(tail) {
            let global_rank = self.global_rank(slot, rank_in_slot);
            self.payloads.overwrite(global_rank, payload);
            trace!("block write: updated existing entry in place, slot={slot}");
            return Ok(WriteOutcome::Successful);
        }

        if guarantee_update {
            return Err(Error::UpdateNotPossible);
        }

        if !self.payloads.has_room() {
            return Err(Error::PayloadSpaceExhausted);
        }

        let Some(rank_in_slot) = bst.insert(tail) else {
            return Err(Error::BlockSpaceExhausted);
        };

        if !self.has_room_for(self.trie_len[slot] as usize, bst.encoded_len()) {
            return Err(Error::BlockSpaceExhausted);
        }

        self.grow_terminator(slot);
        self.commit_slot_trie(slot, &bst);
        let global_rank = self.global_rank(slot, rank_in_slot);
        let inserted = self.payloads.insert(global_rank, payload);
        debug_assert!(inserted, "payload room was checked above");

        trace!("block write: inserted new leaf, slot={slot}, rank={rank_in_slot}");
        Ok(WriteOutcome::Successful)
    }

    /// Looks up `fp`. On a structural match, consults `log` to confirm the
    /// stored `key` really produced this fingerprint (guarding against a
    /// true hash collision) before returning the payload. When
    /// `NUMBER_EXTRA_BITS > 0`, a mismatching `extra_bits` rejects the
    /// candidate before any log I/O happens.
    pub fn read<L: Log>(
        &self,
        fp: Fingerprint,
        fp_index: u32,
        extra_bits: u32,
        key: &[u8],
        log: &L,
    ) -> Result<Option<Payload>> {
        self.read_at_slot(Self::slot_of(fp, fp_index), fp, fp_index, extra_bits, key, log)
    }

    /// As [`Self::read`], but reads `slot` directly instead of deriving
    /// it from `fp`'s bits (see [`Self::write_at_slot`]).
    pub(crate) fn read_at_slot<L: Log>(
        &self,
        slot: usize,
        fp: Fingerprint,
        fp_index: u32,
        extra_bits: u32,
        key: &[u8],
        log: &L,
    ) -> Result<Option<Payload>> {
        if self.is_extended(slot) {
            return Ok(None);
        }
        if self.ten[slot] == 0 {
            return Ok(None);
        }

        let tail_width = Self::tail_width(fp_index);
        let tail = Self::tail_of(fp, fp_index);
        let bst = self.rebuild_slot(slot, tail_width);

        let Some(rank_in_slot) = bst.find(tail) else {
            return Ok(None);
        };
        let global_rank = self.global_rank(slot, rank_in_slot);
        let Some(payload) = self.payloads.get(global_rank) else {
            return Ok(None);
        };

        if C::NUMBER_EXTRA_BITS > 0 {
            let mask = (1u32 << C::NUMBER_EXTRA_BITS) - 1;
            if payload.extra_bits & mask != extra_bits & mask {
                trace!("block read: extra-bits filter rejected candidate without log I/O, slot={slot}");
                return Ok(None);
            }
        }

        let (stored_key, _) = log.read(payload.offset)?;
        if stored_key != key {
            trace!("block read: log key mismatch, true collision, slot={slot}");
            return Ok(None);
        }

        Ok(Some(payload))
    }

    /// Removes the entry for `fp` at `fp_index`, if present. Idempotent:
    /// removing a missing key is a no-op that returns `Ok(None)`.
    pub fn remove(&mut self, fp: Fingerprint, fp_index: u32) -> Result<Option<Payload>> {
        self.remove_at_slot(Self::slot_of(fp, fp_index), fp, fp_index)
    }

    /// As [`Self::remove`], but removes from `slot` directly instead of
    /// deriving it from `fp`'s bits (see [`Self::write_at_slot`]).
    pub(crate) fn remove_at_slot(&mut self, slot: usize, fp: Fingerprint, fp_index: u32) -> Result<Option<Payload>> {
        if self.is_extended(slot) || self.ten[slot] == 0 {
            return Ok(None);
        }

        let tail_width = Self::tail_width(fp_index);
        let tail = Self::tail_of(fp, fp_index);
        let mut bst = self.rebuild_slot(slot, tail_width);

        let Some(rank_in_slot) = bst.remove(tail) else {
            return Ok(None);
        };

        let global_rank = self.global_rank(slot, rank_in_slot);
        let removed = self.payloads.remove(global_rank);

        self.commit_slot_trie(slot, &bst);
        self.shrink_terminator(slot);

        trace!("block remove: dropped leaf, slot={slot}, rank={rank_in_slot}");
        Ok(Some(removed))
    }

    /// Read-only view of `slot`'s full tails, in leaf order. Unlike
    /// [`Self::drain_slot`], leaves the block untouched — used by
    /// [`crate::segment::Segment::expand`], which must read every
    /// primary block without disturbing the parent segment until every
    /// child has been built successfully.
    pub(crate) fn slot_tails(&self, slot: usize, tail_width: u32) -> Vec<u64> {
        if self.ten[slot] == 0 {
            return Vec::new();
        }
        self.rebuild_slot(slot, tail_width).tails_in_order()
    }

    /// Read-only view of `slot`'s payloads, in the same leaf order as
    /// [`Self::slot_tails`].
    pub(crate) fn slot_payloads(&self, slot: usize) -> Vec<Payload> {
        let count = self.ten[slot] as usize;
        if count == 0 {
            return Vec::new();
        }
        let start = self.global_rank(slot, 0);
        (start..start + count)
            .map(|rank| self.payloads.get(rank).expect("payload present for an occupied slot"))
            .collect()
    }

    /// Removes every entry of `slot` and returns its full tails (in leaf
    /// order) together with their payloads (in the same order), clearing
    /// the slot's trie, terminator run, and header bit entirely. Used by
    /// [`crate::segment::Segment`]'s `moveLSlotsToMakeSpace` step to
    /// migrate a whole slot's worth of entries into the extension layer
    /// at once, rather than one `remove`/`write` pair at a time.
    pub(crate) fn drain_slot(&mut self, slot: usize, tail_width: u32) -> (Vec<u64>, Vec<Payload>) {
        let count = self.ten[slot] as usize;
        if count == 0 {
            return (Vec::new(), Vec::new());
        }

        let bst = self.rebuild_slot(slot, tail_width);
        let tails = bst.tails_in_order();

        let start_rank = self.global_rank(slot, 0);
        let payloads = (0..count).map(|_| self.payloads.remove(start_rank)).collect();

        self.commit_slot_trie(slot, &Bst::empty(tail_width));
        for _ in 0..count {
            self.shrink_terminator(slot);
        }

        (tails, payloads)
    }

    /// Returns a deep, independently-owned copy of this block.
    #[must_use]
    pub fn replicate(&self) -> Self {
        Self {
            bits: self.bits.replicate(),
            payloads: self.payloads.clone(),
            ten: self.ten.clone(),
            trie_len: self.trie_len.clone(),
            first_extended_lslot: self.first_extended_lslot,
            _config: PhantomData,
        }
    }

    /// The trie-walk read strategy: reconstructs a [`Bst`] and asks it.
    /// Must agree with [`Self::get_index_bit_scan`] for every input
    /// (Testable Property 6).
    #[must_use]
    pub fn get_index_trie_walk(&self, fp: Fingerprint, fp_index: u32) -> (usize, bool) {
        let slot = Self::slot_of(fp, fp_index);
        if self.is_extended(slot) || self.ten[slot] == 0 {
            return (slot, false);
        }
        let tail_width = Self::tail_width(fp_index);
        let tail = Self::tail_of(fp, fp_index);
        let bst = self.rebuild_slot(slot, tail_width);
        (slot, bst.find(tail).is_some())
    }

    /// Direct bit-scan read strategy: walks the serialized trie node by
    /// node using plain recursion over the `BitStore`, without allocating
    /// a [`Bst`] arena. Must agree with [`Self::get_index_trie_walk`] for
    /// every input (Testable Property 6).
    #[must_use]
    pub fn get_index_bit_scan(&self, fp: Fingerprint, fp_index: u32) -> (usize, bool) {
        let slot = Self::slot_of(fp, fp_index);
        if self.is_extended(slot) || self.ten[slot] == 0 {
            return (slot, false);
        }

        let tail_width = Self::tail_width(fp_index);
        let tail = Self::tail_of(fp, fp_index);
        let tail_mask = if tail_width >= u64::BITS {
            u64::MAX
        } else {
            (1u64 << tail_width) - 1
        };

        let (found, _) = self.scan_node(self.get_lslot_start(slot), 0, tail_width, tail & tail_mask);
        (slot, found)
    }

    /// The `DHT_EVERYTHING` fast path. For a block itself there is
    /// nothing to do differently from [`Self::get_index_bit_scan`] — the
    /// speed difference this strategy buys lives entirely in how
    /// [`crate::segment::Segment`] locates the *physical block* to ask
    /// (the per-primary lazily-allocated secondary block, rather than a
    /// shared pool scan), not in how a block decodes its own bit-trie.
    /// Kept as its own method so callers can select it by
    /// [`crate::config::ReadStrategy`] and so Testable Property 6 (all
    /// three `get_index*` agree) has something concrete to check. Must
    /// agree with [`Self::get_index_trie_walk`] and
    /// [`Self::get_index_bit_scan`] for every input.
    #[must_use]
    pub fn get_index_dht(&self, fp: Fingerprint, fp_index: u32) -> (usize, bool) {
        self.get_index_bit_scan(fp, fp_index)
    }

    /// Recursively scans one trie node starting at bit `pos`, returning
    /// whether `tail` matches the leaf reached by following its bits and
    /// the bit position immediately past this node's encoding.
    ///
    /// Mirrors [`Bst`]'s on-disk encoding exactly (including each internal
    /// node's skipped-prefix run) rather than re-deriving it — a node's
    /// skip bits must be checked against `tail`, not assumed to match,
    /// or a tail differing only in a skipped run would falsely "find".
    /// Both children are always walked (even once a mismatch is known)
    /// because `pos` must advance past the full encoding regardless.
    fn scan_node(&self, pos: usize, depth_so_far: u32, tail_width: u32, tail: u64) -> (bool, usize) {
        const DEPTH_BITS: usize = 6;

        let mask = |width: u32| -> u64 {
            if width == 0 {
                0
            } else if width >= u64::BITS {
                u64::MAX
            } else {
                (1u64 << width) - 1
            }
        };

        let is_internal = self.bits.get(pos);
        let pos = pos + 1;
        if is_internal {
            let test_depth = self.bits.range(pos, pos + DEPTH_BITS) as u32;
            let pos = pos + DEPTH_BITS;
            let skip_width = test_depth - depth_so_far;
            let skip_prefix = if skip_width == 0 { 0 } else { self.bits.range(pos, pos + skip_width as usize) };
            let pos = pos + skip_width as usize;

            let skip_matches = skip_width == 0 || ((tail >> depth_so_far) & mask(skip_width)) == skip_prefix;
            let bit = (tail >> test_depth) & 1;

            let (left_found, left_end) = self.scan_node(pos, test_depth + 1, tail_width, tail);
            let (right_found, right_end) = self.scan_node(left_end, test_depth + 1, tail_width, tail);

            let found = skip_matches && if bit == 0 { left_found } else { right_found };
            (found, right_end)
        } else {
            let width = tail_width - depth_so_far;
            let suffix = if width == 0 { 0 } else { self.bits.range(pos, pos + width as usize) };
            let pos = pos + width as usize;
            let query = (tail >> depth_so_far) & mask(width);
            (query == suffix, pos)
        }
    }

    pub(crate) fn bits(&self) -> &BitStore {
        &self.bits
    }

    pub(crate) fn payloads(&self) -> &PayloadList {
        &self.payloads
    }

    pub(crate) fn payloads_mut(&mut self) -> &mut PayloadList {
        &mut self.payloads
    }

    pub(crate) fn set_first_extended_lslot(&mut self, value: usize) {
        self.first_extended_lslot = value;
    }

    pub(crate) fn ten_slice(&self) -> &[u32] {
        &self.ten
    }
}

impl<C: SegmentConfig> Default for Block<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TinyConfig;
    use crate::log::InMemoryLog;
    use crate::payload::LogOffset;

    fn fp(value: u64) -> Fingerprint {
        Fingerprint::from(value)
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let key = b"some-key";
        let offset = log.append(key, b"value").unwrap();

        let fingerprint = fp(0b0000_0000_1010);
        let outcome = block
            .write(fingerprint, 8, Payload::new(offset, 0), false)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Successful);

        let found = block.read(fingerprint, 8, 0, key, &log).unwrap();
        assert_eq!(found.unwrap().offset, offset);
    }

    #[test]
    fn read_miss_on_empty_slot() {
        let block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let result = block.read(fp(0b1111), 8, 0, b"anything", &log).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn second_write_to_same_slot_grows_trie_and_preserves_first_entry() {
        let mut block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let key_a = b"key-a";
        let key_b = b"key-b";
        let off_a = log.append(key_a, b"1").unwrap();
        let off_b = log.append(key_b, b"2").unwrap();

        // Both land in slot 2 (fp bits [5, 8)): fp_a has bit 6 set, fp_b
        // has bit 6 set too, but they differ in the tail (bits [8, ..)).
        let fp_a = fp(320); // bit6 + bit8  -> slot 2, tail 1
        let fp_b = fp(576); // bit6 + bit9  -> slot 2, tail 2

        block.write(fp_a, 8, Payload::new(off_a, 0), false).unwrap();
        block.write(fp_b, 8, Payload::new(off_b, 0), false).unwrap();

        assert_eq!(block.read(fp_a, 8, 0, key_a, &log).unwrap().unwrap().offset, off_a);
        assert_eq!(block.read(fp_b, 8, 0, key_b, &log).unwrap().unwrap().offset, off_b);
        assert_eq!(block.get_ten(0b010), 2);
    }

    #[test]
    fn update_in_place_leaves_bit_representation_unchanged() {
        let mut block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let key = b"key";
        let off1 = log.append(key, b"v1").unwrap();
        let off2 = log.append(key, b"v2").unwrap();

        let fingerprint = fp(0b0000_0000_0011);
        block.write(fingerprint, 8, Payload::new(off1, 0), false).unwrap();
        let before = block.bits().replicate();

        block.write(fingerprint, 8, Payload::new(off2, 0), true).unwrap();
        let after = block.bits();

        assert_eq!(before.len(), after.len());
        for i in 0..before.len() {
            assert_eq!(before.get(i), after.get(i));
        }
        assert_eq!(block.read(fingerprint, 8, 0, key, &log).unwrap().unwrap().offset, off2);
    }

    #[test]
    fn guarantee_update_on_missing_key_errors() {
        let mut block = Block::<TinyConfig>::new();
        let result = block.write(fp(0b1111), 8, Payload::new(LogOffset(0), 0), true);
        assert!(matches!(result, Err(Error::UpdateNotPossible)));
    }

    #[test]
    fn remove_then_read_is_a_miss_and_idempotent() {
        let mut block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let key = b"key";
        let offset = log.append(key, b"value").unwrap();
        let fingerprint = fp(0b0000_0000_0101);

        block.write(fingerprint, 8, Payload::new(offset, 0), false).unwrap();
        let removed = block.remove(fingerprint, 8).unwrap();
        assert_eq!(removed.unwrap().offset, offset);
        assert!(block.read(fingerprint, 8, 0, key, &log).unwrap().is_none());

        // Removing again is a no-op, not an error.
        assert!(block.remove(fingerprint, 8).unwrap().is_none());
    }

    #[test]
    fn bit_scan_agrees_with_trie_walk_and_read() {
        let mut block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let key_a = b"key-a";
        let key_b = b"key-b";
        let off_a = log.append(key_a, b"1").unwrap();
        let off_b = log.append(key_b, b"2").unwrap();

        // Same slot (bit6 set in both), differing tails so the slot's
        // trie grows past a single leaf before the agreement check.
        block.write(fp(320), 8, Payload::new(off_a, 0), false).unwrap();
        block.write(fp(576), 8, Payload::new(off_b, 0), false).unwrap();

        for (candidate, key) in [(fp(320), key_a.as_slice()), (fp(576), key_b.as_slice()), (fp(4089), b"nope")] {
            let via_read = block.read(candidate, 8, 0, key, &log).unwrap().is_some();
            let (_, via_scan) = block.get_index_bit_scan(candidate, 8);
            let (_, via_walk) = block.get_index_trie_walk(candidate, 8);
            let (_, via_dht) = block.get_index_dht(candidate, 8);
            assert_eq!(via_read, via_scan, "bit-scan disagreed with read for {candidate:?}");
            assert_eq!(via_read, via_walk, "trie-walk disagreed with read for {candidate:?}");
            assert_eq!(via_read, via_dht, "dht fast path disagreed with read for {candidate:?}");
        }
    }

    #[test]
    fn lslot_at_or_past_first_extended_returns_needs_extension() {
        let mut block = Block::<TinyConfig>::new();
        block.set_first_extended_lslot(3);
        // slot = fp bits [5, 8) for TinyConfig (SLOT_BITS = 3); bit5 + bit7 -> slot 5, past the guard at 3.
        let fingerprint = fp(160);
        let outcome = block
            .write(fingerprint, 8, Payload::new(LogOffset(0), 0), false)
            .unwrap();
        assert_eq!(outcome, WriteOutcome::NeedsExtension { lslot: 5 });
    }

    #[test]
    fn replicate_produces_independent_copy() {
        let mut block = Block::<TinyConfig>::new();
        let log = InMemoryLog::new();
        let key = b"key";
        let offset = log.append(key, b"value").unwrap();
        let fingerprint = fp(0b0000_0000_0110);
        block.write(fingerprint, 8, Payload::new(offset, 0), false).unwrap();

        let mut copy = block.replicate();
        copy.remove(fingerprint, 8).unwrap();

        assert!(block.read(fingerprint, 8, 0, key, &log).unwrap().is_some());
        assert!(copy.read(fingerprint, 8, 0, key, &log).unwrap().is_none());
    }
}
