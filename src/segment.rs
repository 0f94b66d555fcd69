// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A segment: `COUNT_SLOT` primary blocks plus their overflow layer,
//! routed by two fingerprint fields, with in-place [`Segment::expand`]
//! into two children when a bit of the fingerprint becomes
//! discriminating for this segment.
//!
//! Grounded on `original_source/segment/segment.h`'s `Segment<Traits>` —
//! the C++ template there becomes this crate's `Segment<C: SegmentConfig>`.

use log::{debug, trace};

use crate::block::{Block, WriteOutcome as BlockWriteOutcome};
use crate::bst::Bst;
use crate::config::SegmentConfig;
use crate::error::{Error, Result};
use crate::extension::{DhtExtension, ExtensionPool};
use crate::fingerprint::{Fingerprint, FINGERPRINT_SIZE};
use crate::log::Log;
use crate::payload::Payload;

/// The outcome of a successful [`Segment::write`] call. `NeedsSplit`
/// covers every capacity failure the segment could not resolve on its
/// own (a full extension layer, or a primary block that stayed full even
/// after `moveLSlotsToMakeSpace`) — the caller ([`crate::directory::Directory`])
/// is expected to call [`Segment::expand`] and retry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Successful,
    NeedsSplit,
}

/// The two overflow strategies a segment's primary blocks share, chosen
/// once at construction by [`SegmentConfig::DHT_EVERYTHING`].
enum ExtensionLayer<C: SegmentConfig> {
    Pool(ExtensionPool<C>),
    Dht(Vec<DhtExtension<C>>),
}

impl<C: SegmentConfig> ExtensionLayer<C> {
    fn new() -> Self {
        if C::DHT_EVERYTHING {
            Self::Dht((0..C::COUNT_SLOT).map(|_| DhtExtension::new()).collect())
        } else {
            Self::Pool(ExtensionPool::new())
        }
    }

    fn replicate(&self) -> Self {
        match self {
            Self::Pool(pool) => Self::Pool(pool.replicate()),
            Self::Dht(blocks) => Self::Dht(blocks.iter().map(DhtExtension::replicate).collect()),
        }
    }
}

/// Owns `COUNT_SLOT` primary [`Block`]s and their shared overflow layer.
/// `fp_index` is the bit position immediately above this segment's slot
/// field — `crate::directory::Directory` assigns it at creation
/// (`segmentCountLog + 2 * log2(COUNT_SLOT)`) and [`Segment::expand`]
/// increments it by exactly one per generation.
pub struct Segment<C: SegmentConfig> {
    primary: Vec<Block<C>>,
    extension: ExtensionLayer<C>,
    fp_index: u32,
}

impl<C: SegmentConfig> Segment<C> {
    /// A freshly allocated, empty segment rooted at `fp_index`.
    #[must_use]
    pub fn new(fp_index: u32) -> Self {
        Self {
            primary: (0..C::COUNT_SLOT).map(|_| Block::new()).collect(),
            extension: ExtensionLayer::new(),
            fp_index,
        }
    }

    #[must_use]
    pub fn fp_index(&self) -> u32 {
        self.fp_index
    }

    /// One of the `COUNT_SLOT` primary blocks, by index. Mostly useful for
    /// tests and diagnostics that want to inspect per-block state directly.
    #[must_use]
    pub fn block(&self, block_idx: usize) -> &Block<C> {
        &self.primary[block_idx]
    }

    /// Sum of every primary and extension block's entry count. `ten_all()`
    /// in spec.md's terms.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        let primary: usize = self.primary.iter().map(Block::total_entries).sum();
        let extension: usize = match &self.extension {
            ExtensionLayer::Pool(pool) => (0..pool.len()).map(|i| pool.get(i).block().total_entries()).sum(),
            ExtensionLayer::Dht(blocks) => blocks.iter().filter_map(DhtExtension::get).map(Block::total_entries).sum(),
        };
        primary + extension
    }

    fn block_idx(&self, fp: Fingerprint) -> usize {
        fp.range(self.fp_index - 2 * C::SLOT_BITS, self.fp_index - C::SLOT_BITS) as usize
    }

    fn slot_idx(&self, fp: Fingerprint) -> usize {
        fp.range(self.fp_index - C::SLOT_BITS, self.fp_index) as usize
    }

    /// Builds a fingerprint whose bits `[fp_index, 64)` are `tail` and
    /// whose lower bits are zero. [`Block::write_at_slot`]/`read_at_slot`/
    /// `remove_at_slot` are given their slot explicitly, so only the tail
    /// bits of the fingerprint they're handed are ever consulted.
    fn synthesize_fp(fp_index: u32, tail: u64) -> Fingerprint {
        Fingerprint(0).with_range(fp_index, FINGERPRINT_SIZE, tail)
    }

    /// Inserts `payload` for `fp`, resolving through the extension layer
    /// and `moveLSlotsToMakeSpace` as needed. See module docs for the
    /// retry bound.
    pub fn write(&mut self, fp: Fingerprint, payload: Payload, guarantee_update: bool) -> Result<WriteOutcome> {
        let block_idx = self.block_idx(fp);
        match self.try_write_primary(block_idx, fp, payload, guarantee_update)? {
            WriteOutcome::Successful => Ok(WriteOutcome::Successful),
            WriteOutcome::NeedsSplit => {
                if self.move_lslots_to_make_space(block_idx).is_err() {
                    return Ok(WriteOutcome::NeedsSplit);
                }
                self.try_write_primary(block_idx, fp, payload, guarantee_update)
            }
        }
    }

    /// One attempt at writing into `block_idx`'s primary block, retrying
    /// into the extension layer on `NeedsExtension`. Capacity failures
    /// become `NeedsSplit` rather than `Err`; `UpdateNotPossible`
    /// propagates, since it is a caller error, not a space problem.
    fn try_write_primary(&mut self, block_idx: usize, fp: Fingerprint, payload: Payload, guarantee_update: bool) -> Result<WriteOutcome> {
        match self.primary[block_idx].write(fp, self.fp_index, payload, guarantee_update) {
            Ok(BlockWriteOutcome::Successful) => Ok(WriteOutcome::Successful),
            Ok(BlockWriteOutcome::NeedsExtension { lslot }) => match self.write_into_extension(block_idx, lslot, fp, payload, guarantee_update) {
                Ok(()) => Ok(WriteOutcome::Successful),
                Err(Error::UpdateNotPossible) => Err(Error::UpdateNotPossible),
                Err(_) => Ok(WriteOutcome::NeedsSplit),
            },
            Err(Error::UpdateNotPossible) => Err(Error::UpdateNotPossible),
            Err(Error::BlockSpaceExhausted | Error::PayloadSpaceExhausted) => Ok(WriteOutcome::NeedsSplit),
            Err(e) => Err(e),
        }
    }

    fn write_into_extension(&mut self, block_idx: usize, lslot: usize, fp: Fingerprint, payload: Payload, guarantee_update: bool) -> Result<()> {
        match &mut self.extension {
            ExtensionLayer::Pool(pool) => {
                let (ext_idx, physical) = pool.reserve_slot(block_idx, lslot)?;
                match pool.get_mut(ext_idx).block_mut().write_at_slot(physical, fp, self.fp_index, payload, guarantee_update)? {
                    BlockWriteOutcome::Successful => Ok(()),
                    BlockWriteOutcome::NeedsExtension { .. } => Err(Error::ExtensionPoolFull),
                }
            }
            ExtensionLayer::Dht(blocks) => {
                // Addressed by the primary's own logical slot index, not a
                // position relative to `first_extended_lslot`: that
                // boundary keeps moving as more slots migrate, and a fixed
                // offset from a moving target would misaddress whichever
                // slot migrated first. The secondary has a full
                // `COUNT_SLOT`-slot `Block<C>` regardless, so there is no
                // space to save by renumbering.
                let secondary = blocks[block_idx].get_or_allocate();
                match secondary.write_at_slot(lslot, fp, self.fp_index, payload, guarantee_update)? {
                    BlockWriteOutcome::Successful => Ok(()),
                    BlockWriteOutcome::NeedsExtension { .. } => Err(Error::ExtensionPoolFull),
                }
            }
        }
    }

    /// Migrates `block_idx`'s last occupied logical slot (the one
    /// immediately below `first_extended_lslot`) into the extension
    /// layer, making its trie and payload space available to every slot
    /// below it. Fails once no slot is left to migrate
    /// (`first_extended_lslot == 0`).
    fn move_lslots_to_make_space(&mut self, block_idx: usize) -> Result<()> {
        let first_extended = self.primary[block_idx].first_extended_lslot();
        if first_extended == 0 {
            return Err(Error::ExtensionPoolFull);
        }
        let last_slot = first_extended - 1;
        let tail_width = FINGERPRINT_SIZE - self.fp_index;

        trace!("segment: moving lslot {last_slot} of block {block_idx} into the extension layer to make room");
        let (tails, payloads) = self.primary[block_idx].drain_slot(last_slot, tail_width);
        self.primary[block_idx].set_first_extended_lslot(last_slot);
        for (tail, payload) in tails.into_iter().zip(payloads) {
            let fp = Self::synthesize_fp(self.fp_index, tail);
            self.write_into_extension(block_idx, last_slot, fp, payload, false)?;
        }
        Ok(())
    }

    /// Looks up `fp`, consulting the extension layer when the routed slot
    /// has already migrated there.
    pub fn read<L: Log>(&self, fp: Fingerprint, extra_bits: u32, key: &[u8], log: &L) -> Result<Option<Payload>> {
        let block_idx = self.block_idx(fp);
        let slot = self.slot_idx(fp);
        let primary = &self.primary[block_idx];
        if primary.is_extended(slot) {
            self.read_from_extension(block_idx, slot, fp, extra_bits, key, log)
        } else {
            primary.read(fp, self.fp_index, extra_bits, key, log)
        }
    }

    fn read_from_extension<L: Log>(&self, block_idx: usize, lslot: usize, fp: Fingerprint, extra_bits: u32, key: &[u8], log: &L) -> Result<Option<Payload>> {
        match &self.extension {
            ExtensionLayer::Pool(pool) => match pool.locate_slot(block_idx, lslot) {
                Some((ext_idx, physical)) => pool.get(ext_idx).block().read_at_slot(physical, fp, self.fp_index, extra_bits, key, log),
                None => Ok(None),
            },
            ExtensionLayer::Dht(blocks) => match blocks[block_idx].get() {
                Some(secondary) => secondary.read_at_slot(lslot, fp, self.fp_index, extra_bits, key, log),
                None => Ok(None),
            },
        }
    }

    /// Removes the entry for `fp`, if present.
    pub fn remove(&mut self, fp: Fingerprint) -> Result<Option<Payload>> {
        let block_idx = self.block_idx(fp);
        let slot = self.slot_idx(fp);
        if self.primary[block_idx].is_extended(slot) {
            self.remove_from_extension(block_idx, slot, fp)
        } else {
            self.primary[block_idx].remove(fp, self.fp_index)
        }
    }

    fn remove_from_extension(&mut self, block_idx: usize, lslot: usize, fp: Fingerprint) -> Result<Option<Payload>> {
        match &mut self.extension {
            ExtensionLayer::Pool(pool) => match pool.locate_slot(block_idx, lslot) {
                Some((ext_idx, physical)) => pool.get_mut(ext_idx).block_mut().remove_at_slot(physical, fp, self.fp_index),
                None => Ok(None),
            },
            ExtensionLayer::Dht(blocks) => match blocks[block_idx].get_mut() {
                Some(secondary) => secondary.remove_at_slot(lslot, fp, self.fp_index),
                None => Ok(None),
            },
        }
    }

    /// A byte-identical deep copy, used by [`Self::expand`] to snapshot a
    /// parent before staging children from it.
    #[must_use]
    pub fn replicate(&self) -> Self {
        Self {
            primary: self.primary.iter().map(Block::replicate).collect(),
            extension: self.extension.replicate(),
            fp_index: self.fp_index,
        }
    }

    /// Splits this segment into two children at `fp_index + 1`. Which
    /// child an entry belongs to is decided by its old block index's
    /// parity (`blkIdx % 2`, i.e. the fingerprint bit immediately below
    /// the block field) — the same bit the directory consumes next when
    /// it doubles. The tail's own first bit only chooses the new logical
    /// slot within whichever child it lands in. The parent is read-only
    /// throughout; nothing is mutated unless both children build
    /// successfully.
    pub fn expand(&self) -> Result<(Self, Self)> {
        if self.fp_index >= FINGERPRINT_SIZE {
            return Err(Error::SplitImpossible);
        }
        debug!("segment: expanding at fp_index={}, total_entries={}", self.fp_index, self.total_entries());
        let new_fp_index = self.fp_index + 1;
        let old_tail_width = FINGERPRINT_SIZE - self.fp_index;
        let half = C::COUNT_SLOT / 2;

        // staged[old_block_idx % 2][new_block_idx] = (new_slot_idx, remaining_tail, payload)
        let mut staged: [Vec<Vec<(usize, u64, Payload)>>; 2] = [
            (0..C::COUNT_SLOT).map(|_| Vec::new()).collect(),
            (0..C::COUNT_SLOT).map(|_| Vec::new()).collect(),
        ];

        for old_block_idx in 0..C::COUNT_SLOT {
            let parity = old_block_idx % 2;
            let first_extended = self.primary[old_block_idx].first_extended_lslot();
            for old_slot_idx in 0..C::COUNT_SLOT {
                let (tails, payloads) = if old_slot_idx < first_extended {
                    (
                        self.primary[old_block_idx].slot_tails(old_slot_idx, old_tail_width),
                        self.primary[old_block_idx].slot_payloads(old_slot_idx),
                    )
                } else {
                    self.extended_slot_entries(old_block_idx, old_slot_idx, old_tail_width)
                };

                for (tail, payload) in tails.into_iter().zip(payloads) {
                    let first_bit = (tail & 1) as usize;
                    let remaining_tail = tail >> 1;
                    let new_block_idx = (old_block_idx / 2) + half * (old_slot_idx % 2);
                    let new_slot_idx = (old_slot_idx / 2) + half * first_bit;
                    staged[parity][new_block_idx].push((new_slot_idx, remaining_tail, payload));
                }
            }
        }

        let [staged0, staged1] = staged;
        let child0 = Self::build_from_staged(new_fp_index, &staged0)?;
        let child1 = Self::build_from_staged(new_fp_index, &staged1)?;
        Ok((child0, child1))
    }

    /// Read-only extraction of an extension-resident logical slot's tails
    /// and payloads, for use by [`Self::expand`].
    fn extended_slot_entries(&self, block_idx: usize, lslot: usize, tail_width: u32) -> (Vec<u64>, Vec<Payload>) {
        match &self.extension {
            ExtensionLayer::Pool(pool) => match pool.locate_slot(block_idx, lslot) {
                Some((ext_idx, physical)) => {
                    let block = pool.get(ext_idx).block();
                    (block.slot_tails(physical, tail_width), block.slot_payloads(physical))
                }
                None => (Vec::new(), Vec::new()),
            },
            ExtensionLayer::Dht(blocks) => match blocks[block_idx].get() {
                Some(secondary) => (secondary.slot_tails(lslot, tail_width), secondary.slot_payloads(lslot)),
                None => (Vec::new(), Vec::new()),
            },
        }
    }

    /// Builds one child segment from its staged `(new_slot_idx,
    /// remaining_tail, payload)` triples, one `Vec` per new primary block
    /// index. Chooses each block's `first_extended_lslot` by scanning
    /// slots from `COUNT_SLOT - 1` down to `0`, keeping as many slots
    /// primary-resident as fit.
    fn build_from_staged(fp_index: u32, per_block: &[Vec<(usize, u64, Payload)>]) -> Result<Self> {
        let tail_width = FINGERPRINT_SIZE - fp_index;
        let mut segment = Self::new(fp_index);

        for (block_idx, entries) in per_block.iter().enumerate() {
            let mut by_slot: Vec<Vec<(u64, Payload)>> = vec![Vec::new(); C::COUNT_SLOT];
            for &(slot, tail, payload) in entries {
                by_slot[slot].push((tail, payload));
            }

            let first_extended = Self::choose_first_extended_lslot(&by_slot, tail_width);

            for (slot, slot_entries) in by_slot.iter().enumerate().take(first_extended) {
                for &(tail, payload) in slot_entries {
                    let fp = Self::synthesize_fp(fp_index, tail);
                    match segment.primary[block_idx].write_at_slot(slot, fp, fp_index, payload, false)? {
                        BlockWriteOutcome::Successful => {}
                        BlockWriteOutcome::NeedsExtension { .. } => return Err(Error::SplitImpossible),
                    }
                }
            }
            segment.primary[block_idx].set_first_extended_lslot(first_extended);

            for (slot, slot_entries) in by_slot.iter().enumerate().skip(first_extended) {
                for &(tail, payload) in slot_entries {
                    let fp = Self::synthesize_fp(fp_index, tail);
                    segment.write_into_extension(block_idx, slot, fp, payload, false)?;
                }
            }
        }

        Ok(segment)
    }

    /// `bits_needed < N` and `payload_size_needed <= PAYLOADS_LENGTH` for
    /// the candidate `firstExtendedLSlot = boundary + 1`, checked from the
    /// highest boundary down; the first that fits wins, and an
    /// all-extended block (`firstExtendedLSlot = 0`) is the fallback.
    fn choose_first_extended_lslot(by_slot: &[Vec<(u64, Payload)>], tail_width: u32) -> usize {
        let slot_trie_bits: Vec<usize> = by_slot
            .iter()
            .map(|entries| {
                let mut bst = Bst::empty(tail_width);
                for &(tail, _) in entries {
                    bst.insert(tail);
                }
                bst.encoded_len()
            })
            .collect();
        let slot_payload_counts: Vec<usize> = by_slot.iter().map(Vec::len).collect();

        for boundary in (0..C::COUNT_SLOT).rev() {
            let first_extended = boundary + 1;
            let guard_len = C::COUNT_SLOT - first_extended;
            let capacity_bits = C::N - guard_len;

            let payload_needed: usize = slot_payload_counts[..first_extended].iter().sum();
            let trie_bits: usize = slot_trie_bits[..first_extended].iter().sum();
            let bits_needed = C::COUNT_SLOT + payload_needed + trie_bits;

            if bits_needed < capacity_bits && payload_needed <= C::PAYLOADS_LENGTH {
                return first_extended;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TinyConfig, TinyDhtConfig};
    use crate::hash::{Hasher, Xxh3Hasher};
    use crate::log::InMemoryLog;
    use test_log::test;

    fn fp_for(key: &[u8]) -> Fingerprint {
        Xxh3Hasher.hash_digest(key).0
    }

    #[test]
    fn write_then_read_round_trips_through_primary_block() {
        let mut segment = Segment::<TinyConfig>::new(2 * TinyConfig::SLOT_BITS);
        let log = InMemoryLog::new();
        let key = b"hello";
        let offset = log.append(key, b"value").unwrap();
        let fp = fp_for(key);

        let outcome = segment.write(fp, Payload::new(offset, 0), false).unwrap();
        assert_eq!(outcome, WriteOutcome::Successful);

        let found = segment.read(fp, 0, key, &log).unwrap();
        assert_eq!(found.unwrap().offset, offset);
    }

    #[test]
    fn remove_drops_entry_and_is_idempotent() {
        let mut segment = Segment::<TinyConfig>::new(2 * TinyConfig::SLOT_BITS);
        let log = InMemoryLog::new();
        let key = b"gone";
        let offset = log.append(key, b"value").unwrap();
        let fp = fp_for(key);

        segment.write(fp, Payload::new(offset, 0), false).unwrap();
        assert!(segment.remove(fp).unwrap().is_some());
        assert!(segment.read(fp, 0, key, &log).unwrap().is_none());
        assert!(segment.remove(fp).unwrap().is_none());
    }

    #[test]
    fn writing_many_colliding_keys_overflows_into_extension_without_loss() {
        let mut segment = Segment::<TinyConfig>::new(2 * TinyConfig::SLOT_BITS);
        let log = InMemoryLog::new();

        let mut written = Vec::new();
        for i in 0..40u32 {
            let key = format!("key-{i}");
            let offset = log.append(key.as_bytes(), b"v").unwrap();
            // Collapse every key onto block 0 so this block's primary
            // fills and has to push slots into the extension layer.
            let fp = fp_for(key.as_bytes());
            let fp = fp.with_range(5, 8, 0);
            segment.write(fp, Payload::new(offset, 0), false).unwrap();
            written.push((key, fp, offset));
        }

        for (key, fp, offset) in &written {
            let found = segment.read(*fp, 0, key.as_bytes(), &log).unwrap();
            assert_eq!(found.map(|p| p.offset), Some(*offset), "missing {key}");
        }
    }

    /// Deliberately migrates more than one logical slot of the same
    /// primary block into the `DHT_EVERYTHING` secondary, one slot at a
    /// time via repeated [`Segment::write`] calls. Regression test for an
    /// addressing bug where a slot migrated by an earlier call would be
    /// misaddressed (or overwritten) once a later call lowered
    /// `first_extended_lslot` again; see `DESIGN.md`.
    #[test]
    fn dht_everything_migrates_more_than_one_slot_of_the_same_block_safely() {
        let mut segment = Segment::<TinyDhtConfig>::new(2 * TinyDhtConfig::SLOT_BITS);
        let log = InMemoryLog::new();

        let mut tail_counter = 0u64;
        let mut next_tail = || {
            tail_counter += 1;
            tail_counter
        };

        // All of these fingerprints share block index 0 (low `SLOT_BITS`
        // bits zero); one entry per slot fills every slot of the block.
        let mut written = Vec::new();
        for slot in 0..TinyDhtConfig::COUNT_SLOT {
            let key = format!("fill-slot-{slot}");
            let offset = log.append(key.as_bytes(), b"v").unwrap();
            let fp = Fingerprint::from(((slot as u64) << TinyDhtConfig::SLOT_BITS) | (next_tail() << (2 * TinyDhtConfig::SLOT_BITS)));
            segment.write(fp, Payload::new(offset, 0), false).unwrap();
            written.push((key, fp, offset));
        }

        // Keep inserting new, distinct keys into slots 6 and 7: each round
        // exceeds the block's payload capacity and forces another call to
        // `move_lslots_to_make_space`, migrating a further slot (7, then
        // 6, ...) into the shared secondary block.
        for round in 0..4u32 {
            for slot in [7usize, 6usize] {
                let key = format!("overflow-{round}-{slot}");
                let offset = log.append(key.as_bytes(), b"v").unwrap();
                let fp = Fingerprint::from(((slot as u64) << TinyDhtConfig::SLOT_BITS) | (next_tail() << (2 * TinyDhtConfig::SLOT_BITS)));
                segment.write(fp, Payload::new(offset, 0), false).unwrap();
                written.push((key, fp, offset));
            }
        }

        assert!(
            segment.block(0).first_extended_lslot() < TinyDhtConfig::COUNT_SLOT,
            "this scenario must push at least one slot into the extension layer"
        );

        for (key, fp, offset) in &written {
            let found = segment.read(*fp, 0, key.as_bytes(), &log).unwrap();
            assert_eq!(found.map(|p| p.offset), Some(*offset), "missing or misaddressed {key}");
        }
    }

    #[test]
    fn expand_conserves_total_entries_and_every_key_remains_readable() {
        let mut segment = Segment::<TinyConfig>::new(2 * TinyConfig::SLOT_BITS);
        let log = InMemoryLog::new();

        let mut written = Vec::new();
        for i in 0..24u32 {
            let key = format!("expand-key-{i}");
            let offset = log.append(key.as_bytes(), b"v").unwrap();
            let fp = fp_for(key.as_bytes());
            segment.write(fp, Payload::new(offset, 0), false).unwrap();
            written.push((key, fp, offset));
        }

        let total_before = segment.total_entries();
        let (child0, child1) = segment.expand().unwrap();
        assert_eq!(total_before, child0.total_entries() + child1.total_entries());

        for (key, fp, offset) in &written {
            // A child is picked by the old block index's parity: the
            // fingerprint bit immediately below the block field.
            let parity_bit = fp.bit(segment.fp_index() - 2 * TinyConfig::SLOT_BITS);
            let child = if parity_bit { &child1 } else { &child0 };
            let found = child.read(*fp, 0, key.as_bytes(), &log).unwrap();
            assert_eq!(found.map(|p| p.offset), Some(*offset), "missing {key} after expand");
        }
    }

    #[test]
    fn expand_at_exhausted_fingerprint_depth_is_split_impossible() {
        let segment = Segment::<TinyConfig>::new(FINGERPRINT_SIZE);
        assert!(matches!(segment.expand(), Err(Error::SplitImpossible)));
    }

    /// Same overflow scenario as
    /// `writing_many_colliding_keys_overflows_into_extension_without_loss`,
    /// but against the `DHT_EVERYTHING` per-primary lazy-secondary-block
    /// overflow strategy instead of the pooled one.
    #[test]
    fn dht_everything_overflow_strategy_also_preserves_every_entry() {
        let mut segment = Segment::<TinyDhtConfig>::new(2 * TinyDhtConfig::SLOT_BITS);
        let log = InMemoryLog::new();

        let mut written = Vec::new();
        for i in 0..40u32 {
            let key = format!("dht-key-{i}");
            let offset = log.append(key.as_bytes(), b"v").unwrap();
            let fp = fp_for(key.as_bytes());
            let fp = fp.with_range(5, 8, 0);
            segment.write(fp, Payload::new(offset, 0), false).unwrap();
            written.push((key, fp, offset));
        }

        for (key, fp, offset) in &written {
            let found = segment.read(*fp, 0, key.as_bytes(), &log).unwrap();
            assert_eq!(found.map(|p| p.offset), Some(*offset), "missing {key}");
        }
    }
}
