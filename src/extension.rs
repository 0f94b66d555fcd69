// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Overflow storage for the trailing logical slots of a primary block
//! that has run out of trie or payload space.
//!
//! Two addressing strategies exist side by side, selected once at
//! construction through [`crate::config::SegmentConfig::DHT_EVERYTHING`]
//! — a build-time policy, never a runtime flag (Design Notes §9):
//!
//! - [`ExtensionPool`]: a fixed number of [`Block`]s shared across every
//!   primary block in a segment. A physical slot is addressed by
//!   `(primary_block_idx, logical_slot_before)` through
//!   [`calculate_extended_block_index`] / [`calculate_physical_lslot_index`].
//! - [`DhtExtension`]: each primary block owns at most one lazily
//!   allocated secondary [`Block`], addressed by the migrated slot's own
//!   logical slot index. Simpler addressing, more memory.

use crate::block::Block;
use crate::config::SegmentConfig;
use crate::error::{Error, Result};

/// A stable function of `(primary_block_idx, logical_slot)` choosing
/// which of the pool's extension blocks owns that (primary, slot) pair.
/// Grounded on `original_source/segment/segment.h`'s
/// `CALCULATE_EXTENDED_BLOCK_INDEX`: consecutive primaries are spread
/// round-robin across the pool so no single extension block is favored.
#[must_use]
pub fn calculate_extended_block_index(primary_block_idx: usize, logical_slot: usize, pool_size: usize) -> usize {
    debug_assert!(pool_size > 0);
    (primary_block_idx + logical_slot) % pool_size
}

/// One physical slot inside an extension block, tagged with the primary
/// block index and logical-slot-before it absorbed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct SlotTag {
    primary_block_idx: usize,
    logical_slot_before: usize,
}

/// One overflow block in a segment's shared extension pool.
pub struct ExtensionBlock<C: SegmentConfig> {
    block: Block<C>,
    /// `lslot_sizes_bw` in spec.md §3: per-physical-slot tag naming the
    /// primary block and logical slot a physical slot was assigned to.
    tags: Vec<Option<SlotTag>>,
}

impl<C: SegmentConfig> ExtensionBlock<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            block: Block::new(),
            tags: vec![None; C::COUNT_SLOT],
        }
    }

    #[must_use]
    pub fn block(&self) -> &Block<C> {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut Block<C> {
        &mut self.block
    }

    /// Finds the physical slot this extension block has reserved for
    /// `(primary_block_idx, logical_slot_before)`, allocating the next
    /// free physical slot if none exists yet. `O(COUNT_SLOT)`, as
    /// spec.md §4.4 explicitly accepts.
    fn physical_slot_for(&mut self, primary_block_idx: usize, logical_slot_before: usize) -> Option<usize> {
        let wanted = SlotTag {
            primary_block_idx,
            logical_slot_before,
        };
        if let Some(existing) = self.tags.iter().position(|t| *t == Some(wanted)) {
            return Some(existing);
        }
        let free = self.tags.iter().position(Option::is_none)?;
        self.tags[free] = Some(wanted);
        Some(free)
    }

    /// Returns the already-assigned physical slot for
    /// `(primary_block_idx, logical_slot_before)`, without allocating.
    #[must_use]
    pub fn calculate_physical_lslot_index(&self, primary_block_idx: usize, logical_slot_before: usize) -> Option<usize> {
        let wanted = SlotTag {
            primary_block_idx,
            logical_slot_before,
        };
        self.tags.iter().position(|t| *t == Some(wanted))
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tags.iter().all(Option::is_some)
    }
}

impl<C: SegmentConfig> Default for ExtensionBlock<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// A segment's fixed pool of [`ExtensionBlock`]s, shared across every
/// primary block.
pub struct ExtensionPool<C: SegmentConfig> {
    blocks: Vec<ExtensionBlock<C>>,
}

impl<C: SegmentConfig> ExtensionPool<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: (0..C::SEGMENT_EXTENSION_BLOCK_SIZE).map(|_| ExtensionBlock::new()).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> &ExtensionBlock<C> {
        &self.blocks[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut ExtensionBlock<C> {
        &mut self.blocks[idx]
    }

    /// Whether every extension block in the pool is fully occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.blocks.iter().all(ExtensionBlock::is_full)
    }

    /// Finds (allocating if necessary) the extension block and physical
    /// slot that owns `(primary_block_idx, logical_slot_before)`,
    /// starting from the block [`calculate_extended_block_index`] names
    /// and probing forward if that one is full.
    pub fn reserve_slot(&mut self, primary_block_idx: usize, logical_slot_before: usize) -> Result<(usize, usize)> {
        let pool_size = self.blocks.len();
        if pool_size == 0 {
            return Err(Error::ExtensionPoolFull);
        }
        let start = calculate_extended_block_index(primary_block_idx, logical_slot_before, pool_size);
        for offset in 0..pool_size {
            let idx = (start + offset) % pool_size;
            if let Some(physical) = self.blocks[idx].physical_slot_for(primary_block_idx, logical_slot_before) {
                return Ok((idx, physical));
            }
        }
        Err(Error::ExtensionPoolFull)
    }

    /// Locates the already-assigned `(extension_block_idx, physical_slot)`
    /// for `(primary_block_idx, logical_slot_before)`, without allocating
    /// a new one. Used by read/remove, which must never create state.
    #[must_use]
    pub fn locate_slot(&self, primary_block_idx: usize, logical_slot_before: usize) -> Option<(usize, usize)> {
        let pool_size = self.blocks.len();
        if pool_size == 0 {
            return None;
        }
        let start = calculate_extended_block_index(primary_block_idx, logical_slot_before, pool_size);
        for offset in 0..pool_size {
            let idx = (start + offset) % pool_size;
            if let Some(physical) = self.blocks[idx].calculate_physical_lslot_index(primary_block_idx, logical_slot_before) {
                return Some((idx, physical));
            }
        }
        None
    }

    #[must_use]
    pub fn replicate(&self) -> Self
    where
        Block<C>: Sized,
    {
        Self {
            blocks: self
                .blocks
                .iter()
                .map(|eb| ExtensionBlock {
                    block: eb.block.replicate(),
                    tags: eb.tags.clone(),
                })
                .collect(),
        }
    }
}

impl<C: SegmentConfig> Default for ExtensionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The `DHT_EVERYTHING` overflow strategy: each primary block owns at
/// most one lazily allocated secondary [`Block`], indexed by the same
/// logical slot index (`lslot`) it occupies in the primary, rather than
/// a pool shared across primaries. Since the secondary is a
/// full-capacity `Block<C>` regardless of how many slots have migrated,
/// addressing it by `lslot` directly avoids re-deriving a position
/// relative to the (monotonically shrinking) `first_extended_lslot`
/// boundary, which would otherwise shift underneath slots migrated in
/// earlier calls.
#[derive(Default)]
pub struct DhtExtension<C: SegmentConfig> {
    secondary: Option<Block<C>>,
}

impl<C: SegmentConfig> DhtExtension<C> {
    #[must_use]
    pub fn new() -> Self {
        Self { secondary: None }
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn get_or_allocate(&mut self) -> &mut Block<C> {
        self.secondary.get_or_insert_with(Block::new)
    }

    #[must_use]
    pub fn get(&self) -> Option<&Block<C>> {
        self.secondary.as_ref()
    }

    /// As [`Self::get`], but mutable — never allocates. Used by removal,
    /// which must not materialize a secondary block just to discover it
    /// holds nothing.
    pub fn get_mut(&mut self) -> Option<&mut Block<C>> {
        self.secondary.as_mut()
    }

    #[must_use]
    pub fn replicate(&self) -> Self {
        Self {
            secondary: self.secondary.as_ref().map(Block::replicate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TinyConfig;

    #[test]
    fn reserve_slot_is_stable_and_reusable() {
        let mut pool = ExtensionPool::<TinyConfig>::new();
        let first = pool.reserve_slot(2, 5).unwrap();
        let again = pool.reserve_slot(2, 5).unwrap();
        assert_eq!(first, again);
        assert_eq!(pool.locate_slot(2, 5), Some(first));
    }

    #[test]
    fn distinct_keys_get_distinct_physical_slots() {
        let mut pool = ExtensionPool::<TinyConfig>::new();
        let a = pool.reserve_slot(0, 0).unwrap();
        let b = pool.reserve_slot(0, 1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn locate_slot_without_reserving_is_none() {
        let pool = ExtensionPool::<TinyConfig>::new();
        assert!(pool.locate_slot(0, 0).is_none());
    }

    #[test]
    fn pool_reports_full_once_every_physical_slot_is_reserved() {
        let mut pool = ExtensionPool::<TinyConfig>::new();
        let total_physical = pool.len() * TinyConfig::COUNT_SLOT;
        for i in 0..total_physical {
            pool.reserve_slot(i, i).unwrap();
        }
        assert!(pool.is_full());
        assert!(matches!(pool.reserve_slot(9999, 9999), Err(Error::ExtensionPoolFull)));
    }

    #[test]
    fn dht_extension_allocates_lazily() {
        let mut dht = DhtExtension::<TinyConfig>::new();
        assert!(!dht.is_allocated());
        dht.get_or_allocate();
        assert!(dht.is_allocated());
    }
}
