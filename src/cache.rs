//! String-like random access to a [`Source`] through a bounded set of blocks.
//!
//! [`BlockCache`] is the primary type. It addresses a source by byte offset or
//! byte range as if it was loaded in memory as a whole, while keeping only a
//! limited number of fixed-size blocks resident. Blocks are loaded on demand
//! and the least recently used ones are evicted once the limit is reached.
//!
//! # Things to note
//!
//! The limit of resident blocks is soft. A single request that needs more
//! blocks than the limit gets them all, and the excess is evicted by the next
//! request that loads something.
//!
//! The most recently served block is remembered, and repeated reads of single
//! bytes or ranges within it skip the lookup entirely. These reads do not
//! update the recency of the block.
//!
//! Nothing here is thread-safe. All operations take `&mut self` and perform
//! blocking IO on the source when a block is missing.

// Offsets within a block are always smaller than the block size, which is a
// `usize`, so casting them from u64 does not truncate.
#![allow(clippy::cast_possible_truncation)]

use core::{
    cmp, fmt, mem,
    ops::{Bound, RangeBounds},
};
use std::{collections::HashMap, io};

use tracing::{debug, trace};

use crate::block::{Block, Clock, Source};

mod search;

/// The default size of a block in bytes, which is 256 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 28;

/// The default maximum number of resident blocks.
pub const DEFAULT_RESIDENT_BLOCKS: usize = 2;

/// An error returned when creating a [`BlockCache`] with invalid [`Options`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The block size is zero.
    #[error("blockcache: block size must be positive")]
    ZeroBlockSize,
    /// The maximum number of resident blocks is zero.
    #[error("blockcache: resident block limit must be positive")]
    ZeroResidentBlocks,
}

/// Options to create a [`BlockCache`] with.
#[derive(Clone, Debug)]
pub struct Options {
    block_size: usize,
    resident_blocks: usize,
    clock: Option<Clock>,
}

impl Default for Options {
    #[inline(always)]
    fn default() -> Options {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            resident_blocks: DEFAULT_RESIDENT_BLOCKS,
            clock: None,
        }
    }
}

impl Options {
    /// Creates options with [`DEFAULT_BLOCK_SIZE`] and
    /// [`DEFAULT_RESIDENT_BLOCKS`], and a clock of its own.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Options {
        Self::default()
    }

    /// Sets the size of a single block in bytes.
    #[inline(always)]
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Options {
        self.block_size = block_size;
        self
    }

    /// Sets the maximum number of resident blocks. The limit is exceeded only
    /// by requests spanning more blocks than that.
    #[inline(always)]
    #[must_use]
    pub fn resident_blocks(mut self, resident_blocks: usize) -> Options {
        self.resident_blocks = resident_blocks;
        self
    }

    /// Sets the clock used to order blocks by recency. Pass a clone of the
    /// same clock to several caches to order their blocks consistently.
    #[inline(always)]
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Options {
        self.clock = Some(clock);
        self
    }

    /// Checks whether these options can be used to create a cache.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroBlockSize`] or
    /// [`ConfigError::ZeroResidentBlocks`] if either value is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.resident_blocks == 0 {
            return Err(ConfigError::ZeroResidentBlocks);
        }
        Ok(())
    }

    /// Creates a cache over `source` with these options.
    ///
    /// # Errors
    ///
    /// See [`Options::validate`].
    #[inline(always)]
    pub fn open<S: Source>(self, source: S) -> Result<BlockCache<S>, ConfigError> {
        BlockCache::with_options(source, self)
    }
}

/// A place for a block in the cache. Slots are never removed, and the blocks
/// they hold are refilled in place to reuse the buffers.
#[derive(Debug)]
struct Slot {
    block: Block,
    /// The index of the block, if resident.
    index: Option<u64>,
}

/// The most recently served block, which is checked before anything else.
/// It refers to a slot rather than a block index, so that a hit costs a
/// comparison and nothing more.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FastPath {
    slot: usize,
    start: u64,
    end: u64,
}

impl FastPath {
    #[inline(always)]
    fn contains(self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// A cache of fixed-size blocks giving random access to a [`Source`].
///
/// Blocks are addressed by index, which is the offset divided by the block
/// size. Every read computes the blocks it needs, loads those that are
/// missing, and bumps the recency of those that are resident. If loading
/// would exceed the resident limit, the least recently used blocks outside of
/// the requested span are evicted first, and their buffers are reused.
///
/// The source is owned, although it can be borrowed by passing `&mut S`, as
/// [`Source`] is implemented for mutable references.
///
/// ```
/// use blockreader::{io::Memory, Options};
///
/// let mut cache = Options::new()
///     .block_size(4)
///     .resident_blocks(2)
///     .open(Memory::new(b"0123456789"))?;
///
/// assert_eq!(cache.read(3..=5)?, b"345");
/// assert_eq!(cache.get(9)?, Some(b'9'));
/// assert_eq!(cache.find("78", 0)?, Some(7));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct BlockCache<S> {
    /// The underlying source of data.
    source: S,
    /// The size of every block, except possibly the last one.
    block_size: usize,
    /// The number of resident blocks to trim down to when loading.
    resident_limit: usize,
    /// The sequence ordering blocks by recency.
    clock: Clock,
    /// Storage of the blocks. Grows up to the largest number of blocks
    /// resident at once.
    slots: Vec<Slot>,
    /// Block index to the slot holding it.
    resident: HashMap<u64, usize>,
    /// Slots with no block and no buffer.
    vacant: Vec<usize>,
    /// The most recently served block, if still resident.
    fast: Option<FastPath>,
}

impl<S: Source> BlockCache<S> {
    /// Creates a cache over `source` with default [`Options`].
    #[must_use]
    pub fn new(source: S) -> Self {
        Self::build(source, Options::default())
    }

    /// Creates a cache over `source` with the given `options`.
    ///
    /// # Errors
    ///
    /// See [`Options::validate`].
    pub fn with_options(source: S, options: Options) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self::build(source, options))
    }

    fn build(source: S, options: Options) -> Self {
        debug!(
            block_size = options.block_size,
            resident_blocks = options.resident_blocks,
            "block cache created"
        );
        Self {
            source,
            block_size: options.block_size,
            resident_limit: options.resident_blocks,
            clock: options.clock.unwrap_or_default(),
            slots: Vec::new(),
            resident: HashMap::new(),
            vacant: Vec::new(),
            fast: None,
        }
    }

    /// Returns the byte at `offset`, or `None` if it is past the end.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if the block has to be loaded and
    /// loading fails.
    pub fn get(&mut self, offset: u64) -> io::Result<Option<u8>> {
        if let Some(fast) = self.fast {
            if fast.contains(offset) {
                return Ok(Some(self.block(fast.slot).data()[(offset - fast.start) as usize]));
            }
        }
        let (index, within) = self.locate(offset);
        let slot = self.slot_for(index)?;
        self.cache_slot(slot);
        Ok(self.block(slot).data().get(within).copied())
    }

    /// Returns a copy of the bytes in `range`.
    ///
    /// The result is shorter than the range if the range extends past the end
    /// of the source, and empty if the range is empty. A range with no end
    /// reads until the end of the source.
    ///
    /// The last block of the range becomes the most recently served one, as
    /// reads tend to continue forward.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if any of the blocks has to be loaded
    /// and loading fails.
    pub fn read<R: RangeBounds<u64>>(&mut self, range: R) -> io::Result<Vec<u8>> {
        let Some((first, last)) = inclusive(&range) else {
            return Ok(Vec::new());
        };
        let Some(last) = last else {
            let mut bytes = Vec::new();
            self.for_each_block(first.., |chunk| bytes.extend_from_slice(chunk))?;
            return Ok(bytes);
        };

        if let Some(fast) = self.fast {
            if fast.contains(first) && last < fast.end {
                let data = self.block(fast.slot).data();
                let range = (first - fast.start) as usize..=(last - fast.start) as usize;
                return Ok(data[range].to_vec());
            }
        }

        let (first_index, first_within) = self.locate(first);
        let (last_index, last_within) = self.locate(last);
        if first_index == last_index {
            let slot = self.slot_for(first_index)?;
            self.cache_slot(slot);
            return Ok(clamp(self.block(slot).data(), first_within, last_within + 1).to_vec());
        }

        // Resident blocks of the span are touched before anything is loaded.
        let mut touched: Vec<(u64, usize)> = self
            .resident
            .iter()
            .filter(|&(&index, _)| first_index <= index && index <= last_index)
            .map(|(&index, &slot)| (index, slot))
            .collect();
        touched.sort_unstable();
        for (_, slot) in touched {
            self.slots[slot].block.touch(&self.clock);
        }
        let end_index = self.load(first_index, last_index)?;

        let mut bytes = Vec::new();
        for index in first_index..=end_index {
            let data = self.block(self.resident_slot(index)).data();
            let from = if index == first_index { first_within } else { 0 };
            let to = if index == last_index {
                last_within + 1
            } else {
                data.len()
            };
            bytes.extend_from_slice(clamp(data, from, to));
        }
        let slot = self.resident_slot(end_index);
        self.cache_slot(slot);
        Ok(bytes)
    }

    /// Returns the block containing `offset`, loading it if necessary.
    ///
    /// This is meant for parsers handling block boundaries on their own. The
    /// block may be empty if `offset` is past the end of the source.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if the block has to be loaded and
    /// loading fails.
    pub fn block_containing(&mut self, offset: u64) -> io::Result<&Block> {
        if let Some(fast) = self.fast {
            if fast.contains(offset) {
                return Ok(self.block(fast.slot));
            }
        }
        let (index, _) = self.locate(offset);
        let slot = self.slot_for(index)?;
        self.cache_slot(slot);
        Ok(self.block(slot))
    }

    /// Returns a cursor over the parts of blocks within `range`.
    ///
    /// Every chunk is a view into a resident block. The first and the last
    /// chunks may be partial, the others are whole blocks. The cursor stops
    /// at the end of the range or the end of the source, whichever is first.
    /// Blocks are loaded one at a time and may be evicted by the following
    /// ones, so the iteration respects the resident limit.
    #[must_use]
    pub fn blocks<R: RangeBounds<u64>>(&mut self, range: R) -> Chunks<'_, S> {
        let bounds = inclusive(&range);
        let (index, skip) = bounds.map_or((0, 0), |(first, _)| self.locate(first));
        let last = bounds
            .and_then(|(_, last)| last)
            .map(|last| self.locate(last));
        Chunks {
            cache: self,
            index,
            skip,
            last,
            done: bounds.is_none(),
        }
    }

    /// Calls `f` for every chunk of blocks within `range`. See
    /// [`BlockCache::blocks`] for details.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if loading a block fails. Chunks
    /// preceding the failing block have already been passed to `f`.
    pub fn for_each_block<R, F>(&mut self, range: R, mut f: F) -> io::Result<()>
    where
        R: RangeBounds<u64>,
        F: FnMut(&[u8]),
    {
        let mut chunks = self.blocks(range);
        while let Some(chunk) = chunks.next_chunk()? {
            f(chunk);
        }
        Ok(())
    }

    /// Returns the slot of the resident block `index`, touching it, or loads
    /// it if missing.
    fn slot_for(&mut self, index: u64) -> io::Result<usize> {
        if let Some(&slot) = self.resident.get(&index) {
            self.slots[slot].block.touch(&self.clock);
            return Ok(slot);
        }
        trace!(index, "block cache miss");
        self.load(index, index)?;
        Ok(self.resident_slot(index))
    }

    /// Loads the missing blocks of the `first..=last` span of the current
    /// request in order, and returns the index of the last block of the span
    /// that exists. Loading stops at the last block of the source, so the
    /// returned index is less than `last` if the span reaches past the end.
    ///
    /// On error, the blocks loaded so far stay resident, and the block that
    /// failed is discarded.
    fn load(&mut self, first: u64, last: u64) -> io::Result<u64> {
        let mut victims = None;
        let mut index = first;
        loop {
            let slot = match self.resident.get(&index) {
                Some(&slot) => slot,
                None => {
                    let slot = self.claim(first, last, &mut victims);
                    let offset = index.saturating_mul(self.block_size as u64);
                    trace!(index, offset, slot, "loading block");
                    let filled = self.slots[slot].block.fill(
                        &mut self.source,
                        offset,
                        self.block_size,
                        &self.clock,
                    );
                    if let Err(err) = filled {
                        self.release(slot);
                        return Err(err);
                    }
                    self.slots[slot].index = Some(index);
                    self.resident.insert(index, slot);
                    if self.fast.is_some_and(|fast| fast.slot == slot) {
                        // The fast path follows the buffer to its new block.
                        self.cache_slot(slot);
                    }
                    slot
                }
            };
            if index == last || self.slots[slot].block.is_last() {
                return Ok(index);
            }
            index += 1;
        }
    }

    /// Returns a slot to load a block of the `first..=last` span into.
    ///
    /// While the limit is reached, the least recently used blocks outside of
    /// the span are evicted. The slot of the last one evicted is reused, and
    /// the others are released. Blocks in the span are never evicted, so the
    /// limit is exceeded if the span alone does not fit.
    fn claim(&mut self, first: u64, last: u64, victims: &mut Option<Vec<(u64, u64, usize)>>) -> usize {
        let mut reused = None;
        while self.resident.len() >= self.resident_limit {
            let victims = victims.get_or_insert_with(|| self.victims(first, last));
            let Some((recency, index, slot)) = victims.pop() else {
                break;
            };
            trace!(index, recency, slot, "evicting block");
            self.resident.remove(&index);
            self.slots[slot].index = None;
            if let Some(previous) = reused.replace(slot) {
                self.release(previous);
            }
        }
        reused.or_else(|| self.vacant.pop()).unwrap_or_else(|| {
            self.slots.push(Slot {
                block: Block::new(),
                index: None,
            });
            self.slots.len() - 1
        })
    }

    /// Returns the resident blocks outside of `first..=last` as recency, index
    /// and slot, ordered from the most to the least recently used.
    fn victims(&self, first: u64, last: u64) -> Vec<(u64, u64, usize)> {
        let mut victims: Vec<(u64, u64, usize)> = self
            .resident
            .iter()
            .filter(|&(&index, _)| index < first || index > last)
            .map(|(&index, &slot)| (self.slots[slot].block.recency(), index, slot))
            .collect();
        victims.sort_unstable_by_key(|&(recency, ..)| cmp::Reverse(recency));
        victims
    }
}

impl<S> BlockCache<S> {
    /// Returns the size of a block in bytes.
    #[inline(always)]
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the maximum number of resident blocks.
    #[inline(always)]
    #[must_use]
    pub fn resident_limit(&self) -> usize {
        self.resident_limit
    }

    /// Returns the number of resident blocks. This may exceed the limit after
    /// a request spanning more blocks than that.
    #[inline(always)]
    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    /// Returns the indexes of resident blocks in ascending order.
    #[must_use]
    pub fn resident_indices(&self) -> Vec<u64> {
        let mut indices: Vec<u64> = self.resident.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Whether the block `index` is resident.
    #[inline(always)]
    #[must_use]
    pub fn is_resident(&self, index: u64) -> bool {
        self.resident.contains_key(&index)
    }

    /// Returns the clock ordering the blocks of this cache.
    #[inline(always)]
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns a reference to the underlying source.
    #[inline(always)]
    #[must_use]
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Returns a mutable reference to the underlying source.
    ///
    /// Moving the position of the source is fine, as every load seeks. The
    /// contents, however, must not change, as resident blocks would not be
    /// aware of that.
    #[inline(always)]
    #[must_use]
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Consumes this cache and returns the underlying source.
    #[inline(always)]
    #[must_use = "do you want to drop instead?"]
    pub fn into_inner(self) -> S {
        self.source
    }

    /// Splits `offset` into a block index and an offset within that block.
    #[inline(always)]
    fn locate(&self, offset: u64) -> (u64, usize) {
        let block_size = self.block_size as u64;
        (offset / block_size, (offset % block_size) as usize)
    }

    #[inline(always)]
    fn block(&self, slot: usize) -> &Block {
        &self.slots[slot].block
    }

    /// Returns the slot of a block that is known to be resident.
    fn resident_slot(&self, index: u64) -> usize {
        match self.resident.get(&index) {
            Some(&slot) => slot,
            None => unreachable!("block {index} is expected to be resident"),
        }
    }

    /// Makes the block in `slot` the most recently served one.
    #[inline(always)]
    fn cache_slot(&mut self, slot: usize) {
        let block = &self.slots[slot].block;
        self.fast = Some(FastPath {
            slot,
            start: block.offset(),
            end: block.end(),
        });
    }

    /// Frees the buffer of a slot that holds no resident block.
    fn release(&mut self, slot: usize) {
        self.slots[slot].block.release();
        self.slots[slot].index = None;
        if self.fast.is_some_and(|fast| fast.slot == slot) {
            self.fast = None;
        }
        self.vacant.push(slot);
    }
}

impl<S> fmt::Debug for BlockCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("blockcache")
            .field("block_size", &self.block_size)
            .field("resident_limit", &self.resident_limit)
            .field("resident", &self.resident_indices())
            .field("fast", &self.fast.map(|fast| fast.start..fast.end))
            .field("clock", &self.clock.now())
            .finish_non_exhaustive()
    }
}

/// A cursor over parts of resident blocks, returned by [`BlockCache::blocks`].
///
/// Every chunk borrows the cache, hence this is not an [`Iterator`]. The
/// cursor is single-pass and cannot be restarted.
pub struct Chunks<'a, S> {
    cache: &'a mut BlockCache<S>,
    /// The index of the next block.
    index: u64,
    /// Bytes to skip in the next block, only non-zero for the first one.
    skip: usize,
    /// The block index and the offset within that block of the last byte.
    last: Option<(u64, usize)>,
    /// Whether the end of the range or the source has been reached.
    done: bool,
}

impl<S: Source> Chunks<'_, S> {
    /// Returns the next non-empty chunk, or `None` once the range or the
    /// source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if the block has to be loaded and
    /// loading fails. The cursor can be advanced again to retry.
    pub fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let (slot, from, to) = loop {
            if self.done {
                return Ok(None);
            }
            let index = self.index;
            let slot = self.cache.slot_for(index)?;
            let block = self.cache.block(slot);
            let from = mem::take(&mut self.skip);
            let to = match self.last {
                Some((last, within)) if last == index => {
                    self.done = true;
                    cmp::min(within + 1, block.data().len())
                }
                _ => block.data().len(),
            };
            self.done |= block.is_last();
            self.index += 1;
            if from < to {
                break (slot, from, to);
            }
        };
        Ok(Some(&self.cache.block(slot).data()[from..to]))
    }
}

impl<S> fmt::Debug for Chunks<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("chunks")
            .field("index", &self.index)
            .field("skip", &self.skip)
            .field("last", &self.last)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Converts `range` to the first and the last offset, where no last offset
/// means the range is unbounded. Returns `None` if the range is empty.
fn inclusive<R: RangeBounds<u64>>(range: &R) -> Option<(u64, Option<u64>)> {
    let first = match range.start_bound() {
        Bound::Included(&first) => first,
        Bound::Excluded(&first) => first.checked_add(1)?,
        Bound::Unbounded => 0,
    };
    let last = match range.end_bound() {
        Bound::Included(&last) => Some(last),
        Bound::Excluded(&end) => Some(end.checked_sub(1)?),
        Bound::Unbounded => None,
    };
    if last.is_some_and(|last| last < first) {
        return None;
    }
    Some((first, last))
}

/// Returns `data[from..to]`, clamped to the length of `data`.
#[inline(always)]
fn clamp(data: &[u8], from: usize, to: usize) -> &[u8] {
    let to = cmp::min(to, data.len());
    &data[cmp::min(from, to)..to]
}
