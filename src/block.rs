//! A single unit of caching: a fixed-capacity buffer of stream bytes.
//!
//! The stream itself is described by [`Source`], which is intentionally
//! smaller than [`std::io::Read`] and [`std::io::Seek`] combined. The cache
//! needs to know whether a read has reached the end of the stream right after
//! it happened, without issuing another read, and the standard traits cannot
//! express that. Adapters for the standard traits live in [`crate::io`].
//!
//! Recency of blocks is tracked with [`Clock`], a strictly increasing sequence
//! rather than wall-clock time. Blocks are ordered by the tick they received
//! last, so ties never happen as long as the blocks compared share a clock.

use core::{
    fmt,
    sync::atomic::{self, AtomicU64},
};
use std::{io, sync::Arc};

/// Something that can be read at arbitrary offsets, such as a file.
pub trait Source {
    /// Repositions the source to an absolute `offset`.
    ///
    /// # Errors
    ///
    /// An error is returned if the offset is invalid for the medium, or an
    /// IO error is encountered.
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes from the current position, returning the
    /// number of bytes read.
    ///
    /// This is a single operation from the point of view of the caller, and
    /// the implementation must return fewer bytes only when the end of the
    /// source has been reached.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether the current position is at the end of the source, that is,
    /// whether the last read has consumed the remaining bytes.
    ///
    /// # Errors
    ///
    /// An error is returned if an IO error is encountered.
    fn is_eof(&mut self) -> io::Result<bool>;
}

impl<S: Source + ?Sized> Source for &mut S {
    #[inline(always)]
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }

    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    #[inline(always)]
    fn is_eof(&mut self) -> io::Result<bool> {
        (**self).is_eof()
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    #[inline(always)]
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        (**self).seek(offset)
    }

    #[inline(always)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    #[inline(always)]
    fn is_eof(&mut self) -> io::Result<bool> {
        (**self).is_eof()
    }
}

/// A strictly increasing sequence used to order blocks by recency.
///
/// Cloning a clock shares the sequence. Every block cache owns a clock, which
/// is not shared unless passed explicitly via [`crate::Options::clock`]. Share
/// a clock between caches when their blocks must be comparable, e.g. when
/// reasoning about which of them was used last across several caches.
#[derive(Clone, Debug, Default)]
pub struct Clock(Arc<AtomicU64>);

impl Clock {
    /// Creates a new sequence starting at zero.
    #[inline(always)]
    #[must_use]
    pub fn new() -> Clock {
        Self::default()
    }

    /// Returns the value the next tick will receive.
    #[inline(always)]
    #[must_use]
    pub fn now(&self) -> u64 {
        // Relaxed, because the sequence does not guard any memory. The only
        // requirement is uniqueness, which atomic increments provide.
        self.0.load(atomic::Ordering::Relaxed)
    }

    /// Returns the current value and advances the sequence.
    #[inline(always)]
    pub(crate) fn tick(&self) -> u64 {
        self.0.fetch_add(1, atomic::Ordering::Relaxed)
    }
}

/// A block of bytes read from a [`Source`] at a given offset.
///
/// The length of the data equals the block size the block was filled with,
/// unless it is the last block of the source, in which case it may be shorter
/// or even empty when the block starts past the end.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Block {
    /// Offset in the source where the data of this block starts.
    offset: u64,
    /// Data read from the source. The allocation is kept across refills.
    data: Vec<u8>,
    /// The tick of the clock at which this block was filled or touched.
    recency: u64,
    /// Whether the source has reported the end right after the fill.
    last: bool,
}

impl Block {
    /// Creates an empty block with no allocated buffer.
    #[inline(always)]
    #[must_use]
    pub(crate) fn new() -> Block {
        Self::default()
    }

    /// Fills this block with up to `size` bytes of `source` from `offset`,
    /// replacing the previous contents.
    ///
    /// Offset and recency are updated before any IO, so a failed fill leaves
    /// the block with the new offset and partial or stale data. Callers must
    /// not use the block after an error.
    pub(crate) fn fill<S: Source + ?Sized>(
        &mut self,
        source: &mut S,
        offset: u64,
        size: usize,
        clock: &Clock,
    ) -> io::Result<()> {
        self.offset = offset;
        self.recency = clock.tick();
        source.seek(offset)?;
        // Resizing keeps the capacity of a salvaged buffer, so refills of
        // blocks of the same size do not allocate.
        self.data.resize(size, 0);
        let read = source.read(&mut self.data)?;
        self.data.truncate(read);
        self.last = source.is_eof()?;
        Ok(())
    }

    /// Marks this block as the most recently used one.
    #[inline(always)]
    pub(crate) fn touch(&mut self, clock: &Clock) {
        self.recency = clock.tick();
    }

    /// Drops the data and its allocation.
    #[inline(always)]
    pub(crate) fn release(&mut self) {
        self.data = Vec::new();
        self.last = false;
    }

    /// Returns the offset in the source where this block starts.
    #[inline(always)]
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the offset in the source right after the data of this block.
    #[inline(always)]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Returns the data of this block.
    #[inline(always)]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the clock tick at which this block was last filled or touched.
    #[inline(always)]
    #[must_use]
    pub fn recency(&self) -> u64 {
        self.recency
    }

    /// Whether this is the last block of the source.
    #[inline(always)]
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.last
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[@{} (last access: {})", self.offset, self.recency)?;
        if self.last {
            write!(f, " (last block)")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Op, Recorder};

    #[test]
    fn clock_tick() {
        let clock = Clock::new();

        let case = "starts at zero";
        assert_eq!(clock.now(), 0, "{case}");

        let case = "ticks are strictly increasing";
        assert_eq!(clock.tick(), 0, "{case}");
        assert_eq!(clock.tick(), 1, "{case}");
        assert_eq!(clock.now(), 2, "{case}");

        let case = "clones share the sequence";
        let shared = clock.clone();
        assert_eq!(shared.tick(), 2, "{case}");
        assert_eq!(clock.tick(), 3, "{case}");
    }

    #[test]
    fn block_fill() {
        let mut source = Recorder::new(b"0123456789");
        let clock = Clock::new();
        let mut block = Block::new();

        let case = "full block";
        block.fill(&mut source, 2, 4, &clock).expect(case);
        assert_eq!(block.data(), b"2345", "{case}");
        assert_eq!(block.offset(), 2, "{case}");
        assert_eq!(block.end(), 6, "{case}");
        assert_eq!(block.recency(), 0, "{case}");
        assert!(!block.is_last(), "{case}");
        assert_eq!(source.take_ops(), [Op::Seek(2), Op::Read(4)], "{case}");

        let case = "refill at the end is short and last";
        block.fill(&mut source, 8, 4, &clock).expect(case);
        assert_eq!(block.data(), b"89", "{case}");
        assert_eq!(block.recency(), 1, "{case}");
        assert!(block.is_last(), "{case}");

        let case = "exactly at the end is last";
        block.fill(&mut source, 6, 4, &clock).expect(case);
        assert_eq!(block.data(), b"6789", "{case}");
        assert!(block.is_last(), "{case}");

        let case = "past the end is empty and last";
        block.fill(&mut source, 12, 4, &clock).expect(case);
        assert_eq!(block.data(), b"", "{case}");
        assert_eq!(block.end(), 12, "{case}");
        assert!(block.is_last(), "{case}");
    }

    #[test]
    fn block_fill_error() {
        let mut source = Recorder::new(b"0123456789").failing_reads();
        let clock = Clock::new();
        let mut block = Block::new();

        let err = block.fill(&mut source, 0, 4, &clock).expect_err("fill");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(block.offset(), 0);
        assert_eq!(clock.now(), 1, "recency is assigned before IO");
    }

    #[test]
    fn block_touch() {
        let mut source = Recorder::new(b"0123456789");
        let clock = Clock::new();
        let mut block = Block::new();
        block.fill(&mut source, 0, 4, &clock).unwrap();
        source.take_ops();

        block.touch(&clock);
        assert_eq!(block.recency(), 1);
        block.touch(&clock);
        assert_eq!(block.recency(), 2);
        assert!(source.take_ops().is_empty(), "touch does no IO");
    }

    #[test]
    fn block_release() {
        let mut source = Recorder::new(b"0123456789");
        let clock = Clock::new();
        let mut block = Block::new();
        block.fill(&mut source, 8, 4, &clock).unwrap();
        block.release();
        assert!(block.data().is_empty());
        assert_eq!(block.data.capacity(), 0);
        assert!(!block.is_last());
    }

    #[test]
    fn block_display() {
        let mut source = Recorder::new(b"0123456789");
        let clock = Clock::new();
        let mut block = Block::new();

        block.fill(&mut source, 0, 4, &clock).unwrap();
        assert_eq!(block.to_string(), "[@0 (last access: 0)]");
        block.fill(&mut source, 8, 4, &clock).unwrap();
        assert_eq!(block.to_string(), "[@8 (last access: 1) (last block)]");
    }
}
