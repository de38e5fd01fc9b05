//! IO via memory. Useful when the data is already there, but the code reading
//! it is written against the block cache.

use core::cmp;
use std::io;

use crate::Source;

/// A source over bytes in memory.
///
/// The bytes are never copied by this type, but the block cache copies them
/// into blocks as usual.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Memory<T> {
    inner: T,
    position: u64,
}

impl<T: AsRef<[u8]>> Memory<T> {
    /// Creates a source over `inner`, positioned at the start.
    #[inline(always)]
    #[must_use]
    pub fn new(inner: T) -> Memory<T> {
        Self { inner, position: 0 }
    }

    /// Returns the length of the bytes.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.as_ref().len() as u64
    }

    /// Whether there are no bytes.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.as_ref().is_empty()
    }

    /// Returns a reference to the underlying bytes.
    #[inline(always)]
    #[must_use]
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consumes this source and returns the underlying bytes.
    #[inline(always)]
    #[must_use]
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsRef<[u8]>> Source for Memory<T> {
    #[inline(always)]
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.inner.as_ref();
        let start = usize::try_from(self.position).map_or(bytes.len(), |position| {
            cmp::min(position, bytes.len())
        });
        let read = cmp::min(buf.len(), bytes.len() - start);
        buf[..read].copy_from_slice(&bytes[start..start + read]);
        self.position += read as u64;
        Ok(read)
    }

    #[inline(always)]
    fn is_eof(&mut self) -> io::Result<bool> {
        Ok(self.position >= self.len())
    }
}
