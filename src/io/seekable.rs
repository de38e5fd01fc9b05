//! IO via the standard [`Read`] and [`Seek`] traits.

use std::io::{self, Read, Seek, SeekFrom};

use crate::Source;

/// A source over a standard seekable stream.
///
/// The length of the stream is sampled once, when created, and the end of the
/// stream is detected by comparing the position against it. The stream must
/// not change its length while in use.
#[derive(Debug)]
pub struct Seekable<R> {
    inner: R,
    len: u64,
    position: u64,
}

impl<R: Read + Seek> Seekable<R> {
    /// Creates a source over `inner`, sampling its length.
    ///
    /// # Errors
    ///
    /// Returns the error of seeking the stream to its end.
    pub fn new(mut inner: R) -> io::Result<Seekable<R>> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner,
            len,
            position: len,
        })
    }

    /// Returns the length of the stream sampled when this source was created.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the stream was empty when this source was created.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<R> Seekable<R> {
    /// Returns a reference to the underlying stream.
    #[inline(always)]
    #[must_use]
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Returns a mutable reference to the underlying stream. Its position may
    /// be changed freely, as every load of a block seeks.
    #[inline(always)]
    #[must_use]
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consumes this source and returns the underlying stream.
    #[inline(always)]
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Source for Seekable<R> {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.position = self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Reads until `buf` is full or the stream ends, as streams may return
    /// fewer bytes than available.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    #[inline(always)]
    fn is_eof(&mut self) -> io::Result<bool> {
        Ok(self.position >= self.len)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Returns at most 3 bytes per read, and is interrupted every other call.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        interrupt: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::ErrorKind::Interrupted.into());
            }
            let len = buf.len().min(3);
            self.inner.read(&mut buf[..len])
        }
    }

    impl Seek for Trickle {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn seekable_new() -> io::Result<()> {
        let source = Seekable::new(Cursor::new(b"0123456789".to_vec()))?;
        assert_eq!(source.len(), 10);
        assert!(!source.is_empty());
        assert_eq!(source.get_ref().position(), 10, "sampled by seeking");

        let source = Seekable::new(Cursor::new(Vec::new()))?;
        assert!(source.is_empty());
        Ok(())
    }

    #[test]
    fn seekable_read() -> io::Result<()> {
        let inner = Trickle {
            inner: Cursor::new(b"0123456789".to_vec()),
            interrupt: false,
        };
        let mut source = Seekable::new(inner)?;
        let mut buf = [0; 8];

        let case = "fills the buffer";
        source.seek(1)?;
        assert_eq!(source.read(&mut buf)?, 8, "{case}");
        assert_eq!(&buf, b"12345678", "{case}");
        assert!(!source.is_eof()?, "{case}");

        let case = "short at the end";
        source.seek(6)?;
        assert_eq!(source.read(&mut buf)?, 4, "{case}");
        assert_eq!(&buf[..4], b"6789", "{case}");
        assert!(source.is_eof()?, "{case}");

        let case = "past the end";
        source.seek(20)?;
        assert_eq!(source.read(&mut buf)?, 0, "{case}");
        assert!(source.is_eof()?, "{case}");
        Ok(())
    }

    #[test]
    fn seekable_read_error() {
        struct Broken;

        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::UnexpectedEof.into())
            }
        }

        impl Seek for Broken {
            fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
                Ok(4)
            }
        }

        let mut source = Seekable::new(Broken).unwrap();
        let err = source.read(&mut [0; 4]).expect_err("read");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
