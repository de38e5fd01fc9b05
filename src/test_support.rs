//! Sources shared by unit tests.

use std::io;

use crate::Source;

/// An operation recorded by [`Recorder`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Op {
    Seek(u64),
    Read(usize),
}

/// An in-memory source recording every seek and read issued against it.
/// End of stream checks are not recorded, as they do no IO.
#[derive(Clone, Debug)]
pub(crate) struct Recorder {
    bytes: Vec<u8>,
    position: u64,
    ops: Vec<Op>,
    fail_reads: bool,
}

impl Recorder {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            position: 0,
            ops: Vec::new(),
            fail_reads: false,
        }
    }

    /// Makes every subsequent read fail with [`io::ErrorKind::BrokenPipe`].
    pub(crate) fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn set_failing_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Returns the operations recorded since the last call.
    pub(crate) fn take_ops(&mut self) -> Vec<Op> {
        std::mem::take(&mut self.ops)
    }
}

impl Source for Recorder {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.ops.push(Op::Seek(offset));
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ops.push(Op::Read(buf.len()));
        if self.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "recorder: read failed"));
        }
        let start = usize::try_from(self.position)
            .unwrap_or(usize::MAX)
            .min(self.bytes.len());
        let end = start.saturating_add(buf.len()).min(self.bytes.len());
        buf[..end - start].copy_from_slice(&self.bytes[start..end]);
        self.position += (end - start) as u64;
        Ok(end - start)
    }

    fn is_eof(&mut self) -> io::Result<bool> {
        Ok(self.position >= self.bytes.len() as u64)
    }
}
