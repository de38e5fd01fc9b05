//! IO backed by regular files in a generic filesystem.
//!
//! The implementation is aimed to be as portable as Rust files, with a few
//! tweaks for Linux. All IO is synchronous.

use std::{fs, io, path::Path};

use crate::Source;

#[cfg(not(all(feature = "libc", target_os = "linux")))]
use std::io::{Read, Seek};

#[cfg(all(feature = "libc", target_os = "linux"))]
use std::os::fd::AsRawFd;

/// A read-only file implementing [`Source`].
///
/// Internally, it uses [`std::fs::File`] API. The length of the file is
/// sampled when opened, and the file must not be truncated or appended to
/// while in use.
///
/// # Linux specifics
///
/// With the `libc` feature enabled, the implementation has tweaks for Linux,
/// which are really optimizations around the syscall API it provides.
///
/// Reads are done via `pread`, saving on a `seek` per block. The kernel is
/// advised that the access pattern is random, so that it does not read ahead
/// pages which the block cache would not ask for anyway.
#[derive(Debug)]
pub struct File {
    inner: fs::File,
    len: u64,
    position: u64,
}

impl File {
    /// Opens a file at `path` for reading.
    ///
    /// # Errors
    ///
    /// If the file length is larger than [`i64::MAX`], the error of
    /// [`io::ErrorKind::InvalidData`] is returned along with the message.
    ///
    /// In other cases returns the IO error from the underlying [`fs::File`]
    /// API or the operating system.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<File> {
        let file = fs::File::open(path)?;
        let len = file.metadata()?.len();
        if len > i64::MAX as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "file size too large",
            ));
        }
        #[cfg(all(feature = "libc", target_os = "linux"))]
        advise_random_access(&file)?;

        Ok(File {
            inner: file,
            len,
            position: 0,
        })
    }

    /// Returns the length of the file sampled when it was opened.
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the file was empty when it was opened.
    #[inline(always)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a reference to the underlying file.
    #[inline(always)]
    #[must_use]
    pub fn get_ref(&self) -> &fs::File {
        &self.inner
    }
}

impl Source for File {
    /// Moves the position of the file.
    ///
    /// On Linux, this only records the position for the next read, and the
    /// position of the underlying file does not change.
    #[inline(always)]
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        #[cfg(not(all(feature = "libc", target_os = "linux")))]
        self.inner.seek(io::SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Reads until `buf` is full or the file ends. Interrupted reads are
    /// retried.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_once(&mut buf[filled..], self.position + filled as u64) {
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

#[cfg(all(feature = "libc", target_os = "linux"))]
impl File {
    #[inline(always)]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn read_once(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset > i64::MAX as u64 {
            return Ok(0);
        }
        let ret = unsafe {
            // The buffer is a valid mutable slice of the given length, and
            // the offset is checked against i64::MAX above.
            libc::pread64(
                self.inner.as_raw_fd(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
                offset as libc::off64_t,
            )
        };
        if ret >= 0 {
            Ok(ret as usize)
        } else if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            unreachable!("pread: unexpected return {ret}")
        }
    }
}

#[cfg(not(all(feature = "libc", target_os = "linux")))]
impl File {
    #[inline(always)]
    fn read_once(&mut self, buf: &mut [u8], _offset: u64) -> io::Result<usize> {
        // The position of the file moves along with the reads, so the offset
        // is already there.
        self.inner.read(buf)
    }
}

/// Advises the kernel that the file is accessed at random, disabling read
/// ahead for the whole file.
#[cfg(all(feature = "libc", target_os = "linux"))]
fn advise_random_access(file: &fs::File) -> io::Result<()> {
    let ret = unsafe {
        // The descriptor belongs to an open file. Zero offset and length
        // cover the whole file.
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_RANDOM)
    };
    if ret == 0 {
        return Ok(());
    }
    Err(io::Error::from_raw_os_error(ret))
}
