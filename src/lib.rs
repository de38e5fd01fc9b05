//! String-like random access over large seekable streams.
//!
//! The idea is to parse files that do not fit in memory, or which are too
//! large to be read as a whole for a handful of lookups, as if they were a
//! byte string. A parser asks for a byte at an offset, a range of bytes, or
//! the next occurrence of a token, and does not care where block boundaries
//! are.
//!
//! Underneath, the stream is split into fixed-size blocks, which are loaded
//! on demand and kept in a small cache. Once the cache is full, the least
//! recently used blocks are evicted, so memory usage stays bounded no matter
//! the size of the stream. Most parsers read forward with occasional jumps
//! back, and a couple of resident blocks is enough to avoid reading any part
//! of the stream twice.
//!
//! The core abstraction is [`BlockCache`], created over anything implementing
//! [`Source`]. Built-in sources for memory, standard streams and files are in
//! the [`io`] module.
//!
//! ```
//! use std::io::Cursor;
//!
//! use blockreader::{io::Seekable, Options};
//!
//! let stream = Seekable::new(Cursor::new(b"key=value;other=thing;".to_vec()))?;
//! let mut cache = Options::new().block_size(8).open(stream)?;
//!
//! let end = cache.find(";", 0)?.unwrap_or(0);
//! let eq = cache.find("=", 0)?.unwrap_or(0);
//! assert_eq!(cache.read(..eq)?, b"key");
//! assert_eq!(cache.read(eq + 1..end)?, b"value");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::inline_always)]

mod block;
mod cache;
pub mod io;
mod pattern;

#[cfg(test)]
mod test_support;

pub use block::{Block, Clock, Source};
pub use cache::{
    BlockCache, Chunks, ConfigError, Options, DEFAULT_BLOCK_SIZE, DEFAULT_RESIDENT_BLOCKS,
};
pub use pattern::{AnyOf, Match, Matcher, Pattern, DEFAULT_MATCH_LEN};
