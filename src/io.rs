//! Built-in sources for the block cache.
//!
//! Any [`std::io::Read`] + [`std::io::Seek`] stream can be used via
//! [`Seekable`]. Files have a dedicated source behind the `io-filesystem`
//! feature, which avoids the overhead of the standard traits on Linux.

#[cfg(all(not(feature = "io-filesystem"), feature = "libc"))]
compile_error!("there is no use for libc without \"io-filesystem\" feature");

#[cfg(feature = "io-filesystem")]
mod fs;
mod memory;
mod seekable;

#[cfg(feature = "io-filesystem")]
#[cfg_attr(docsrs, doc(cfg(feature = "io-filesystem")))]
pub use fs::File;
pub use memory::Memory;
pub use seekable::Seekable;
