//! Patterns searched for by [`crate::BlockCache::find`].
//!
//! A pattern needs to know the longest match it can produce. The search runs
//! block by block and only looks that far across block boundaries, so a match
//! longer than [`Pattern::max_len`], or longer than a block, may be missed.

/// The maximum length of a match assumed for a [`Matcher`] by default.
pub const DEFAULT_MATCH_LEN: usize = 32;

/// Something that can be found in a byte slice.
pub trait Pattern {
    /// Returns the position of the first match in `haystack`, if any.
    fn find_in(&self, haystack: &[u8]) -> Option<usize>;

    /// Returns the length of the longest possible match.
    fn max_len(&self) -> usize;
}

impl<P: Pattern + ?Sized> Pattern for &P {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        (**self).find_in(haystack)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        (**self).max_len()
    }
}

impl Pattern for [u8] {
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        if self.is_empty() {
            return Some(0);
        }
        haystack
            .windows(self.len())
            .position(|window| window == self)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        self.len()
    }
}

impl<const N: usize> Pattern for [u8; N] {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        self.as_slice().find_in(haystack)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        N
    }
}

impl Pattern for Vec<u8> {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        self.as_slice().find_in(haystack)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        self.len()
    }
}

impl Pattern for str {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        self.as_bytes().find_in(haystack)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        self.len()
    }
}

impl Pattern for String {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        self.as_bytes().find_in(haystack)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        self.len()
    }
}

/// A pattern defined by a function returning the position of the first match.
///
/// Since the function is opaque, the longest possible match has to be given
/// explicitly, or [`DEFAULT_MATCH_LEN`] is assumed.
///
/// ```
/// use blockreader::{Matcher, Pattern};
///
/// // A '3' followed by any digit.
/// let pattern = Matcher::new(|haystack: &[u8]| {
///     haystack
///         .windows(2)
///         .position(|w| w[0] == b'3' && w[1].is_ascii_digit())
/// })
/// .with_max_len(2);
/// assert_eq!(pattern.find_in(b"a3b34"), Some(3));
/// ```
#[derive(Clone, Copy)]
pub struct Matcher<F> {
    find: F,
    max_len: usize,
}

impl<F: Fn(&[u8]) -> Option<usize>> Matcher<F> {
    /// Creates a matcher from a function with the default maximum match length.
    #[inline(always)]
    #[must_use]
    pub fn new(find: F) -> Self {
        Self {
            find,
            max_len: DEFAULT_MATCH_LEN,
        }
    }

    /// Sets the length of the longest possible match.
    #[inline(always)]
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

impl<F: Fn(&[u8]) -> Option<usize>> Pattern for Matcher<F> {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        (self.find)(haystack)
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        self.max_len
    }
}

impl<F> core::fmt::Debug for Matcher<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Matcher")
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

/// A pattern matching any single byte of a set.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AnyOf<'a>(pub &'a [u8]);

impl Pattern for AnyOf<'_> {
    #[inline(always)]
    fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        haystack.iter().position(|byte| self.0.contains(byte))
    }

    #[inline(always)]
    fn max_len(&self) -> usize {
        1
    }
}

/// A match of one of several patterns, see [`crate::BlockCache::find_any`].
///
/// Matches are ordered by offset, then by the position of the pattern.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Match {
    /// Offset of the match in the source.
    pub offset: u64,
    /// Position of the matching pattern in the list passed to the search.
    pub pattern: usize,
}

/// Returns the earliest match of `patterns` in `haystack` along with the
/// position of the matching pattern. On equal positions the pattern listed
/// first wins.
pub(crate) fn earliest<P: Pattern>(patterns: &[P], haystack: &[u8]) -> Option<(usize, usize)> {
    let mut found: Option<(usize, usize)> = None;
    for (which, pattern) in patterns.iter().enumerate() {
        if let Some(position) = pattern.find_in(haystack) {
            if found.map_or(true, |(best, _)| position < best) {
                found = Some((position, which));
            }
        }
    }
    found
}
