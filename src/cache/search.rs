//! Forward search for patterns across block boundaries.
//!
//! Blocks are searched one at a time. Matches spanning two adjacent blocks
//! are found in a seam: the tail of one block followed by the head of the
//! next, each as long as the longest possible match minus one byte. Matches
//! spanning more than two blocks are not found.

use core::cmp;
use std::io;

use tracing::trace;

use super::{clamp, BlockCache};
use crate::{
    block::Source,
    pattern::{earliest, Match, Pattern},
};

impl<S: Source> BlockCache<S> {
    /// Returns the offset of the first match of `pattern` at or after
    /// `start`, or `None` if the source is exhausted without a match.
    ///
    /// Blocks are loaded as the search proceeds and their recency is bumped,
    /// but the most recently served block is left as is, unless its buffer
    /// gets reused for another block.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if loading a block fails.
    pub fn find<P: Pattern + ?Sized>(&mut self, pattern: &P, start: u64) -> io::Result<Option<u64>> {
        Ok(self.find_any(&[pattern], start)?.map(|found| found.offset))
    }

    /// Returns the first match of any of `patterns` at or after `start`. If
    /// several patterns match at the same offset, the one listed first wins.
    ///
    /// Patterns of different types can be searched for with a slice of
    /// `&dyn Pattern`. An empty slice never matches and does no IO.
    ///
    /// # Errors
    ///
    /// Returns the error of the source if loading a block fails.
    pub fn find_any<P: Pattern>(&mut self, patterns: &[P], start: u64) -> io::Result<Option<Match>> {
        let Some(longest) = patterns.iter().map(Pattern::max_len).max() else {
            return Ok(None);
        };
        let reach = longest.saturating_sub(1);

        let (mut index, mut floor) = self.locate(start);
        let mut slot = self.slot_for(index)?;
        let mut found = self.search_block(patterns, slot, floor, reach);
        let mut seam = Vec::with_capacity(reach.saturating_mul(2));
        loop {
            let pending = match found {
                Some((found, true)) => return Ok(Some(found)),
                Some((found, false)) => Some(found),
                None => None,
            };
            let block = self.block(slot);
            if block.is_last() {
                return Ok(pending);
            }
            // The tail is copied before loading, as the block may be evicted.
            // Bytes before the floor precede the start of the search.
            let data = block.data();
            let tail = cmp::max(data.len().saturating_sub(reach), cmp::min(floor, data.len()));
            seam.clear();
            seam.extend_from_slice(&data[tail..]);
            let tail_len = seam.len();

            index += 1;
            slot = self.slot_for(index)?;
            let next = self.block(slot);
            let head = cmp::min(reach, next.data().len());
            seam.extend_from_slice(&next.data()[..head]);
            trace!(index, tail_len, head, "searching seam");

            // Matches starting in the head are left to the block search, as
            // the head may be too short for them.
            if let Some((position, pattern)) = earliest(patterns, &seam) {
                if position < tail_len {
                    let crossing = Match {
                        offset: next.offset() - (tail_len - position) as u64,
                        pattern,
                    };
                    return Ok(Some(pending.map_or(crossing, |pending| cmp::min(pending, crossing))));
                }
            }
            if pending.is_some() {
                return Ok(pending);
            }
            floor = 0;
            found = self.search_block(patterns, slot, floor, reach);
        }
    }

    /// Searches the block in `slot` from the offset `from` within it. The
    /// match is paired with whether it is final, which it is not if a match
    /// crossing into the next block could start before it.
    fn search_block<P: Pattern>(
        &self,
        patterns: &[P],
        slot: usize,
        from: usize,
        reach: usize,
    ) -> Option<(Match, bool)> {
        let block = self.block(slot);
        let data = block.data();
        let (position, pattern) = earliest(patterns, clamp(data, from, usize::MAX))?;
        let within = from + position;
        let settled = block.is_last() || within.saturating_add(reach) < data.len();
        let found = Match {
            offset: block.offset() + within as u64,
            pattern,
        };
        Some((found, settled))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        test_support::{
            Op::{self, Read, Seek},
            Recorder,
        },
        AnyOf, BlockCache, Match, Matcher, Options, Pattern,
    };

    fn with(bytes: &[u8], block_size: usize, resident_blocks: usize) -> BlockCache<Recorder> {
        Options::new()
            .block_size(block_size)
            .resident_blocks(resident_blocks)
            .open(Recorder::new(bytes))
            .unwrap()
    }

    fn loads(cache: &mut BlockCache<Recorder>) -> usize {
        let ops = cache.get_mut().take_ops();
        ops.iter().filter(|op| matches!(op, Op::Read(_))).count()
    }

    fn digit_then(second: u8) -> Matcher<impl Fn(&[u8]) -> Option<usize>> {
        Matcher::new(move |haystack: &[u8]| {
            haystack
                .windows(2)
                .position(|w| w[0].is_ascii_digit() && w[1] == second)
        })
        .with_max_len(2)
    }

    #[test]
    fn find_literal() {
        let case = "within the first block";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find("34", 0).unwrap(), Some(3), "{case}");
        assert_eq!(loads(&mut cache), 1, "{case}");

        let case = "within the second block";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find("56", 0).unwrap(), Some(5), "{case}");
        assert_eq!(loads(&mut cache), 2, "{case}");

        let case = "across blocks";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find("45", 0).unwrap(), Some(4), "{case}");
        assert_eq!(
            cache.get_mut().take_ops(),
            [Seek(0), Read(5), Seek(5), Read(5)],
            "{case}"
        );

        let case = "not found";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find("46", 0).unwrap(), None, "{case}");
        assert_eq!(loads(&mut cache), 2, "{case}");

        let case = "from an offset";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find("56", 5).unwrap(), Some(5), "{case}");
        assert_eq!(loads(&mut cache), 1, "{case}");
        assert_eq!(cache.find(b"34", 5).unwrap(), None, "{case}");

        let case = "at the start";
        assert_eq!(cache.find(&b"3"[..], 3).unwrap(), Some(3), "{case}");
        assert_eq!(cache.find(&String::from("4"), 3).unwrap(), Some(4), "{case}");
    }

    #[test]
    fn find_never_before_start() {
        let mut cache = with(b"0123456789", 5, 2);

        let case = "match before start crossing the boundary";
        assert_eq!(cache.find("345", 4).unwrap(), None, "{case}");

        let case = "match at start crossing the boundary";
        assert_eq!(cache.find("45", 4).unwrap(), Some(4), "{case}");

        let case = "start past the end";
        assert_eq!(cache.find("9", 12).unwrap(), None, "{case}");
    }

    #[test]
    fn find_longer_pattern_wins_over_seam() {
        let mut cache = with(b"xyzabcdef", 3, 2);
        let patterns = ["abcd", "c"];
        assert_eq!(
            cache.find_any(&patterns, 1).unwrap(),
            Some(Match {
                offset: 3,
                pattern: 0
            })
        );
    }

    #[test]
    fn find_matcher() {
        let case = "within the first block";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find(&digit_then(b'4'), 0).unwrap(), Some(3), "{case}");
        assert_eq!(loads(&mut cache), 1, "{case}");

        let case = "across blocks";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find(&digit_then(b'5'), 0).unwrap(), Some(4), "{case}");
        assert_eq!(loads(&mut cache), 2, "{case}");

        let case = "not found";
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find(&digit_then(b'a'), 0).unwrap(), None, "{case}");
        assert_eq!(loads(&mut cache), 2, "{case}");

        let case = "any of bytes";
        let mut cache = with(b"ab\ncd\r\nef", 2, 1);
        assert_eq!(cache.find(&AnyOf(b"\r\n"), 3).unwrap(), Some(5), "{case}");
    }

    #[test]
    fn find_any_of_list() {
        let mut cache = with(b"0123456789", 5, 2);
        let found = |offset, pattern| Some(Match { offset, pattern });

        let case = "first pattern";
        assert_eq!(cache.find_any(&["34", "78"], 0).unwrap(), found(3, 0), "{case}");

        let case = "second pattern";
        assert_eq!(cache.find_any(&["78", "34"], 0).unwrap(), found(3, 1), "{case}");

        let case = "second block";
        assert_eq!(cache.find_any(&["56", "78"], 0).unwrap(), found(5, 0), "{case}");

        let case = "across blocks";
        assert_eq!(cache.find_any(&["45", "9"], 0).unwrap(), found(4, 0), "{case}");

        let case = "tie prefers the first pattern";
        assert_eq!(cache.find_any(&["456", "45"], 0).unwrap(), found(4, 0), "{case}");

        let case = "not found";
        assert_eq!(cache.find_any(&["46", "x"], 0).unwrap(), None, "{case}");

        let case = "mixed patterns";
        let matcher = digit_then(b'8');
        let patterns: [&dyn Pattern; 2] = [&"9", &matcher];
        assert_eq!(cache.find_any(&patterns, 0).unwrap(), found(7, 1), "{case}");

        let case = "no patterns";
        cache.get_mut().take_ops();
        assert_eq!(cache.find_any::<&str>(&[], 0).unwrap(), None, "{case}");
        assert_eq!(loads(&mut cache), 0, "{case}");
    }

    #[test]
    fn find_with_a_single_resident_block() {
        let mut cache = with(b"0123456789", 2, 1);
        assert_eq!(cache.find("56", 0).unwrap(), Some(5));
        assert_eq!(cache.find("89", 3).unwrap(), Some(8));
        assert_eq!(cache.resident_len(), 1);
    }

    #[test]
    fn find_does_not_cache_block() {
        let mut cache = with(b"0123456789", 5, 2);
        assert_eq!(cache.find("7", 0).unwrap(), Some(7));
        assert_eq!(cache.fast, None);
    }

    #[test]
    fn find_repoints_reused_cached_block() {
        let mut cache = with(b"0123456789", 2, 2);
        assert_eq!(cache.read(6..=9).unwrap(), b"6789");
        cache.get_mut().take_ops();

        assert_eq!(cache.find("3", 0).unwrap(), Some(3));
        let fast = cache.fast.expect("cached block");
        assert_eq!((fast.start, fast.end), (2, 4), "follows the reused buffer");

        assert_eq!(cache.get(3).unwrap(), Some(b'3'));
        cache.get_mut().take_ops();
        assert_eq!(cache.get(3).unwrap(), Some(b'3'));
        assert!(cache.get_mut().take_ops().is_empty(), "cached");

        assert_eq!(cache.get(9).unwrap(), Some(b'9'));
        assert_eq!(cache.get_mut().take_ops(), [Seek(8), Read(2)], "evicted");
    }

    #[test]
    fn find_error() {
        let mut cache = with(b"0123456789", 2, 2);
        assert_eq!(cache.read(0..=1).unwrap(), b"01");
        cache.get_mut().set_failing_reads(true);
        let err = cache.find("5", 0).expect_err("find");
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
        cache.get_mut().set_failing_reads(false);
        assert_eq!(cache.find("5", 0).unwrap(), Some(5));
    }
}
