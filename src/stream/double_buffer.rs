//! Slot-parity mapping, the triangular playback traversal, and the host staging region
//! feeding the two GPU slots.

use crate::foundation::error::{StreamError, StreamResult};
use crate::store::CHUNK_FRAME_COUNT;

/// Two GPU slots, two staging halves.
pub const SLOT_COUNT: usize = 2;

/// Chunks map to slots by parity; adjacent chunks therefore never collide.
pub fn slot_for(chunk_index: u32) -> usize {
    (chunk_index % 2) as usize
}

/// Triangular (ping-pong) traversal: maps a strictly increasing presentation counter to
/// `0, 1, .., max, max-1, .., 1, 0, 1, ..` over `[0, max]`.
pub fn back_and_forth(index: u64, max_value: u32) -> u32 {
    if max_value == 0 {
        return 0;
    }
    let m = max_value as i64;
    let i = (index % (2 * max_value as u64)) as i64;
    (m - (i - m).abs()) as u32
}

/// The chunk the prefetch armed at presentation counter `presented` must fetch: the one
/// displayed two boundary crossings ahead, which is where the read armed now is
/// consumed. For three or more chunks this equals the classic
/// `back_and_forth(presented + 3*CHUNK_FRAME_COUNT - 1)` lookahead on both legs of the
/// oscillation; deriving it from the crossing sequence also covers the two-chunk case,
/// where each slot keeps re-fetching its own chunk.
pub fn prefetch_chunk(presented: u64, frame_count: u32) -> u32 {
    let max_frame = frame_count - 1;
    let mut chunk = back_and_forth(presented, max_frame) / CHUNK_FRAME_COUNT;
    let mut crossings = 0;
    let mut t = presented;
    while crossings < 2 {
        t += 1;
        let next = back_and_forth(t, max_frame) / CHUNK_FRAME_COUNT;
        if next != chunk {
            crossings += 1;
            chunk = next;
        }
    }
    chunk
}

/// Host staging region: one chunk-sized half per slot. A half is absent while the I/O
/// channel owns it for an in-flight read.
pub struct DoubleBuffer {
    chunk_size: usize,
    halves: [Option<Vec<u8>>; SLOT_COUNT],
}

impl DoubleBuffer {
    pub fn new(chunk_size: usize) -> Self {
        DoubleBuffer {
            chunk_size,
            halves: [Some(vec![0u8; chunk_size]), Some(vec![0u8; chunk_size])],
        }
    }

    /// Move a half out, handing ownership to an I/O request.
    pub fn take_half(&mut self, slot: usize) -> StreamResult<Vec<u8>> {
        self.halves[slot]
            .take()
            .ok_or_else(|| StreamError::channel(format!("staging half {slot} is in flight")))
    }

    /// Return a half after its request completed.
    pub fn put_half(&mut self, slot: usize, buf: Vec<u8>) {
        debug_assert_eq!(buf.len(), self.chunk_size);
        debug_assert!(self.halves[slot].is_none());
        self.halves[slot] = Some(buf);
    }

    pub fn half(&self, slot: usize) -> StreamResult<&[u8]> {
        self.halves[slot]
            .as_deref()
            .ok_or_else(|| StreamError::channel(format!("staging half {slot} is in flight")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_and_forth_is_a_bounded_palindrome() {
        let max = 37;
        for i in 0..(6 * max as u64) {
            let v = back_and_forth(i, max);
            assert!(v <= max);
            assert_eq!(v, back_and_forth(2 * max as u64 - (i % (2 * max as u64)), max));
        }
        // One full traversal forward, then mirrored.
        assert_eq!(back_and_forth(0, 3), 0);
        assert_eq!(back_and_forth(3, 3), 3);
        assert_eq!(back_and_forth(4, 3), 2);
        assert_eq!(back_and_forth(6, 3), 0);
        assert_eq!(back_and_forth(7, 3), 1);
    }

    #[test]
    fn slot_parity_alternates() {
        assert_eq!(slot_for(0), 0);
        assert_eq!(slot_for(1), 1);
        assert_eq!(slot_for(7), 1);
        assert_eq!(slot_for(8), 0);
    }

    /// For three or more chunks the crossing-derived target matches the classic
    /// `3*CHUNK_FRAME_COUNT - 1` frame lookahead at every boundary crossing.
    #[test]
    fn prefetch_target_matches_constant_lookahead_beyond_two_chunks() {
        let n = CHUNK_FRAME_COUNT;
        for chunks in [3u32, 4, 5, 8] {
            let frame_count = chunks * n;
            let max_frame = frame_count - 1;
            let mut prev = 0;
            for t in 0..(6 * frame_count as u64) {
                let chunk = back_and_forth(t, max_frame) / n;
                if chunk != prev {
                    let classic = back_and_forth(t + 3 * n as u64 - 1, max_frame) / n;
                    assert_eq!(
                        prefetch_chunk(t, frame_count),
                        classic,
                        "chunks={chunks} t={t}"
                    );
                    prev = chunk;
                }
            }
        }
    }

    /// With exactly two chunks each slot re-fetches its own chunk: the chunk two
    /// crossings ahead is the one being entered now.
    #[test]
    fn prefetch_target_with_two_chunks_refetches_the_entered_chunk() {
        let n = CHUNK_FRAME_COUNT;
        let frame_count = 2 * n;
        let max_frame = frame_count - 1;
        let mut prev = 0;
        for t in 0..(8 * frame_count as u64) {
            let chunk = back_and_forth(t, max_frame) / n;
            if chunk != prev {
                assert_eq!(prefetch_chunk(t, frame_count), chunk, "t={t}");
                prev = chunk;
            }
        }
    }

    #[test]
    fn halves_move_out_and_back() {
        let mut staging = DoubleBuffer::new(64);
        let buf = staging.take_half(1).unwrap();
        assert_eq!(buf.len(), 64);
        assert!(staging.take_half(1).is_err());
        assert!(staging.half(1).is_err());
        staging.put_half(1, buf);
        assert!(staging.half(1).is_ok());
    }
}
