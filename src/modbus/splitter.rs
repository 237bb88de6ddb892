//! Splitting a silence-delimited buffer into Modbus RTU frames.
//!
//! Function codes 0x01-0x04 and 0x0F/0x10 each admit two frame shapes,
//! so one buffer can have several partitions into frames. The exact split
//! is a depth-first search over the classifier's candidates, first success
//! wins. Positions from which no partition of the rest exists are
//! remembered, which bounds the search to one failed attempt per offset.
//!
//! The greedy partial split is the fallback when the buffer does not end
//! on a frame boundary: it takes the first candidate that fits at every
//! step. That prefers a request reading over a response reading for the
//! ambiguous codes. This is a heuristic; nothing in the protocol guarantees
//! it picks the right shape.

use log::trace;

use super::classifier::candidates;
use super::crc::FrameCheck;
use super::types::{Direction, Frame};

#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusSplitter {
    check: FrameCheck,
}

impl ModbusSplitter {
    pub fn new(check: FrameCheck) -> Self {
        Self { check }
    }

    /// The frame at `pos` for candidate `idx` onwards: the first candidate
    /// that fits in `buf` and passes validation, with the index after it.
    fn next_fit<'a>(&self, buf: &'a [u8], pos: usize, mut idx: usize) -> Option<(Frame<'a>, usize)> {
        let cands = candidates(&buf[pos..]);
        while let Some(c) = cands.get(idx) {
            idx += 1;
            if let Some(bytes) = buf.get(pos..pos + c.length) {
                if self.check.accepts(bytes) {
                    return Some((
                        Frame {
                            bytes,
                            direction: c.direction,
                        },
                        idx,
                    ));
                }
            }
        }
        None
    }

    /// Partitions all of `buf` into frames, or returns `None` if no
    /// partition without leftover bytes exists. An empty buffer splits
    /// into zero frames.
    pub fn split_exact<'a>(&self, buf: &'a [u8]) -> Option<Vec<Frame<'a>>> {
        // (frame start, next candidate index to try there)
        let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
        let mut frames: Vec<Frame<'a>> = Vec::new();
        let mut dead = vec![false; buf.len()];

        while let Some(&(pos, idx)) = stack.last() {
            if pos == buf.len() {
                return Some(frames);
            }
            let step = if dead[pos] {
                None
            } else {
                self.next_fit(buf, pos, idx)
            };
            match step {
                Some((frame, next_idx)) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 = next_idx;
                    }
                    stack.push((pos + frame.bytes.len(), 0));
                    frames.push(frame);
                }
                None => {
                    dead[pos] = true;
                    stack.pop();
                    frames.pop();
                }
            }
        }
        None
    }

    /// Takes as many whole frames as possible from the front of `buf`.
    ///
    /// An exact split is tried first. Otherwise frames are taken left to
    /// right until nothing fits, and the unconsumed tail is returned as a
    /// fresh copy. The remainder is `None` when every byte was consumed.
    pub fn split_greedy_partial<'a>(&self, buf: &'a [u8]) -> (Vec<Frame<'a>>, Option<Vec<u8>>) {
        if let Some(frames) = self.split_exact(buf) {
            return (frames, None);
        }

        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            match self.next_fit(buf, pos, 0) {
                Some((frame, _)) => {
                    pos += frame.bytes.len();
                    frames.push(frame);
                }
                None => break,
            }
        }

        let remainder = (pos < buf.len()).then(|| buf[pos..].to_vec());
        trace!(
            "greedy split: {} frames, {} bytes left over",
            frames.len(),
            buf.len() - pos
        );
        (frames, remainder)
    }
}
