//! Stitching frames across silence windows.
//!
//! A frame may straddle two flushes when the line goes quiet mid-frame for
//! longer than the silence threshold, typically a USB adapter delivering a
//! burst late. The reassembler keeps the unconsumed tail of one flush and
//! offers it as a prefix to the next one, unless too much time has passed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, trace};

use super::splitter::ModbusSplitter;
use super::types::{Frame, TimedFrame};
use crate::framing::timing::{exceeds, LineTiming};

/// Bytes left over from an earlier flush and the estimated wire time of
/// their first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Remainder {
    bytes: Vec<u8>,
    as_of: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ModbusReassembler {
    splitter: ModbusSplitter,
    timing: LineTiming,
    threshold: Duration,
    remainder: Option<Remainder>,
}

impl ModbusReassembler {
    pub fn new(splitter: ModbusSplitter, timing: LineTiming, threshold: Duration) -> Self {
        Self {
            splitter,
            timing,
            threshold,
            remainder: None,
        }
    }

    /// Splits one flushed buffer into timestamped frames.
    ///
    /// `first_byte_time` is when the first byte of `bytes` arrived. Frames
    /// are returned in wire order; bytes that never parse come back as a
    /// single frame of unknown direction.
    pub fn process(&mut self, bytes: &[u8], first_byte_time: DateTime<Utc>) -> Vec<TimedFrame> {
        let carried = self.remainder.take().filter(|r| {
            let age = first_byte_time - r.as_of;
            let stale = exceeds(age, self.threshold);
            if stale {
                debug!(
                    "discarding stale remainder of {} bytes (age {} us, threshold {} us)",
                    r.bytes.len(),
                    age.num_microseconds().unwrap_or(i64::MAX),
                    self.threshold.as_micros()
                );
            }
            !stale
        });

        let (frames, rest) = self.splitter.split_greedy_partial(bytes);
        if !frames.is_empty() {
            if let Some(r) = carried {
                debug!(
                    "dropping {} carried bytes, new buffer parses on its own",
                    r.bytes.len()
                );
            }
            return self.emit(&frames, rest, first_byte_time);
        }

        match carried {
            Some(r) => {
                let combined = [r.bytes.as_slice(), bytes].concat();
                let (frames, rest) = self.splitter.split_greedy_partial(&combined);
                if frames.is_empty() {
                    vec![TimedFrame::unknown(combined, r.as_of)]
                } else {
                    debug!(
                        "joined {} carried bytes with {} new bytes",
                        r.bytes.len(),
                        bytes.len()
                    );
                    self.emit(&frames, rest, r.as_of)
                }
            }
            None => vec![TimedFrame::unknown(bytes.to_vec(), first_byte_time)],
        }
    }

    fn emit(
        &mut self,
        frames: &[Frame<'_>],
        rest: Option<Vec<u8>>,
        base: DateTime<Utc>,
    ) -> Vec<TimedFrame> {
        let mut offset = 0;
        let out: Vec<TimedFrame> = frames
            .iter()
            .map(|f| {
                let frame = TimedFrame {
                    bytes: f.bytes.to_vec(),
                    direction: f.direction,
                    timestamp: base + self.timing.wire_delta(offset),
                };
                offset += f.bytes.len();
                frame
            })
            .collect();

        self.remainder = rest.map(|bytes| {
            trace!("carrying remainder {}", hex::encode(&bytes));
            Remainder {
                bytes,
                as_of: base + self.timing.wire_delta(offset),
            }
        });
        out
    }

    /// Bytes currently carried towards the next flush.
    pub fn remainder(&self) -> Option<&[u8]> {
        self.remainder.as_ref().map(|r| r.bytes.as_slice())
    }

    /// Hands out the carried remainder as a final unknown frame.
    pub fn drain(&mut self) -> Option<TimedFrame> {
        self.remainder
            .take()
            .map(|r| TimedFrame::unknown(r.bytes, r.as_of))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::crc::FrameCheck;
    use crate::modbus::types::Direction;
    use chrono::TimeDelta;

    const REQ: [u8; 8] = [0x02, 0x03, 0x00, 0xB1, 0x00, 0x01, 0xD4, 0x1E];
    const RESP: [u8; 7] = [0x02, 0x03, 0x02, 0x02, 0xBC, 0xFC, 0x95];

    fn timing() -> LineTiming {
        LineTiming::new(9600, 10)
    }

    fn reassembler() -> ModbusReassembler {
        let t = timing();
        ModbusReassembler::new(ModbusSplitter::default(), t, t.modbus_silence())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_pair_in_one_window() {
        let mut r = reassembler();
        let buf = [&REQ[..], &RESP[..]].concat();
        let frames = r.process(&buf, t0());

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].bytes, REQ);
        assert_eq!(frames[0].direction, Direction::Request);
        assert_eq!(frames[0].timestamp, t0());
        assert_eq!(frames[1].bytes, RESP);
        assert_eq!(frames[1].direction, Direction::Response);
        assert_eq!(frames[1].timestamp, t0() + timing().wire_delta(8));
        assert!(r.remainder().is_none());
    }

    #[test]
    fn test_response_split_across_windows() {
        let mut r = reassembler();
        let first = [&REQ[..], &RESP[..2]].concat();
        let frames = r.process(&first, t0());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].direction, Direction::Request);
        assert_eq!(r.remainder(), Some(&RESP[..2]));

        let second_at = t0() + TimeDelta::milliseconds(40);
        let frames = r.process(&RESP[2..], second_at);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes, RESP);
        assert_eq!(frames[0].direction, Direction::Response);
        // stamped with the estimated arrival of the carried bytes
        assert_eq!(frames[0].timestamp, t0() + timing().wire_delta(8));
        assert!(r.remainder().is_none());
    }

    #[test]
    fn test_split_matches_single_pass() {
        let stream = [&REQ[..], &RESP[..], &REQ[..], &RESP[..]].concat();
        let whole: Vec<_> = reassembler()
            .process(&stream, t0())
            .into_iter()
            .map(|f| (f.bytes, f.direction))
            .collect();

        // the response tail in the second window does not parse alone, so it
        // is joined with the two carried bytes
        let mut r = reassembler();
        let mut parts = r.process(&stream[..10], t0());
        parts.extend(r.process(&stream[10..15], t0() + TimeDelta::milliseconds(20)));
        assert!(r.remainder().is_none());
        parts.extend(r.process(&stream[15..], t0() + TimeDelta::milliseconds(60)));
        let parts: Vec<_> = parts.into_iter().map(|f| (f.bytes, f.direction)).collect();

        assert_eq!(whole.len(), 4);
        assert_eq!(whole, parts);
    }

    #[test]
    fn test_stale_remainder_is_not_joined() {
        let mut r = reassembler();
        r.process(&[&REQ[..], &RESP[..2]].concat(), t0());
        assert!(r.remainder().is_some());

        let late = t0() + TimeDelta::seconds(5);
        let frames = r.process(&RESP[2..], late);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].direction, Direction::Unknown);
        assert_eq!(frames[0].bytes, RESP[2..]);
        assert_eq!(frames[0].timestamp, late);
        assert!(r.remainder().is_none());
    }

    #[test]
    fn test_remainder_dropped_when_new_buffer_parses() {
        let mut r = reassembler();
        r.process(&[&REQ[..], &RESP[..3]].concat(), t0());
        let frames = r.process(&REQ, t0() + TimeDelta::milliseconds(20));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes, REQ);
        assert!(r.remainder().is_none());
    }

    #[test]
    fn test_unparseable_join_is_one_unknown_frame() {
        let mut r = reassembler();
        r.process(&[&REQ[..], &[0x02, 0x03][..]].concat(), t0());
        let frames = r.process(&[0xFF, 0xFF], t0() + TimeDelta::milliseconds(10));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].direction, Direction::Unknown);
        assert_eq!(frames[0].bytes, vec![0x02, 0x03, 0xFF, 0xFF]);
        assert_eq!(frames[0].timestamp, t0() + timing().wire_delta(8));
        assert!(r.remainder().is_none());
    }

    #[test]
    fn test_garbage_without_remainder() {
        let mut r = reassembler();
        let frames = r.process(&[0xFF, 0xFE, 0xFD], t0());
        assert_eq!(frames, vec![TimedFrame::unknown(vec![0xFF, 0xFE, 0xFD], t0())]);
        assert!(r.drain().is_none());
    }

    #[test]
    fn test_drain_emits_remainder_once() {
        let mut r = reassembler();
        r.process(&[&REQ[..], &RESP[..4]].concat(), t0());
        let last = r.drain().unwrap();
        assert_eq!(last.bytes, RESP[..4]);
        assert_eq!(last.direction, Direction::Unknown);
        assert_eq!(last.timestamp, t0() + timing().wire_delta(8));
        assert!(r.drain().is_none());
    }

    #[test]
    fn test_crc_mode_rejects_corrupted_frame() {
        let t = timing();
        let mut r = ModbusReassembler::new(
            ModbusSplitter::new(FrameCheck::Crc16),
            t,
            t.modbus_silence(),
        );
        let mut bad = REQ;
        bad[3] ^= 0x01;
        let frames = r.process(&bad, t0());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].direction, Direction::Unknown);
    }
}
