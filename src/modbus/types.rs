//! Common data types of the Modbus RTU splitter.

use chrono::{DateTime, Utc};

use crate::pcap::types::EventType;

/// Transfer direction of a Modbus RTU frame as far as its shape tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Shape does not distinguish request from response (0x05/0x06) or
    /// the bytes could not be parsed at all.
    Unknown,
    /// Master to slave.
    Request,
    /// Slave to master, including exception responses.
    Response,
}

impl From<Direction> for EventType {
    fn from(dir: Direction) -> Self {
        match dir {
            Direction::Unknown => EventType::Unknown,
            Direction::Request => EventType::TxStart,
            Direction::Response => EventType::RxStart,
        }
    }
}

/// One possible interpretation of the bytes at a presumed frame start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCandidate {
    pub length: usize,
    pub direction: Direction,
}

impl FrameCandidate {
    pub const fn new(length: usize, direction: Direction) -> Self {
        Self { length, direction }
    }
}

/// A frame borrowed from the buffer it was split out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub bytes: &'a [u8],
    pub direction: Direction,
}

/// An owned frame with its reconstructed arrival time, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedFrame {
    pub bytes: Vec<u8>,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
}

impl TimedFrame {
    pub fn unknown(bytes: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            bytes,
            direction: Direction::Unknown,
            timestamp,
        }
    }
}
