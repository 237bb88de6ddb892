//! Common data types used across the data_capture subsystem.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::modbus::types::Direction;

/// Bytes returned by one read of the serial source.
///
/// Always an owned copy, never a view into the reader's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteChunk {
    pub bytes: Vec<u8>,
    /// Wall-clock time the read returned.
    pub arrival_time: DateTime<Utc>,
}

impl ByteChunk {
    pub fn new(bytes: Vec<u8>, arrival_time: DateTime<Utc>) -> Self {
        Self {
            bytes,
            arrival_time,
        }
    }
}

/// Bytes collected between two silences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    pub bytes: Vec<u8>,
    /// Arrival time of the chunk that made the buffer non-empty.
    pub first_byte_time: DateTime<Utc>,
}

/// Running counters for one capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Records written to the container.
    pub packets: u64,
    /// Written records classified as requests (TX).
    pub requests: u64,
    /// Written records classified as responses (RX).
    pub responses: u64,
    /// Written records of unknown direction.
    pub unknown: u64,
    /// Records lost to write failures other than a departed reader.
    pub dropped: u64,
    /// Payload bytes written, excluding headers and tagged prefixes.
    pub bytes: u64,
}

impl CaptureStats {
    /// Counts one successfully written record.
    pub fn record(&mut self, direction: Option<Direction>, payload_len: usize) {
        self.packets += 1;
        self.bytes += payload_len as u64;
        match direction {
            Some(Direction::Request) => self.requests += 1,
            Some(Direction::Response) => self.responses += 1,
            Some(Direction::Unknown) => self.unknown += 1,
            None => {}
        }
    }
}

/// Why a capture session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Interrupt or terminate signal.
    Terminated,
    /// The serial source reported a read error.
    SourceFailed,
    /// The serial source reached end of stream.
    SourceClosed,
    /// The destination pipe lost its reader.
    ReaderGone,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionEnd::Terminated => "terminated",
            SessionEnd::SourceFailed => "source read error",
            SessionEnd::SourceClosed => "source closed",
            SessionEnd::ReaderGone => "reader closed the pipe",
        };
        f.write_str(s)
    }
}

/// What a finished session reports back to the caller.
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub session_id: Uuid,
    pub stats: CaptureStats,
    pub end: SessionEnd,
    pub duration: Duration,
}
