//! Timer-driven accumulation of serial bytes into packets.
//!
//! The framer holds the bytes seen since the last silence and the deadline
//! at which the line counts as quiet. It never sleeps itself: the capture
//! loop waits on [`SilenceFramer::deadline`] and calls
//! [`SilenceFramer::on_timer_fire`] when it passes.

use std::time::Duration;

use tokio::time::Instant;

use crate::data_capture::types::{ByteChunk, PacketBuffer};

#[derive(Debug)]
pub struct SilenceFramer {
    threshold: Duration,
    current: Option<PacketBuffer>,
    deadline: Option<Instant>,
}

impl SilenceFramer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            current: None,
            deadline: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Appends a chunk and re-arms the silence deadline from `now`.
    ///
    /// The buffer's first-byte time is taken from the chunk that turns an
    /// empty buffer into a non-empty one. Empty chunks change nothing.
    pub fn on_chunk(&mut self, chunk: ByteChunk, now: Instant) {
        if chunk.bytes.is_empty() {
            return;
        }
        match self.current.as_mut() {
            Some(buf) => buf.bytes.extend_from_slice(&chunk.bytes),
            None => {
                self.current = Some(PacketBuffer {
                    bytes: chunk.bytes,
                    first_byte_time: chunk.arrival_time,
                })
            }
        }
        self.deadline = Some(now + self.threshold);
    }

    /// When the pending packet is complete, if any bytes are buffered.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn buffered_len(&self) -> usize {
        self.current.as_ref().map_or(0, |b| b.bytes.len())
    }

    /// The silence deadline passed.
    pub fn on_timer_fire(&mut self) -> Option<PacketBuffer> {
        self.take()
    }

    /// Flush regardless of the deadline, on shutdown or source failure.
    pub fn force_flush(&mut self) -> Option<PacketBuffer> {
        self.take()
    }

    fn take(&mut self) -> Option<PacketBuffer> {
        self.deadline = None;
        self.current.take()
    }
}
