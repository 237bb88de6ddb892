//! Wire-time arithmetic for an asynchronous serial line.

use std::time::Duration;

use chrono::TimeDelta;

use crate::configuration::types::LineSettings;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Largest Modbus RTU frame, in bytes.
pub const MAX_RTU_FRAME: usize = 256;

/// Slack added to the frame-splitting threshold for USB serial adapters,
/// which deliver bytes in bursts rather than as they arrive on the wire.
pub const ADAPTER_JITTER: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTiming {
    baud: u32,
    bits_per_char: u32,
}

impl LineTiming {
    pub fn new(baud: u32, bits_per_char: u32) -> Self {
        Self {
            baud: baud.max(1),
            bits_per_char,
        }
    }

    pub fn from_line(line: &LineSettings) -> Self {
        Self::new(line.baud, line.bits_per_char())
    }

    pub fn bits_per_char(&self) -> u32 {
        self.bits_per_char
    }

    fn wire_nanos(&self, bytes: usize) -> u128 {
        bytes as u128 * u128::from(self.bits_per_char) * NANOS_PER_SEC / u128::from(self.baud)
    }

    /// Time to transmit `bytes` characters back to back.
    pub fn wire_time(&self, bytes: usize) -> Duration {
        Duration::from_nanos(self.wire_nanos(bytes).min(u128::from(u64::MAX)) as u64)
    }

    /// Same as [`wire_time`](Self::wire_time), as an offset for wall-clock timestamps.
    pub fn wire_delta(&self, bytes: usize) -> TimeDelta {
        TimeDelta::nanoseconds(self.wire_nanos(bytes).min(i64::MAX as u128) as i64)
    }

    pub fn char_time(&self) -> Duration {
        self.wire_time(1)
    }

    /// 3.5 character times, the inter-frame gap of byte-oriented serial links.
    pub fn default_silence(&self) -> Duration {
        let nanos = 35 * u128::from(self.bits_per_char) * NANOS_PER_SEC / (10 * u128::from(self.baud));
        Duration::from_nanos(nanos as u64)
    }

    /// Wire time of a maximum-length RTU frame plus adapter jitter.
    pub fn modbus_silence(&self) -> Duration {
        self.wire_time(MAX_RTU_FRAME) + ADAPTER_JITTER
    }

    /// Resolves the silence threshold. An explicit override wins over both
    /// derived values. The result is never zero.
    pub fn silence_threshold(&self, explicit: Option<Duration>, modbus: bool) -> Duration {
        let threshold = match explicit {
            Some(d) => d,
            None if modbus => self.modbus_silence(),
            None => self.default_silence(),
        };
        threshold.max(Duration::from_nanos(1))
    }
}

/// Whether a wall-clock gap is strictly longer than `threshold`.
pub fn exceeds(gap: TimeDelta, threshold: Duration) -> bool {
    match TimeDelta::from_std(threshold) {
        Ok(limit) => gap > limit,
        Err(_) => false,
    }
}
