//! Fixed layouts of the capture container.

use chrono::{DateTime, TimeZone, Utc};

pub const MAGIC: u32 = 0xa1b2_c3d4;
pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 4;
/// Declared maximum capture length. Records are never truncated to it.
pub const SNAPLEN: u32 = 65_535;

pub const GLOBAL_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;
pub const TAGGED_PREFIX_LEN: usize = 12;

/// Byte order of the global and per-record headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Link-type tag written into the global header. Selects whether record
/// payloads carry the protocol-tagged prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTag {
    /// Untagged raw payload (DLT_USER0).
    Raw,
    /// 12-byte serial event prefix followed by the frame (DLT_RTAC_SERIAL).
    Tagged,
}

impl LinkTag {
    pub fn code(&self) -> u32 {
        match self {
            LinkTag::Raw => 147,
            LinkTag::Tagged => 250,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            147 => Some(LinkTag::Raw),
            250 => Some(LinkTag::Tagged),
            _ => None,
        }
    }
}

/// Event-type byte of the tagged prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Unknown = 0x00,
    TxStart = 0x01,
    RxStart = 0x02,
}

impl EventType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(EventType::Unknown),
            0x01 => Some(EventType::TxStart),
            0x02 => Some(EventType::RxStart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub link_type: u32,
}

impl GlobalHeader {
    pub fn new(link: LinkTag) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            thiszone: 0,
            sigfigs: 0,
            snaplen: SNAPLEN,
            link_type: link.code(),
        }
    }
}

/// Seconds and microseconds components of a record timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeVal {
    pub secs: u32,
    pub micros: u32,
}

impl TimeVal {
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self {
            secs: ts.timestamp() as u32,
            // leap-second representation can exceed one second
            micros: ts.timestamp_subsec_micros().min(999_999),
        }
    }

    /// `None` for a microseconds field outside `0..1_000_000`.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        if self.micros >= 1_000_000 {
            return None;
        }
        Utc.timestamp_opt(i64::from(self.secs), self.micros * 1_000)
            .single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeval_truncates_to_micros() {
        let ts = Utc
            .with_ymd_and_hms(2025, 1, 15, 10, 30, 45)
            .unwrap()
            .checked_add_signed(chrono::Duration::nanoseconds(123_456_789))
            .unwrap();
        let tv = TimeVal::from_datetime(ts);
        assert_eq!(tv.secs, ts.timestamp() as u32);
        assert_eq!(tv.micros, 123_456);
        assert_eq!(
            tv.to_datetime().unwrap().timestamp_subsec_nanos(),
            123_456_000
        );
    }

    #[test]
    fn test_out_of_range_micros_have_no_timestamp() {
        assert!(TimeVal { secs: 1, micros: 5_000_000 }.to_datetime().is_none());
        assert!(TimeVal { secs: 1, micros: 1_000_000 }.to_datetime().is_none());
        assert!(TimeVal { secs: 1, micros: 999_999 }.to_datetime().is_some());
    }

    #[test]
    fn test_link_codes() {
        assert_eq!(LinkTag::Raw.code(), 147);
        assert_eq!(LinkTag::Tagged.code(), 250);
        assert_eq!(LinkTag::from_code(250), Some(LinkTag::Tagged));
        assert_eq!(LinkTag::from_code(1), None);
    }
}
