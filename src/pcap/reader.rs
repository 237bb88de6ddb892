//! Container reader.
//!
//! Reads back what [`PcapWriter`](super::writer::PcapWriter) produces, in
//! either byte order. The byte order is detected from the magic number.

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};

use super::types::{
    Endianness, EventType, GlobalHeader, TimeVal, GLOBAL_HEADER_LEN, MAGIC, RECORD_HEADER_LEN,
    TAGGED_PREFIX_LEN,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub time: TimeVal,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

impl Record {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.time.to_datetime()
    }
}

/// Decoded view of a protocol-tagged payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedRecord<'a> {
    pub time: TimeVal,
    pub event: EventType,
    pub frame: &'a [u8],
}

impl<'a> TaggedRecord<'a> {
    /// Splits a tagged payload into its prefix fields and the frame bytes.
    /// Returns `None` if the payload is shorter than the prefix or the
    /// event-type byte is not one this tool writes.
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < TAGGED_PREFIX_LEN {
            return None;
        }
        let event = EventType::from_byte(payload[8])?;
        Some(Self {
            time: TimeVal {
                secs: BigEndian::read_u32(&payload[0..4]),
                micros: BigEndian::read_u32(&payload[4..8]),
            },
            event,
            frame: &payload[TAGGED_PREFIX_LEN..],
        })
    }
}

pub struct PcapReader<R: Read> {
    inner: R,
    order: Endianness,
    header: GlobalHeader,
}

impl<R: Read> PcapReader<R> {
    pub fn open(mut inner: R) -> io::Result<Self> {
        let mut raw = [0u8; GLOBAL_HEADER_LEN];
        inner.read_exact(&mut raw)?;

        let order = if LittleEndian::read_u32(&raw[0..4]) == MAGIC {
            Endianness::Little
        } else if BigEndian::read_u32(&raw[0..4]) == MAGIC {
            Endianness::Big
        } else {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic number"));
        };

        let header = match order {
            Endianness::Little => decode_global::<LittleEndian>(&raw),
            Endianness::Big => decode_global::<BigEndian>(&raw),
        };
        Ok(Self { inner, order, header })
    }

    pub fn byte_order(&self) -> Endianness {
        self.order
    }

    pub fn header(&self) -> &GlobalHeader {
        &self.header
    }

    /// Next record, or `None` at a clean end of stream. A stream that ends
    /// in the middle of a record is an `UnexpectedEof` error.
    pub fn next_record(&mut self) -> io::Result<Option<Record>> {
        let mut raw = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < raw.len() {
            match self.inner.read(&mut raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < raw.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated record header",
            ));
        }

        let (time, incl_len, orig_len) = match self.order {
            Endianness::Little => decode_record_header::<LittleEndian>(&raw),
            Endianness::Big => decode_record_header::<BigEndian>(&raw),
        };
        // sized by the bytes actually present, not the declared length
        let mut data = Vec::new();
        (&mut self.inner)
            .take(u64::from(incl_len))
            .read_to_end(&mut data)?;
        if data.len() < incl_len as usize {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated record data",
            ));
        }
        Ok(Some(Record {
            time,
            orig_len,
            data,
        }))
    }

    /// Reads every remaining record.
    pub fn records(mut self) -> io::Result<Vec<Record>> {
        let mut out = Vec::new();
        while let Some(rec) = self.next_record()? {
            out.push(rec);
        }
        Ok(out)
    }
}

fn decode_global<B: ByteOrder>(raw: &[u8; GLOBAL_HEADER_LEN]) -> GlobalHeader {
    GlobalHeader {
        version_major: B::read_u16(&raw[4..6]),
        version_minor: B::read_u16(&raw[6..8]),
        thiszone: B::read_i32(&raw[8..12]),
        sigfigs: B::read_u32(&raw[12..16]),
        snaplen: B::read_u32(&raw[16..20]),
        link_type: B::read_u32(&raw[20..24]),
    }
}

fn decode_record_header<B: ByteOrder>(raw: &[u8; RECORD_HEADER_LEN]) -> (TimeVal, u32, u32) {
    let time = TimeVal {
        secs: B::read_u32(&raw[0..4]),
        micros: B::read_u32(&raw[4..8]),
    };
    (time, B::read_u32(&raw[8..12]), B::read_u32(&raw[12..16]))
}
