//! Container writer.
//!
//! `PcapWriter` emits the 24-byte global header on open and then one
//! record per call: a 16-byte record header followed by the payload.
//! Nothing is buffered across calls, so records reach the sink in call
//! order and a live consumer (named pipe) sees each one as soon as it
//! is written.
//!
//! Each record is encoded into one contiguous buffer before it touches
//! the sink. A failing sink therefore never receives a header without
//! its payload from a previous, successful call.

use std::io::{self, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use log::trace;

use crate::error_handling::types::WriteError;

use super::types::{
    Endianness, EventType, GlobalHeader, LinkTag, TimeVal, GLOBAL_HEADER_LEN, MAGIC,
    RECORD_HEADER_LEN, TAGGED_PREFIX_LEN,
};

pub struct PcapWriter<W: Write> {
    sink: W,
    order: Endianness,
    link: LinkTag,
    records: u64,
}

impl<W: Write> PcapWriter<W> {
    /// Writes the global header to `sink` and returns the writer.
    ///
    /// Errors
    /// - [`WriteError::ReaderGone`] if the sink reports a broken pipe.
    /// - [`WriteError::Io`] for any other sink failure.
    pub fn open(mut sink: W, order: Endianness, link: LinkTag) -> Result<Self, WriteError> {
        let header = GlobalHeader::new(link);
        let mut buf = Vec::with_capacity(GLOBAL_HEADER_LEN);
        match order {
            Endianness::Little => encode_global::<LittleEndian>(&mut buf, &header)?,
            Endianness::Big => encode_global::<BigEndian>(&mut buf, &header)?,
        }
        sink.write_all(&buf)?;
        sink.flush()?;
        Ok(Self {
            sink,
            order,
            link,
            records: 0,
        })
    }

    /// Writes one record. Captured and original length are both the
    /// payload length.
    pub fn write_record(&mut self, ts: DateTime<Utc>, payload: &[u8]) -> Result<(), WriteError> {
        let tv = TimeVal::from_datetime(ts);
        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
        match self.order {
            Endianness::Little => encode_record_header::<LittleEndian>(&mut buf, tv, payload.len())?,
            Endianness::Big => encode_record_header::<BigEndian>(&mut buf, tv, payload.len())?,
        }
        buf.extend_from_slice(payload);

        self.sink.write_all(&buf)?;
        self.sink.flush()?;
        self.records += 1;
        trace!(
            "record {} written: {}.{:06} len={}",
            self.records,
            tv.secs,
            tv.micros,
            payload.len()
        );
        Ok(())
    }

    /// Writes one record whose payload is the tagged prefix followed by
    /// `frame`. The record timestamp and the prefix timestamp are the same.
    pub fn write_tagged(
        &mut self,
        ts: DateTime<Utc>,
        event: EventType,
        frame: &[u8],
    ) -> Result<(), WriteError> {
        let mut payload = Vec::with_capacity(TAGGED_PREFIX_LEN + frame.len());
        payload.extend_from_slice(&tagged_prefix(ts, event));
        payload.extend_from_slice(frame);
        self.write_record(ts, &payload)
    }

    pub fn link_tag(&self) -> LinkTag {
        self.link
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// 12-byte serial event prefix. Always big-endian regardless of the
/// container byte order.
pub fn tagged_prefix(ts: DateTime<Utc>, event: EventType) -> [u8; TAGGED_PREFIX_LEN] {
    let tv = TimeVal::from_datetime(ts);
    let mut hdr = [0u8; TAGGED_PREFIX_LEN];
    BigEndian::write_u32(&mut hdr[0..4], tv.secs);
    BigEndian::write_u32(&mut hdr[4..8], tv.micros);
    hdr[8] = event as u8;
    hdr
}

fn encode_global<B: ByteOrder>(buf: &mut Vec<u8>, header: &GlobalHeader) -> io::Result<()> {
    buf.write_u32::<B>(MAGIC)?;
    buf.write_u16::<B>(header.version_major)?;
    buf.write_u16::<B>(header.version_minor)?;
    buf.write_i32::<B>(header.thiszone)?;
    buf.write_u32::<B>(header.sigfigs)?;
    buf.write_u32::<B>(header.snaplen)?;
    buf.write_u32::<B>(header.link_type)?;
    Ok(())
}

fn encode_record_header<B: ByteOrder>(buf: &mut Vec<u8>, tv: TimeVal, len: usize) -> io::Result<()> {
    let len = len as u32;
    buf.write_u32::<B>(tv.secs)?;
    buf.write_u32::<B>(tv.micros)?;
    buf.write_u32::<B>(len)?;
    buf.write_u32::<B>(len)?;
    Ok(())
}
