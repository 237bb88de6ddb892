//! Capture orchestration for a single session.
//!
//! `CaptureRecorder` is the event loop between the serial reader and the
//! container writer. It owns all framing state: the silence framer, the
//! optional Modbus reassembler and the session counters. Nothing else
//! touches them, so no locking is involved.
//!
//! Each loop iteration waits for the first of:
//! - a chunk from the reader, appended to the pending packet;
//! - the silence deadline, which flushes the pending packet;
//! - the shutdown signal;
//! - a read error reported by the reader.
//!
//! Chunks take priority over the deadline, so a chunk already queued is
//! always appended before the packet it belongs to is flushed.
//!
//! On the way out the pending packet is flushed and any bytes the
//! reassembler still carries are written as one frame of unknown
//! direction. When the destination reports that its reader went away the
//! loop stops writing at once.
//!
//! Logging
//! - INFO for the session summary
//! - DEBUG for flush decisions and how the session ended
//! - TRACE for 64-byte hex previews of flushed packets

use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::{SourceError, WriteError};
use crate::framing::silence_framer::SilenceFramer;
use crate::framing::timing::LineTiming;
use crate::modbus::crc::FrameCheck;
use crate::modbus::reassembler::ModbusReassembler;
use crate::modbus::splitter::ModbusSplitter;
use crate::modbus::types::{Direction, TimedFrame};
use crate::pcap::writer::PcapWriter;

use super::types::{ByteChunk, CaptureStats, CaptureSummary, PacketBuffer, SessionEnd};

const PREVIEW_LEN: usize = 64;
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Whether the loop may keep writing after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Continue,
    ReaderGone,
}

/// Carriage-return status line on stderr, refreshed at most once a second.
#[derive(Debug)]
struct StatusLine {
    last: Option<Instant>,
    shown: bool,
}

impl StatusLine {
    fn new() -> Self {
        Self {
            last: None,
            shown: false,
        }
    }

    fn update(&mut self, stats: &CaptureStats, modbus: bool) {
        let now = Instant::now();
        if self.last.is_some_and(|t| now.duration_since(t) < STATUS_INTERVAL) {
            return;
        }
        self.last = Some(now);
        self.shown = true;
        let mut err = io::stderr().lock();
        let _ = if modbus {
            write!(
                err,
                "\rpackets: {} (TX: {}  RX: {}  ?: {})",
                stats.packets, stats.requests, stats.responses, stats.unknown
            )
        } else {
            write!(err, "\rpackets: {}", stats.packets)
        };
        let _ = err.flush();
    }

    fn finish(&self) {
        if self.shown {
            eprintln!();
        }
    }
}

/// Drives one capture session from serial chunks to container records.
pub struct CaptureRecorder<W: Write> {
    session_id: Uuid,
    framer: SilenceFramer,
    /// Present in frame-splitting mode.
    reassembler: Option<ModbusReassembler>,
    writer: PcapWriter<W>,
    stats: CaptureStats,
    status: Option<StatusLine>,
    start_time: DateTime<Utc>,
}

impl<W: Write> CaptureRecorder<W> {
    /// Builds the recorder for `config` around an already opened writer.
    ///
    /// The silence threshold comes from the line settings unless the
    /// configuration overrides it.
    pub fn new(session_id: Uuid, config: &CaptureConfig, writer: PcapWriter<W>) -> Self {
        let timing = LineTiming::from_line(&config.line);
        let threshold = timing.silence_threshold(config.silence_override, config.modbus);

        let reassembler = config.modbus.then(|| {
            let check = if config.verify_crc {
                FrameCheck::Crc16
            } else {
                FrameCheck::AcceptAll
            };
            ModbusReassembler::new(ModbusSplitter::new(check), timing, threshold)
        });

        debug!(
            "[{}] CaptureRecorder created: threshold={:?}, modbus={}",
            session_id, threshold, config.modbus
        );
        Self {
            session_id,
            framer: SilenceFramer::new(threshold),
            reassembler,
            writer,
            stats: CaptureStats::default(),
            status: config.verbose.then(StatusLine::new),
            start_time: Utc::now(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.framer.threshold()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Hands the writer back, typically to inspect what was written.
    pub fn into_writer(self) -> PcapWriter<W> {
        self.writer
    }

    /// Feeds one chunk to the framer, arming the silence deadline.
    pub fn on_chunk(&mut self, chunk: ByteChunk) {
        self.framer.on_chunk(chunk, Instant::now());
    }

    /// The silence deadline passed: write the pending packet.
    pub fn on_silence(&mut self) -> FlushOutcome {
        let outcome = match self.framer.on_timer_fire() {
            Some(packet) => self.flush_packet(packet),
            None => FlushOutcome::Continue,
        };
        if let Some(status) = self.status.as_mut() {
            status.update(&self.stats, self.reassembler.is_some());
        }
        outcome
    }

    /// Writes whatever is still pending: the unflushed packet, then the
    /// reassembler's carried bytes.
    pub fn finish(&mut self) -> FlushOutcome {
        if let Some(packet) = self.framer.force_flush() {
            if self.flush_packet(packet) == FlushOutcome::ReaderGone {
                return FlushOutcome::ReaderGone;
            }
        }
        let leftover = self.reassembler.as_mut().and_then(|r| r.drain());
        match leftover {
            Some(frame) => {
                debug!(
                    "[{}] writing {} carried bytes as a final unknown frame",
                    self.session_id,
                    frame.bytes.len()
                );
                self.write_frame(&frame)
            }
            None => FlushOutcome::Continue,
        }
    }

    fn flush_packet(&mut self, packet: PacketBuffer) -> FlushOutcome {
        let n = packet.bytes.len();
        trace!(
            "[{}] flush {} bytes: {}{}",
            self.session_id,
            n,
            hex::encode(&packet.bytes[..n.min(PREVIEW_LEN)]),
            if n > PREVIEW_LEN { " ..." } else { "" }
        );

        let frames = match self.reassembler.as_mut() {
            Some(r) => r.process(&packet.bytes, packet.first_byte_time),
            None => {
                let res = self.writer.write_record(packet.first_byte_time, &packet.bytes);
                return self.account(res, None, n);
            }
        };

        for frame in &frames {
            if self.write_frame(frame) == FlushOutcome::ReaderGone {
                return FlushOutcome::ReaderGone;
            }
        }
        FlushOutcome::Continue
    }

    fn write_frame(&mut self, frame: &TimedFrame) -> FlushOutcome {
        trace!(
            "[{}] frame {:?} {}",
            self.session_id,
            frame.direction,
            hex::encode(&frame.bytes[..frame.bytes.len().min(PREVIEW_LEN)])
        );
        let res = self
            .writer
            .write_tagged(frame.timestamp, frame.direction.into(), &frame.bytes);
        self.account(res, Some(frame.direction), frame.bytes.len())
    }

    fn account(
        &mut self,
        res: Result<(), WriteError>,
        direction: Option<Direction>,
        len: usize,
    ) -> FlushOutcome {
        match res {
            Ok(()) => {
                self.stats.record(direction, len);
                FlushOutcome::Continue
            }
            Err(WriteError::ReaderGone) => {
                info!("[{}] reader closed the pipe", self.session_id);
                FlushOutcome::ReaderGone
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!("[{}] dropped packet of {} bytes: {}", self.session_id, len, e);
                FlushOutcome::Continue
            }
        }
    }

    /// Runs the capture loop until the source ends, the reader of the
    /// destination goes away, or `shutdown` resolves.
    ///
    /// `chunks` and `source_err` are the two halves returned by
    /// [`spawn_reader`](super::serial_source::spawn_reader).
    pub async fn run<F>(
        &mut self,
        mut chunks: mpsc::Receiver<ByteChunk>,
        mut source_err: oneshot::Receiver<SourceError>,
        shutdown: F,
    ) -> CaptureSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut end = loop {
            let deadline = self.framer.deadline();
            tokio::select! {
                biased;

                chunk = chunks.recv() => match chunk {
                    Some(chunk) => self.on_chunk(chunk),
                    None => break match source_err.try_recv() {
                        Ok(e) => {
                            error!("[{}] {}", self.session_id, e);
                            SessionEnd::SourceFailed
                        }
                        Err(_) => SessionEnd::SourceClosed,
                    },
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.on_silence() == FlushOutcome::ReaderGone {
                        break SessionEnd::ReaderGone;
                    }
                }
                _ = &mut shutdown => break SessionEnd::Terminated,
                res = &mut source_err => match res {
                    Ok(e) => {
                        error!("[{}] {}", self.session_id, e);
                        break SessionEnd::SourceFailed;
                    }
                    Err(_) => break SessionEnd::SourceClosed,
                },
            }
        };

        if end != SessionEnd::ReaderGone && self.finish() == FlushOutcome::ReaderGone {
            end = SessionEnd::ReaderGone;
        }
        if let Some(status) = self.status.as_ref() {
            status.finish();
        }

        let duration = Utc::now() - self.start_time;
        debug!("[{}] capture loop ended: {}", self.session_id, end);
        if self.reassembler.is_some() {
            info!(
                "[{}] captured {} packets (TX: {}  RX: {}  ?: {}), {} dropped, {} bytes in {:?}",
                self.session_id,
                self.stats.packets,
                self.stats.requests,
                self.stats.responses,
                self.stats.unknown,
                self.stats.dropped,
                self.stats.bytes,
                duration
            );
        } else {
            info!(
                "[{}] captured {} packets, {} dropped, {} bytes in {:?}",
                self.session_id, self.stats.packets, self.stats.dropped, self.stats.bytes, duration
            );
        }

        CaptureSummary {
            session_id: self.session_id,
            stats: self.stats,
            end,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::TimeDelta;
    use tokio::time::sleep;

    use crate::configuration::types::LineSettings;
    use crate::pcap::reader::{PcapReader, Record, TaggedRecord};
    use crate::pcap::types::{Endianness, EventType, LinkTag, TimeVal};

    const REQ: [u8; 8] = [0x02, 0x03, 0x00, 0xB1, 0x00, 0x01, 0xD4, 0x1E];
    const RESP: [u8; 7] = [0x02, 0x03, 0x02, 0x02, 0xBC, 0xFC, 0x95];

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn chunk(bytes: &[u8], ms: i64) -> ByteChunk {
        ByteChunk::new(bytes.to_vec(), at(ms))
    }

    fn config(modbus: bool) -> CaptureConfig {
        CaptureConfig {
            port: "/dev/null".into(),
            output: PathBuf::from("unused.pcap"),
            line: LineSettings {
                baud: 9600,
                ..LineSettings::default()
            },
            silence_override: Some(Duration::from_millis(5)),
            byte_order: Endianness::Little,
            modbus,
            verify_crc: false,
            verbose: false,
            pipe: false,
        }
    }

    fn recorder(modbus: bool) -> CaptureRecorder<Vec<u8>> {
        let cfg = config(modbus);
        let writer = PcapWriter::open(Vec::new(), cfg.byte_order, cfg.link_tag()).unwrap();
        CaptureRecorder::new(Uuid::new_v4(), &cfg, writer)
    }

    fn records(rec: CaptureRecorder<Vec<u8>>) -> Vec<Record> {
        let bytes = rec.into_writer().into_inner();
        PcapReader::open(bytes.as_slice()).unwrap().records().unwrap()
    }

    /// Sink that accepts `budget` bytes and then fails every write.
    struct Failing {
        budget: usize,
        kind: io::ErrorKind,
    }

    impl Write for Failing {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(self.kind, "sink failure"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn failing_recorder(kind: io::ErrorKind) -> CaptureRecorder<Failing> {
        let cfg = config(false);
        let sink = Failing { budget: 24, kind };
        let writer = PcapWriter::open(sink, cfg.byte_order, cfg.link_tag()).unwrap();
        CaptureRecorder::new(Uuid::new_v4(), &cfg, writer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_splits_raw_packets() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();

        let feeder = tokio::spawn(async move {
            tx.send(chunk(&[1, 2, 3], 0)).await.unwrap();
            tx.send(chunk(&[4], 1)).await.unwrap();
            sleep(Duration::from_millis(50)).await;
            tx.send(chunk(&[5, 6], 51)).await.unwrap();
            sleep(Duration::from_millis(50)).await;
        });

        let mut rec = recorder(false);
        let summary = rec.run(rx, err_rx, std::future::pending()).await;
        feeder.await.unwrap();

        assert_eq!(summary.end, SessionEnd::SourceClosed);
        assert_eq!(summary.stats.packets, 2);
        assert_eq!(summary.stats.bytes, 6);

        let got = records(rec);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, vec![1, 2, 3, 4]);
        assert_eq!(got[0].timestamp(), Some(at(0)));
        assert_eq!(got[1].data, vec![5, 6]);
        assert_eq!(got[1].timestamp(), Some(at(51)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_modbus_response_split_across_silence() {
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();

        let feeder = tokio::spawn(async move {
            let first = [&REQ[..], &RESP[..2]].concat();
            tx.send(chunk(&first, 0)).await.unwrap();
            sleep(Duration::from_millis(20)).await;
            tx.send(chunk(&RESP[2..], 12)).await.unwrap();
            sleep(Duration::from_millis(20)).await;
        });

        let mut rec = recorder(true);
        let summary = rec.run(rx, err_rx, std::future::pending()).await;
        feeder.await.unwrap();

        assert_eq!(summary.stats.packets, 2);
        assert_eq!(summary.stats.requests, 1);
        assert_eq!(summary.stats.responses, 1);

        let bytes = rec.into_writer().into_inner();
        let reader = PcapReader::open(bytes.as_slice()).unwrap();
        assert_eq!(reader.header().link_type, LinkTag::Tagged.code());
        let got = reader.records().unwrap();
        assert_eq!(got.len(), 2);

        let req = TaggedRecord::parse(&got[0].data).unwrap();
        assert_eq!(req.event, EventType::TxStart);
        assert_eq!(req.frame, &REQ);
        assert_eq!(req.time, TimeVal::from_datetime(at(0)));

        let resp = TaggedRecord::parse(&got[1].data).unwrap();
        assert_eq!(resp.event, EventType::RxStart);
        assert_eq!(resp.frame, &RESP);
        let expected = at(0) + LineTiming::new(9600, 10).wire_delta(REQ.len());
        assert_eq!(resp.time, TimeVal::from_datetime(expected));
        assert_eq!(got[1].time, resp.time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_packet() {
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tx.send(chunk(&[9, 9], 0)).await.unwrap();
        stop_tx.send(()).unwrap();

        let mut rec = recorder(false);
        let summary = rec
            .run(rx, err_rx, async {
                let _ = stop_rx.await;
            })
            .await;

        assert_eq!(summary.end, SessionEnd::Terminated);
        assert_eq!(summary.stats.packets, 1);
        let got = records(rec);
        assert_eq!(got[0].data, vec![9, 9]);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_carried_remainder() {
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let first = [&REQ[..], &RESP[..2]].concat();
        tx.send(chunk(&first, 0)).await.unwrap();
        stop_tx.send(()).unwrap();

        let mut rec = recorder(true);
        let summary = rec
            .run(rx, err_rx, async {
                let _ = stop_rx.await;
            })
            .await;

        assert_eq!(summary.stats.packets, 2);
        assert_eq!(summary.stats.unknown, 1);
        let got = records(rec);
        let last = TaggedRecord::parse(&got[1].data).unwrap();
        assert_eq!(last.event, EventType::Unknown);
        assert_eq!(last.frame, &RESP[..2]);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_gone_stops_loop() {
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();
        tx.send(chunk(&[1, 2, 3], 0)).await.unwrap();

        let mut rec = failing_recorder(io::ErrorKind::BrokenPipe);
        let summary = rec.run(rx, err_rx, std::future::pending()).await;

        assert_eq!(summary.end, SessionEnd::ReaderGone);
        assert_eq!(summary.stats.packets, 0);
        assert_eq!(summary.stats.dropped, 0);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_write_failures_drop_record() {
        let (tx, rx) = mpsc::channel(8);
        let (_err_tx, err_rx) = oneshot::channel();
        tx.send(chunk(&[1, 2, 3], 0)).await.unwrap();
        drop(tx);

        let mut rec = failing_recorder(io::ErrorKind::Other);
        let summary = rec.run(rx, err_rx, std::future::pending()).await;

        assert_eq!(summary.end, SessionEnd::SourceClosed);
        assert_eq!(summary.stats.packets, 0);
        assert_eq!(summary.stats.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_ends_session_after_flush() {
        let (tx, rx) = mpsc::channel(8);
        let (err_tx, err_rx) = oneshot::channel();
        tx.send(chunk(&[7, 7, 7], 0)).await.unwrap();
        err_tx
            .send(SourceError::ReadFailed(io::Error::new(io::ErrorKind::Other, "unplugged")))
            .unwrap();
        drop(tx);

        let mut rec = recorder(false);
        let summary = rec.run(rx, err_rx, std::future::pending()).await;

        assert_eq!(summary.end, SessionEnd::SourceFailed);
        assert_eq!(summary.stats.packets, 1);
        assert_eq!(records(rec)[0].data, vec![7, 7, 7]);
    }
}
