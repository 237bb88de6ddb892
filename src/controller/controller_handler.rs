use std::future::Future;
use std::io::{Read, Write};

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::configuration::types::{CaptureConfig, Parity};
use crate::data_capture::recorder::CaptureRecorder;
use crate::data_capture::serial_source::{open_serial, spawn_reader};
use crate::data_capture::sink::{create_file, open_pipe, OutputSink};
use crate::data_capture::types::{CaptureStats, CaptureSummary, SessionEnd};
use crate::error_handling::types::CaptureError;
use crate::pcap::writer::PcapWriter;

/// Owns one capture session from opening the port to the final summary.
pub struct Controller {
    config: CaptureConfig,
    session_id: Uuid,
}

impl Controller {
    pub fn new(config: CaptureConfig) -> Self {
        let session_id = Uuid::new_v4();
        debug!("[{}] controller created for {}", session_id, config.port);
        Self { config, session_id }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Opens the serial port, then the destination, and captures until a
    /// shutdown signal, the end of the source, or the loss of the pipe
    /// reader.
    ///
    /// The serial port is released if the destination cannot be opened.
    pub async fn run(self) -> Result<CaptureSummary, CaptureError> {
        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);

        let source = open_serial(&self.config.port, &self.config.line).map_err(|e| {
            error!("[{}] {}", self.session_id, e);
            e
        })?;

        let sink = if self.config.pipe {
            tokio::select! {
                res = open_pipe(&self.config.output) => res,
                _ = shutdown.as_mut() => {
                    info!("[{}] interrupted while waiting for a pipe reader", self.session_id);
                    return Ok(self.empty_summary(SessionEnd::Terminated));
                }
            }
        } else {
            create_file(&self.config.output)
        };
        let sink: OutputSink = match sink {
            Ok(sink) => sink,
            Err(e) => {
                error!("[{}] {}", self.session_id, e);
                drop(source);
                debug!("[{}] released {}", self.session_id, self.config.port);
                return Err(e.into());
            }
        };

        self.capture(source, sink, shutdown.as_mut()).await
    }

    /// Captures from an already opened source into an already opened sink.
    pub async fn capture<S, W, F>(
        &self,
        source: S,
        sink: W,
        shutdown: F,
    ) -> Result<CaptureSummary, CaptureError>
    where
        S: Read + Send + 'static,
        W: Write,
        F: Future<Output = ()>,
    {
        let writer = match PcapWriter::open(sink, self.config.byte_order, self.config.link_tag()) {
            Ok(writer) => writer,
            Err(e) if e.is_reader_gone() => {
                info!("[{}] reader closed the pipe before the header", self.session_id);
                return Ok(self.empty_summary(SessionEnd::ReaderGone));
            }
            Err(e) => return Err(e.into()),
        };
        let mut recorder = CaptureRecorder::new(self.session_id, &self.config, writer);

        let line = &self.config.line;
        info!(
            "[{}] capturing {} at {} baud ({}{}{}) to {}, silence {:?}{}",
            self.session_id,
            self.config.port,
            line.baud,
            line.data_bits,
            parity_letter(line.parity),
            line.stop_bits.count(),
            self.config.output.display(),
            recorder.threshold(),
            if self.config.modbus { ", modbus framing" } else { "" }
        );

        let (chunks, source_err, reader) = spawn_reader(source, self.session_id);
        let summary = recorder.run(chunks, source_err, shutdown).await;
        // closes the destination and removes a pipe
        drop(recorder);

        if let Err(e) = reader.await {
            warn!("[{}] serial reader task failed: {}", self.session_id, e);
        }
        Ok(summary)
    }

    fn empty_summary(&self, end: SessionEnd) -> CaptureSummary {
        CaptureSummary {
            session_id: self.session_id,
            stats: CaptureStats::default(),
            end,
            duration: chrono::Duration::zero(),
        }
    }
}

fn parity_letter(p: Parity) -> char {
    match p {
        Parity::None => 'N',
        Parity::Odd => 'O',
        Parity::Even => 'E',
        Parity::Mark => 'M',
        Parity::Space => 'S',
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}, only Ctrl+C will stop the capture", e);
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term_signal {
                    Some(mut sig) => {
                        sig.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::configuration::types::LineSettings;
    use crate::error_handling::types::SourceError;
    use crate::pcap::reader::PcapReader;
    use crate::pcap::types::Endianness;

    fn config(output: PathBuf) -> CaptureConfig {
        CaptureConfig {
            port: "/dev/rtucap-test-missing".into(),
            output,
            line: LineSettings::default(),
            silence_override: Some(Duration::from_millis(2)),
            byte_order: Endianness::Big,
            modbus: false,
            verify_crc: false,
            verbose: false,
            pipe: false,
        }
    }

    #[test]
    fn test_each_controller_gets_its_own_session() {
        let a = Controller::new(config(PathBuf::from("a.pcap")));
        let b = Controller::new(config(PathBuf::from("b.pcap")));
        assert_ne!(a.session_id(), b.session_id());
    }

    #[tokio::test]
    async fn test_missing_port_opens_nothing() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("never.pcap");
        let res = Controller::new(config(output.clone())).run().await;

        assert!(matches!(
            res,
            Err(CaptureError::Source(SourceError::OpenFailed(_)))
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_capture_until_source_ends() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("cap.pcap");
        let controller = Controller::new(config(output.clone()));

        let sink = create_file(&output).unwrap();
        let source = Cursor::new(vec![0x10, 0x20, 0x30]);
        let summary = controller
            .capture(source, sink, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.end, SessionEnd::SourceClosed);
        assert_eq!(summary.stats.packets, 1);
        assert_eq!(summary.session_id, controller.session_id());

        let file = std::fs::File::open(&output).unwrap();
        let reader = PcapReader::open(file).unwrap();
        assert_eq!(reader.byte_order(), Endianness::Big);
        let records = reader.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, vec![0x10, 0x20, 0x30]);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "epipe"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reader_gone_before_header_ends_quietly() {
        let controller = Controller::new(config(PathBuf::from("unused.pcap")));
        let source = Cursor::new(vec![0x01, 0x02]);
        let summary = controller
            .capture(source, ClosedPipe, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.end, SessionEnd::ReaderGone);
        assert_eq!(summary.stats, CaptureStats::default());
    }
}
