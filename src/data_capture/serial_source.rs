//! The serial line as a source of timestamped byte chunks.
//!
//! Reads are blocking and run on tokio's blocking pool. Each non-empty read
//! is copied out of the reused read buffer and forwarded over a bounded
//! channel; when the channel is full the reader waits, which stalls the next
//! physical read.

use std::io::{self, Read};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, trace};
use serialport::SerialPort;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::types::ByteChunk;
use crate::configuration::types::{LineSettings, Parity, StopBits};
use crate::error_handling::types::SourceError;

/// Chunks queued between the reader and the capture loop.
pub const CHUNK_QUEUE_CAPACITY: usize = 64;

const READ_BUFFER_LEN: usize = 4096;

/// How long a blocking read waits before it returns empty-handed. Only
/// bounds how quickly the reader notices the capture loop has gone.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Parity as programmed through the serial backend. Where the kernel has
/// stick parity, mark and space go in as odd and even and are switched to
/// stick parity once the port is open.
fn to_serialport_parity(p: Parity) -> Result<serialport::Parity, SourceError> {
    match p {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Parity::Mark => Ok(serialport::Parity::Odd),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Parity::Space => Ok(serialport::Parity::Even),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Parity::Mark | Parity::Space => Err(SourceError::UnsupportedParity(p)),
    }
}

/// Control flags for stick parity (CMSPAR): the parity bit is always 1 for
/// mark (PARODD set) and always 0 for space.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn stick_parity_flags(
    mut flags: nix::sys::termios::ControlFlags,
    parity: Parity,
) -> nix::sys::termios::ControlFlags {
    use nix::sys::termios::ControlFlags;

    flags.insert(ControlFlags::PARENB | ControlFlags::CMSPAR);
    flags.set(ControlFlags::PARODD, parity == Parity::Mark);
    flags
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_stick_parity<Fd: std::os::fd::AsFd>(fd: Fd, parity: Parity) -> nix::Result<()> {
    use nix::sys::termios::{tcgetattr, tcsetattr, SetArg};

    let fd = fd.as_fd();
    let mut attrs = tcgetattr(fd)?;
    attrs.control_flags = stick_parity_flags(attrs.control_flags, parity);
    tcsetattr(fd, SetArg::TCSANOW, &attrs)
}

fn to_serialport_data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn to_serialport_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn port_builder(port: &str, line: &LineSettings) -> Result<serialport::SerialPortBuilder, SourceError> {
    Ok(serialport::new(port, line.baud)
        .data_bits(to_serialport_data_bits(line.data_bits))
        .stop_bits(to_serialport_stop_bits(line.stop_bits))
        .parity(to_serialport_parity(line.parity)?)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT))
}

/// Opens and configures the serial device at `port`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn open_serial(port: &str, line: &LineSettings) -> Result<Box<dyn SerialPort>, SourceError> {
    use std::os::fd::{AsRawFd, BorrowedFd};

    let tty = port_builder(port, line)?
        .open_native()
        .map_err(|e| SourceError::OpenFailed(format!("{}: {}", port, e)))?;

    if matches!(line.parity, Parity::Mark | Parity::Space) {
        // SAFETY: the descriptor belongs to `tty`, which outlives the borrow
        let fd = unsafe { BorrowedFd::borrow_raw(tty.as_raw_fd()) };
        set_stick_parity(fd, line.parity).map_err(|e| {
            SourceError::OpenFailed(format!("{}: set {} parity: {}", port, line.parity, e))
        })?;
        debug!("{}: stick parity {} enabled", port, line.parity);
    }
    Ok(Box::new(tty))
}

/// Opens and configures the serial device at `port`.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn open_serial(port: &str, line: &LineSettings) -> Result<Box<dyn SerialPort>, SourceError> {
    port_builder(port, line)?
        .open()
        .map_err(|e| SourceError::OpenFailed(format!("{}: {}", port, e)))
}

/// Starts the blocking read loop over `source`.
///
/// Returns the chunk stream, a one-shot carrying the read error that ended
/// the loop (if one did), and the handle of the blocking task. The loop
/// ends on end of stream, on the first hard read error, or once the chunk
/// receiver has been dropped.
pub fn spawn_reader<S>(
    mut source: S,
    session_id: Uuid,
) -> (
    mpsc::Receiver<ByteChunk>,
    oneshot::Receiver<SourceError>,
    JoinHandle<()>,
)
where
    S: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
    let (err_tx, err_rx) = oneshot::channel();

    let handle = tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_BUFFER_LEN];
        loop {
            if tx.is_closed() {
                debug!("[{}] capture loop gone, reader exiting", session_id);
                return;
            }
            match source.read(&mut buf) {
                Ok(0) => {
                    debug!("[{}] serial source reached end of stream", session_id);
                    return;
                }
                Ok(n) => {
                    let chunk = ByteChunk::new(buf[..n].to_vec(), Utc::now());
                    trace!("[{}] read {} bytes", session_id, n);
                    if tx.blocking_send(chunk).is_err() {
                        return;
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    error!("[{}] serial read failed: {}", session_id, e);
                    let _ = err_tx.send(SourceError::ReadFailed(e));
                    return;
                }
            }
        }
    });

    (rx, err_rx, handle)
}
