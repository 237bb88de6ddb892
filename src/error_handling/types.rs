use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::configuration::types::Parity;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidParity(String),
    InvalidStopBits(u8),
    InvalidDataBits(u8),
    InvalidBaudRate(u32),
    InvalidSilence(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidParity(p) => {
                write!(f, "invalid parity {:?}: use none, odd, even, mark, or space", p)
            }
            ConfigError::InvalidStopBits(n) => write!(f, "invalid stop bits {}: use 1 or 2", n),
            ConfigError::InvalidDataBits(n) => write!(f, "invalid data bits {}: use 5 to 8", n),
            ConfigError::InvalidBaudRate(b) => write!(f, "invalid baud rate {}", b),
            ConfigError::InvalidSilence(s) => {
                write!(f, "invalid silence threshold {} us: must be zero or positive", s)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum SourceError {
    OpenFailed(String),
    UnsupportedParity(Parity),
    ReadFailed(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::OpenFailed(e) => write!(f, "open serial port: {}", e),
            SourceError::UnsupportedParity(p) => {
                write!(f, "parity {} is not supported by the serial backend", p)
            }
            SourceError::ReadFailed(e) => write!(f, "serial read error: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

#[derive(Debug)]
pub enum SinkError {
    CreateFailed(io::Error),
    PipeCreateFailed(io::Error),
    NotAPipe(PathBuf),
    PipeUnsupported,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::CreateFailed(e) => write!(f, "create output file: {}", e),
            SinkError::PipeCreateFailed(e) => write!(f, "create pipe: {}", e),
            SinkError::NotAPipe(p) => write!(f, "{} exists and is not a named pipe", p.display()),
            SinkError::PipeUnsupported => {
                write!(f, "named pipes are not supported on this platform")
            }
        }
    }
}

impl std::error::Error for SinkError {}

/// Failure of a single container write.
///
/// `ReaderGone` is the broken-pipe case: the consumer on the other end of
/// the destination went away and no further record can be delivered.
#[derive(Debug)]
pub enum WriteError {
    ReaderGone,
    Io(io::Error),
}

impl WriteError {
    pub fn is_reader_gone(&self) -> bool {
        matches!(self, WriteError::ReaderGone)
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::ReaderGone => write!(f, "destination closed by reader"),
            WriteError::Io(e) => write!(f, "write packet: {}", e),
        }
    }
}

impl std::error::Error for WriteError {}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::BrokenPipe {
            WriteError::ReaderGone
        } else {
            WriteError::Io(err)
        }
    }
}

#[derive(Debug)]
pub enum CaptureError {
    Config(ConfigError),
    Source(SourceError),
    Sink(SinkError),
    Write(WriteError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Config(e) => write!(f, "Configuration error: {}", e),
            CaptureError::Source(e) => write!(f, "Source error: {}", e),
            CaptureError::Sink(e) => write!(f, "Destination error: {}", e),
            CaptureError::Write(e) => write!(f, "Container error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<ConfigError> for CaptureError {
    fn from(err: ConfigError) -> Self {
        CaptureError::Config(err)
    }
}

impl From<SourceError> for CaptureError {
    fn from(err: SourceError) -> Self {
        CaptureError::Source(err)
    }
}

impl From<SinkError> for CaptureError {
    fn from(err: SinkError) -> Self {
        CaptureError::Sink(err)
    }
}

impl From<WriteError> for CaptureError {
    fn from(err: WriteError) -> Self {
        CaptureError::Write(err)
    }
}
