use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use super::types::{CaptureConfig, LineSettings, Parity, StopBits};
use crate::error_handling::types::ConfigError;
use crate::pcap::types::Endianness;

/// Command-line surface of the capture tool.
///
/// Line and capture settings can also come from a TOML file given with
/// `--config` (or the `RTUCAP_CONFIG` environment variable). A flag given on
/// the command line always wins over the file, and the file wins over the
/// built-in defaults. The serial port and the output path are command-line
/// only.
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use rtucap::configuration::config::Args;
///
/// let args = Args::try_parse_from(["rtucap", "-o", "bus.pcap", "--modbus", "/dev/ttyUSB0"]).unwrap();
/// let config = args.resolve().unwrap();
/// assert_eq!(config.port, "/dev/ttyUSB0");
/// assert!(config.modbus);
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "rtucap")]
#[command(version)]
#[command(about = "Capture a serial line into a pcap file, splitting packets on line silence")]
pub struct Args {
    /// Serial device to capture from, e.g. /dev/ttyUSB0
    pub port: String,

    /// Output pcap file, or the named pipe to create with `--pipe`
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Baud rate [default: 115200]
    #[arg(long)]
    pub baud: Option<u32>,

    /// Data bits, 5 to 8 [default: 8]
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Parity: none, odd, even, mark or space [default: none]
    #[arg(long)]
    pub parity: Option<String>,

    /// Stop bits, 1 or 2 [default: 1]
    #[arg(long)]
    pub stop_bits: Option<u8>,

    /// Silence threshold in microseconds; 0 derives it from the line settings
    #[arg(long)]
    pub silence_us: Option<f64>,

    /// Write the pcap file in big-endian byte order
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub big_endian: bool,

    /// Split packets into Modbus RTU frames and tag their direction
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub modbus: bool,

    /// Only accept Modbus frames whose CRC-16 checks out
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub verify_crc: bool,

    /// Show a live packet count on stderr and log at debug level
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Create a named pipe at the output path and stream into it (Unix only)
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub pipe: bool,

    /// TOML file with `[line]` and `[capture]` settings
    #[arg(long, env = "RTUCAP_CONFIG")]
    pub config: Option<PathBuf>,
}

/// `[line]` table of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineSection {
    pub baud: Option<u32>,
    pub data_bits: Option<u8>,
    pub parity: Option<String>,
    pub stop_bits: Option<u8>,
}

/// `[capture]` table of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSection {
    pub silence_us: Option<f64>,
    pub big_endian: Option<bool>,
    pub modbus: Option<bool>,
    pub verify_crc: Option<bool>,
}

/// Settings read from a configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub line: LineSection,
    pub capture: CaptureSection,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }
}

impl Args {
    /// Reads the configuration file, if any, and merges it under the flags.
    pub fn resolve(&self) -> Result<CaptureConfig, ConfigError> {
        let file = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        self.merge(&file)
    }

    /// Combines flags and file settings into a validated [`CaptureConfig`].
    pub fn merge(&self, file: &FileConfig) -> Result<CaptureConfig, ConfigError> {
        let defaults = LineSettings::default();

        let baud = self.baud.or(file.line.baud).unwrap_or(defaults.baud);
        if baud == 0 {
            return Err(ConfigError::InvalidBaudRate(baud));
        }

        let data_bits = self.data_bits.or(file.line.data_bits).unwrap_or(defaults.data_bits);
        if !(5..=8).contains(&data_bits) {
            return Err(ConfigError::InvalidDataBits(data_bits));
        }

        let parity = match self.parity.as_deref().or(file.line.parity.as_deref()) {
            Some(s) => s.parse::<Parity>()?,
            None => defaults.parity,
        };

        let stop_bits = match self.stop_bits.or(file.line.stop_bits) {
            Some(n) => StopBits::from_count(n)?,
            None => defaults.stop_bits,
        };

        let silence_us = self.silence_us.or(file.capture.silence_us).unwrap_or(0.0);
        let silence_override = silence_from_micros(silence_us)?;

        let big_endian = self.big_endian || file.capture.big_endian.unwrap_or(false);

        Ok(CaptureConfig {
            port: self.port.clone(),
            output: self.output.clone(),
            line: LineSettings {
                baud,
                data_bits,
                parity,
                stop_bits,
            },
            silence_override,
            byte_order: if big_endian {
                Endianness::Big
            } else {
                Endianness::Little
            },
            modbus: self.modbus || file.capture.modbus.unwrap_or(false),
            verify_crc: self.verify_crc || file.capture.verify_crc.unwrap_or(false),
            verbose: self.verbose,
            pipe: self.pipe,
        })
    }
}

/// Zero means "derive from the line settings".
fn silence_from_micros(us: f64) -> Result<Option<Duration>, ConfigError> {
    if !us.is_finite() || us < 0.0 {
        return Err(ConfigError::InvalidSilence(us));
    }
    if us == 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_nanos((us * 1_000.0).round() as u64)))
}
