use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error_handling::types::ConfigError;
use crate::pcap::types::{Endianness, LinkTag};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Whether a parity bit is transmitted with every character.
    pub fn has_bit(&self) -> bool {
        !matches!(self, Parity::None)
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            "mark" => Ok(Parity::Mark),
            "space" => Ok(Parity::Space),
            other => Err(ConfigError::InvalidParity(other.to_string())),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn from_count(n: u8) -> Result<Self, ConfigError> {
        match n {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ConfigError::InvalidStopBits(other)),
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Physical line parameters of the monitored serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl LineSettings {
    /// Bits on the wire per character: start + data + optional parity + stop.
    pub fn bits_per_char(&self) -> u32 {
        let parity = if self.parity.has_bit() { 1 } else { 0 };
        1 + u32::from(self.data_bits) + parity + self.stop_bits.count()
    }
}

/// Fully resolved, validated settings for one capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub port: String,
    pub output: PathBuf,
    pub line: LineSettings,
    /// Explicit silence threshold; `None` derives it from `line`.
    pub silence_override: Option<Duration>,
    pub byte_order: Endianness,
    pub modbus: bool,
    pub verify_crc: bool,
    pub verbose: bool,
    pub pipe: bool,
}

impl CaptureConfig {
    pub fn link_tag(&self) -> LinkTag {
        if self.modbus {
            LinkTag::Tagged
        } else {
            LinkTag::Raw
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_parse() {
        assert_eq!("none".parse::<Parity>().unwrap(), Parity::None);
        assert_eq!("mark".parse::<Parity>().unwrap(), Parity::Mark);
        assert!(matches!(
            "EVEN".parse::<Parity>(),
            Err(ConfigError::InvalidParity(_))
        ));
    }

    #[test]
    fn test_bits_per_char() {
        assert_eq!(LineSettings::default().bits_per_char(), 10);

        let line = LineSettings {
            baud: 9600,
            data_bits: 8,
            parity: Parity::Even,
            stop_bits: StopBits::One,
        };
        assert_eq!(line.bits_per_char(), 11);

        let line = LineSettings {
            baud: 9600,
            data_bits: 7,
            parity: Parity::None,
            stop_bits: StopBits::Two,
        };
        assert_eq!(line.bits_per_char(), 10);
    }

    #[test]
    fn test_stop_bits() {
        assert_eq!(StopBits::from_count(2).unwrap(), StopBits::Two);
        assert!(matches!(
            StopBits::from_count(0),
            Err(ConfigError::InvalidStopBits(0))
        ));
    }
}
