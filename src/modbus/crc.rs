//! Frame validation seam.
//!
//! The splitter asks [`FrameCheck::accepts`] about every candidate frame
//! and nothing else. The default check accepts everything: frame
//! boundaries come from function-code shapes alone. `Crc16` verifies the
//! trailing CRC-16/MODBUS instead.

use ::crc::{Crc, CRC_16_MODBUS};

/// Which validation the splitter applies to candidate frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameCheck {
    /// Stub validation: every candidate passes.
    #[default]
    AcceptAll,
    /// CRC-16/MODBUS over all but the last two bytes, transmitted low byte first.
    Crc16,
}

impl FrameCheck {
    pub fn accepts(&self, frame: &[u8]) -> bool {
        match self {
            FrameCheck::AcceptAll => true,
            FrameCheck::Crc16 => valid_crc(frame),
        }
    }
}

/// CRC-16/MODBUS: reflected polynomial 0xA001, initial value 0xFFFF.
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub fn crc16_modbus(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Checks the trailing CRC of a complete RTU frame.
pub fn valid_crc(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    crc16_modbus(body) == u16::from_le_bytes([trailer[0], trailer[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_vector() {
        // read 10 holding registers from slave 1
        let body = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16_modbus(&body), 0xCDC5);
        assert!(valid_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]));
    }

    #[test]
    fn test_captured_frames_carry_valid_crc() {
        assert!(valid_crc(&[0x02, 0x03, 0x00, 0xB1, 0x00, 0x01, 0xD4, 0x1E]));
        assert!(valid_crc(&[0x02, 0x03, 0x02, 0x02, 0xBC, 0xFC, 0x95]));
    }

    #[test]
    fn test_crc_rejects_corruption() {
        let mut frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];
        frame[3] = 0xFF;
        assert!(!valid_crc(&frame));
        assert!(!FrameCheck::Crc16.accepts(&frame));
        assert!(FrameCheck::AcceptAll.accepts(&frame));
    }

    #[test]
    fn test_crc_needs_a_body() {
        assert!(!valid_crc(&[0xFF, 0xFF]));
        assert!(FrameCheck::default().accepts(&[]));
    }
}
