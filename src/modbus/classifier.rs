//! Frame-length classification by function code.
//!
//! The window passed in is assumed to start at a frame boundary:
//! `window[0]` is the slave address and `window[1]` the function code.
//! Some function codes have two possible shapes (a fixed-length request
//! and a variable-length response, or the other way round), so the
//! classifier returns every plausible candidate, preferred one first.

use super::types::{Direction, FrameCandidate};

/// Read coils, discrete inputs, holding registers, input registers.
const READ_FUNCTIONS: std::ops::RangeInclusive<u8> = 0x01..=0x04;
const WRITE_SINGLE_COIL: u8 = 0x05;
const WRITE_SINGLE_REGISTER: u8 = 0x06;
const WRITE_MULTIPLE_COILS: u8 = 0x0F;
const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
const EXCEPTIONS: std::ops::RangeInclusive<u8> = 0x81..=0x90;

const FIXED_FRAME_LEN: usize = 8;
const EXCEPTION_FRAME_LEN: usize = 5;

/// Candidate frame lengths and directions for the bytes at `window`.
///
/// Returns an empty list when fewer than two bytes are available, when the
/// byte-count field of a write-multiple request is not yet available, or
/// when the function code is not one this classifier knows.
pub fn candidates(window: &[u8]) -> Vec<FrameCandidate> {
    if window.len() < 2 {
        return Vec::new();
    }
    let function = window[1];

    match function {
        f if READ_FUNCTIONS.contains(&f) => {
            let mut out = vec![FrameCandidate::new(FIXED_FRAME_LEN, Direction::Request)];
            if let Some(&byte_count) = window.get(2) {
                let response_len = 5 + usize::from(byte_count);
                // a response with the request's length would be a duplicate
                if response_len != FIXED_FRAME_LEN {
                    out.push(FrameCandidate::new(response_len, Direction::Response));
                }
            }
            out
        }
        WRITE_SINGLE_COIL | WRITE_SINGLE_REGISTER => {
            vec![FrameCandidate::new(FIXED_FRAME_LEN, Direction::Unknown)]
        }
        WRITE_MULTIPLE_COILS | WRITE_MULTIPLE_REGISTERS => match window.get(6) {
            Some(&byte_count) => vec![
                FrameCandidate::new(9 + usize::from(byte_count), Direction::Request),
                FrameCandidate::new(FIXED_FRAME_LEN, Direction::Response),
            ],
            None => Vec::new(),
        },
        f if EXCEPTIONS.contains(&f) => {
            vec![FrameCandidate::new(EXCEPTION_FRAME_LEN, Direction::Response)]
        }
        _ => Vec::new(),
    }
}

/// Preferred frame length at `window`, or `None` when it cannot be
/// determined. For the ambiguous read functions this is the request length.
pub fn frame_length(window: &[u8]) -> Option<usize> {
    candidates(window).first().map(|c| c.length)
}
