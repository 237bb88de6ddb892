//! Modbus RTU frame boundaries and directions.
//!
//! - `classifier`: candidate frame shapes per function code.
//! - `crc`: the validation applied to every candidate.
//! - `splitter`: partitions one buffer into frames.
//! - `reassembler`: carries partial frames across flushes and stamps frames.

pub mod classifier;
pub mod crc;
pub mod reassembler;
pub mod splitter;
pub mod types;

pub use self::crc::FrameCheck;
pub use reassembler::ModbusReassembler;
pub use splitter::ModbusSplitter;
pub use types::{Direction, Frame, FrameCandidate, TimedFrame};
