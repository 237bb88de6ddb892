pub mod recorder;
pub mod serial_source;
pub mod sink;
pub mod types;

pub use recorder::CaptureRecorder;
pub use sink::OutputSink;
pub use types::{ByteChunk, CaptureStats, CaptureSummary, PacketBuffer, SessionEnd};
