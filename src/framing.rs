//! Silence-based packet framing of a serial byte stream.

pub mod silence_framer;
pub mod timing;

pub use silence_framer::SilenceFramer;
pub use timing::LineTiming;
