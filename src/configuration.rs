pub mod config;
pub mod types;

pub use config::{Args, FileConfig};
pub use types::{CaptureConfig, LineSettings, Parity, StopBits};
