//! Capture container (libpcap classic format).
//!
//! - `types`: header layouts, link tags and timestamp components.
//! - `writer`: global header + one record per call, optional tagged prefix.
//! - `reader`: reads containers back in either byte order.

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::{PcapReader, Record, TaggedRecord};
pub use types::{Endianness, EventType, LinkTag};
pub use writer::PcapWriter;
