pub mod controller_handler;

pub use controller_handler::{wait_for_shutdown, Controller};
