pub mod streamer;

use crate::simulator::config::KNOWN_DEVICES;
use std::io;

pub use streamer::Streamer;

/// Device model selected by name.
pub fn create_device(name: &str) -> io::Result<Streamer> {
  match name.to_lowercase().as_str() {
    "streamer" => Ok(Streamer::new()),
    _ => Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      format!("Unknown device: {} (known: {})", name, KNOWN_DEVICES.join(", ")),
    )),
  }
}
