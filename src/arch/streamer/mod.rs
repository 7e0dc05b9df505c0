pub mod func_sim;
pub mod lpn_def;
pub mod regs;
pub mod streamer;

pub use streamer::{Streamer, DEVICE_ID, DMA_BLOCK_SIZE, VENDOR_ID};
