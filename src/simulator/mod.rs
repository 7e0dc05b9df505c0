pub mod config;
pub mod device;
pub mod dma;
pub mod error;
pub mod event;
pub mod kernel;
pub mod server;
pub mod sim;
pub mod simulator;
pub mod utils;

pub use device::{BarConfig, DevCtrlFlags, Device, DeviceIntro};
pub use dma::{DmaDirection, DmaOp, DmaPipeline};
pub use error::{ChannelError, SimError};
pub use event::{EventQueue, TimedEvent};
pub use kernel::PcieCtx;
pub use simulator::Simulator;
pub use utils::log;
