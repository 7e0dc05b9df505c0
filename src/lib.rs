pub mod arch;
pub mod lpn;
pub mod simulator;

pub use simulator::sim::mode::{SimConfig, StepMode};
pub use simulator::utils::log;
