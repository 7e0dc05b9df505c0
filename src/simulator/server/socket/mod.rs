pub mod channel;
pub mod loopback;
pub mod protocol;
pub mod unix;

pub use channel::{Channel, Inbound, SyncState};
pub use loopback::LoopbackChannel;
pub use protocol::{InterruptKind, D2H, H2D};
pub use unix::UnixChannel;
