use super::protocol::{D2H, H2D};
use crate::simulator::device::DeviceIntro;
use crate::simulator::error::ChannelError;

/// A host message together with the time it becomes visible to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
  pub timestamp: u64,
  pub msg: H2D,
}

/// Transport between the timing kernel and the host simulator.
///
/// Inbound messages are only delivered once simulation time has reached
/// their timestamp. Outbound messages are stamped `now + link latency`.
pub trait Channel {
  /// Announce the device and wait for the host to introduce itself.
  fn connect(&mut self, intro: &DeviceIntro) -> Result<(), ChannelError>;

  /// Next inbound message with `timestamp <= now`, if any.
  fn poll(&mut self, now: u64) -> Result<Option<Inbound>, ChannelError>;

  /// Timestamp of the next inbound message. When synchronization is on and
  /// nothing is buffered this is the last time the peer vouched for, which
  /// keeps the kernel from running ahead of the host.
  fn next_timestamp(&mut self) -> Option<u64>;

  /// Send a sync pulse if one is due. `Err(Full)` means retry.
  fn sync(&mut self, now: u64) -> Result<(), ChannelError>;

  fn next_sync_deadline(&self) -> Option<u64>;

  fn send(&mut self, now: u64, msg: &D2H) -> Result<(), ChannelError>;

  /// Largest frame, header included, the transport accepts.
  fn max_msg_len(&self) -> usize;

  fn is_terminated(&self) -> bool;
}

/// Outbound sync bookkeeping shared by the transports.
#[derive(Debug, Clone, Copy)]
pub struct SyncState {
  pub enabled: bool,
  pub period: u64,
  pub link_latency: u64,
  next_sync: u64,
  last_rx: u64,
}

impl SyncState {
  pub fn new(enabled: bool, period: u64, link_latency: u64) -> Self {
    Self {
      enabled,
      period,
      link_latency,
      next_sync: 0,
      last_rx: 0,
    }
  }

  pub fn disabled(link_latency: u64) -> Self {
    Self::new(false, u64::MAX, link_latency)
  }

  pub fn due(&self, now: u64) -> bool {
    self.enabled && now >= self.next_sync
  }

  /// Record an outbound message sent at `now`.
  pub fn on_send(&mut self, now: u64) {
    self.next_sync = now.saturating_add(self.period);
  }

  pub fn on_receive(&mut self, timestamp: u64) {
    self.last_rx = self.last_rx.max(timestamp);
  }

  pub fn stamp(&self, now: u64) -> u64 {
    now.saturating_add(self.link_latency)
  }

  pub fn deadline(&self) -> Option<u64> {
    self.enabled.then_some(self.next_sync)
  }

  /// Fallback for `next_timestamp` when the inbound queue is empty.
  pub fn idle_timestamp(&self, terminated: bool) -> Option<u64> {
    (self.enabled && !terminated).then_some(self.last_rx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sync_due_after_period() {
    let mut sync = SyncState::new(true, 500, 100);
    assert!(sync.due(0));
    sync.on_send(0);
    assert!(!sync.due(499));
    assert!(sync.due(500));
    assert_eq!(sync.deadline(), Some(500));
    assert_eq!(sync.stamp(10), 110);
  }

  #[test]
  fn test_disabled_sync_never_due() {
    let sync = SyncState::disabled(0);
    assert!(!sync.due(u64::MAX));
    assert_eq!(sync.deadline(), None);
    assert_eq!(sync.idle_timestamp(false), None);
  }
}
