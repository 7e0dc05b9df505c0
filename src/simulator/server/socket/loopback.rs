use super::channel::{Channel, Inbound, SyncState};
use super::protocol::{D2H, H2D};
use crate::simulator::device::DeviceIntro;
use crate::simulator::error::ChannelError;
use std::collections::VecDeque;

/// In-process channel that plays the host side.
///
/// Tests inject host messages and inspect what the device sent. With a
/// backing memory attached, device DMA is answered automatically.
pub struct LoopbackChannel {
  inbound: VecDeque<Inbound>,
  sent: Vec<(u64, D2H)>,
  sync: SyncState,
  max_msg_len: usize,
  memory: Option<Vec<u8>>,
  intro: Option<DeviceIntro>,
  full_for: usize,
  terminated: bool,
}

impl LoopbackChannel {
  pub fn new(link_latency: u64) -> Self {
    Self {
      inbound: VecDeque::new(),
      sent: Vec::new(),
      sync: SyncState::disabled(link_latency),
      max_msg_len: 4096,
      memory: None,
      intro: None,
      full_for: 0,
      terminated: false,
    }
  }

  pub fn with_sync(mut self, period: u64) -> Self {
    self.sync = SyncState::new(true, period, self.sync.link_latency);
    self
  }

  pub fn with_max_msg_len(mut self, max_msg_len: usize) -> Self {
    self.max_msg_len = max_msg_len;
    self
  }

  /// Answer device DMA from a flat host memory of `size` bytes.
  pub fn with_memory(mut self, size: usize) -> Self {
    self.memory = Some(vec![0; size]);
    self
  }

  pub fn memory(&self) -> Option<&[u8]> {
    self.memory.as_deref()
  }

  pub fn memory_mut(&mut self) -> Option<&mut [u8]> {
    self.memory.as_deref_mut()
  }

  /// Queue a host message visible at `timestamp`. Keep timestamps
  /// non-decreasing.
  pub fn inject(&mut self, timestamp: u64, msg: H2D) {
    self.inbound.push_back(Inbound { timestamp, msg });
  }

  pub fn sent(&self) -> &[(u64, D2H)] {
    &self.sent
  }

  pub fn take_sent(&mut self) -> Vec<(u64, D2H)> {
    std::mem::take(&mut self.sent)
  }

  pub fn intro(&self) -> Option<&DeviceIntro> {
    self.intro.as_ref()
  }

  /// Make the next `n` sends report a full queue.
  pub fn set_full_for(&mut self, n: usize) {
    self.full_for = n;
  }

  pub fn terminate_peer(&mut self) {
    self.terminated = true;
  }

  pub fn pending_inbound(&self) -> usize {
    self.inbound.len()
  }

  fn answer(&mut self, timestamp: u64, msg: &D2H) {
    let Some(memory) = self.memory.as_mut() else {
      return;
    };
    let reply_ts = timestamp.saturating_add(self.sync.link_latency);
    let reply = match msg {
      D2H::Read { req_id, addr, len } => {
        let start = *addr as usize;
        let end = (start + *len as usize).min(memory.len());
        let data = memory.get(start..end).map(<[u8]>::to_vec).unwrap_or_default();
        H2D::ReadComp { req_id: *req_id, data }
      },
      D2H::Write { req_id, addr, data } => {
        let start = *addr as usize;
        let end = (start + data.len()).min(memory.len());
        if start < end {
          memory[start..end].copy_from_slice(&data[..end - start]);
        }
        H2D::WriteComp { req_id: *req_id }
      },
      _ => return,
    };
    self.inbound.push_back(Inbound {
      timestamp: reply_ts,
      msg: reply,
    });
  }
}

impl Channel for LoopbackChannel {
  fn connect(&mut self, intro: &DeviceIntro) -> Result<(), ChannelError> {
    self.intro = Some(intro.clone());
    Ok(())
  }

  fn poll(&mut self, now: u64) -> Result<Option<Inbound>, ChannelError> {
    match self.inbound.front() {
      Some(front) if front.timestamp <= now => {
        let inbound = self.inbound.pop_front();
        if let Some(inbound) = inbound.as_ref() {
          self.sync.on_receive(inbound.timestamp);
          if inbound.msg == H2D::Terminate {
            self.terminated = true;
          }
        }
        Ok(inbound)
      },
      _ => Ok(None),
    }
  }

  fn next_timestamp(&mut self) -> Option<u64> {
    match self.inbound.front() {
      Some(front) => Some(front.timestamp),
      None => self.sync.idle_timestamp(self.terminated),
    }
  }

  fn sync(&mut self, now: u64) -> Result<(), ChannelError> {
    if self.sync.due(now) {
      self.send(now, &D2H::Sync)?;
    }
    Ok(())
  }

  fn next_sync_deadline(&self) -> Option<u64> {
    self.sync.deadline()
  }

  fn send(&mut self, now: u64, msg: &D2H) -> Result<(), ChannelError> {
    if self.terminated {
      return Err(ChannelError::PeerTerminated);
    }
    if self.full_for > 0 {
      self.full_for -= 1;
      return Err(ChannelError::Full);
    }
    let timestamp = self.sync.stamp(now);
    self.sync.on_send(now);
    self.answer(timestamp, msg);
    self.sent.push((timestamp, msg.clone()));
    Ok(())
  }

  fn max_msg_len(&self) -> usize {
    self.max_msg_len
  }

  fn is_terminated(&self) -> bool {
    self.terminated
  }
}
