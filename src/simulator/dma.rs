use super::error::SimError;
use log::{debug, warn};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaDirection {
  Read,
  Write,
}

/// One host-memory transfer requested by the device.
///
/// For reads `buffer` is the destination and its length is the request
/// length. For writes it holds the bytes to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaOp {
  pub tag: u32,
  pub direction: DmaDirection,
  pub address: u64,
  pub buffer: Vec<u8>,
}

impl DmaOp {
  pub fn read(tag: u32, address: u64, len: usize) -> Self {
    Self {
      tag,
      direction: DmaDirection::Read,
      address,
      buffer: vec![0; len],
    }
  }

  pub fn write(tag: u32, address: u64, data: Vec<u8>) -> Self {
    Self {
      tag,
      direction: DmaDirection::Write,
      address,
      buffer: data,
    }
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }
}

/// Generation-checked slot index, used as the request id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaHandle {
  index: u32,
  generation: u32,
}

impl DmaHandle {
  pub fn to_req_id(self) -> u64 {
    ((self.generation as u64) << 32) | self.index as u64
  }

  pub fn from_req_id(req_id: u64) -> Self {
    Self {
      index: req_id as u32,
      generation: (req_id >> 32) as u32,
    }
  }
}

/// Outbound side of the pipeline: whatever can put a DMA request on the wire.
pub trait DmaPort {
  /// Largest payload that fits one message in direction `dir`.
  fn max_payload(&self, dir: DmaDirection) -> usize;
  fn send_dma(&mut self, req_id: u64, op: &DmaOp) -> Result<(), SimError>;
}

#[derive(Debug, Default)]
struct Slot {
  generation: u32,
  op: Option<DmaOp>,
}

/// Bounded-concurrency DMA issue queue.
///
/// At most `max_pending` operations are on the wire. The rest wait in FIFO
/// order and are dispatched one per completion.
#[derive(Debug)]
pub struct DmaPipeline {
  max_pending: usize,
  slots: Vec<Slot>,
  free: Vec<u32>,
  in_flight: usize,
  queue: VecDeque<DmaOp>,
  issued: u64,
  completed: u64,
}

impl DmaPipeline {
  pub fn new(max_pending: usize) -> Self {
    Self {
      max_pending,
      slots: Vec::with_capacity(max_pending),
      free: Vec::new(),
      in_flight: 0,
      queue: VecDeque::new(),
      issued: 0,
      completed: 0,
    }
  }

  pub fn issue(&mut self, op: DmaOp, port: &mut dyn DmaPort) -> Result<(), SimError> {
    if self.in_flight < self.max_pending {
      self.dispatch(op, port)
    } else {
      debug!(
        "dma queued: tag={} addr={:#x} len={} (queue depth {})",
        op.tag,
        op.address,
        op.len(),
        self.queue.len() + 1
      );
      self.queue.push_back(op);
      Ok(())
    }
  }

  /// Retire the operation behind `req_id` and refill the pipeline from the
  /// queue. Read data is copied into the op's buffer.
  ///
  /// Returns `None` for stale or unknown ids, which are logged and ignored.
  pub fn on_complete(
    &mut self,
    req_id: u64,
    data: &[u8],
    port: &mut dyn DmaPort,
  ) -> Result<Option<DmaOp>, SimError> {
    let Some(mut op) = self.take(DmaHandle::from_req_id(req_id)) else {
      warn!("dma completion for unknown request {:#x}, ignored", req_id);
      return Ok(None);
    };
    self.in_flight -= 1;
    self.completed += 1;

    if op.direction == DmaDirection::Read {
      if data.len() > op.buffer.len() {
        return Err(SimError::CompletionTooLarge {
          got: data.len(),
          expected: op.buffer.len(),
        });
      }
      op.buffer[..data.len()].copy_from_slice(data);
    }

    if let Some(next) = self.queue.pop_front() {
      self.dispatch(next, port)?;
    }
    Ok(Some(op))
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  pub fn queued(&self) -> usize {
    self.queue.len()
  }

  pub fn max_pending(&self) -> usize {
    self.max_pending
  }

  pub fn is_idle(&self) -> bool {
    self.in_flight == 0 && self.queue.is_empty()
  }

  /// Total (issued to wire, completed) counts.
  pub fn totals(&self) -> (u64, u64) {
    (self.issued, self.completed)
  }

  fn dispatch(&mut self, op: DmaOp, port: &mut dyn DmaPort) -> Result<(), SimError> {
    let max = port.max_payload(op.direction);
    if op.len() > max {
      return Err(SimError::DmaTooLarge { len: op.len(), max });
    }

    let handle = self.insert(op);
    self.in_flight += 1;
    self.issued += 1;
    let slot = &self.slots[handle.index as usize];
    match slot.op.as_ref() {
      Some(op) => port.send_dma(handle.to_req_id(), op),
      None => Ok(()),
    }
  }

  fn insert(&mut self, op: DmaOp) -> DmaHandle {
    let index = match self.free.pop() {
      Some(index) => index,
      None => {
        self.slots.push(Slot::default());
        (self.slots.len() - 1) as u32
      },
    };
    let slot = &mut self.slots[index as usize];
    slot.op = Some(op);
    DmaHandle {
      index,
      generation: slot.generation,
    }
  }

  fn take(&mut self, handle: DmaHandle) -> Option<DmaOp> {
    let slot = self.slots.get_mut(handle.index as usize)?;
    if slot.generation != handle.generation {
      return None;
    }
    let op = slot.op.take()?;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(handle.index);
    Some(op)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Default)]
  struct RecordingPort {
    sent: Vec<(u64, u32)>,
    max: usize,
  }

  impl DmaPort for RecordingPort {
    fn max_payload(&self, _dir: DmaDirection) -> usize {
      self.max
    }

    fn send_dma(&mut self, req_id: u64, op: &DmaOp) -> Result<(), SimError> {
      self.sent.push((req_id, op.tag));
      Ok(())
    }
  }

  fn port() -> RecordingPort {
    RecordingPort {
      sent: Vec::new(),
      max: 4096,
    }
  }

  #[test]
  fn test_bound_and_fifo_refill() {
    let mut port = port();
    let mut dma = DmaPipeline::new(2);
    for tag in 1..=3 {
      dma.issue(DmaOp::read(tag, 0x1000 * tag as u64, 64), &mut port).unwrap();
    }
    assert_eq!(dma.in_flight(), 2);
    assert_eq!(dma.queued(), 1);
    assert_eq!(port.sent.iter().map(|s| s.1).collect::<Vec<_>>(), vec![1, 2]);

    let first = port.sent[0].0;
    let done = dma.on_complete(first, &[0xab; 64], &mut port).unwrap().unwrap();
    assert_eq!(done.tag, 1);
    assert!(done.buffer.iter().all(|b| *b == 0xab));
    assert_eq!(dma.in_flight(), 2);
    assert_eq!(dma.queued(), 0);
    assert_eq!(port.sent[2].1, 3);
  }

  #[test]
  fn test_stale_handle_ignored() {
    let mut port = port();
    let mut dma = DmaPipeline::new(4);
    dma.issue(DmaOp::write(9, 0x40, vec![1, 2, 3]), &mut port).unwrap();
    let req_id = port.sent[0].0;
    assert!(dma.on_complete(req_id, &[], &mut port).unwrap().is_some());
    // Slot reused with a bumped generation; the old id no longer resolves.
    dma.issue(DmaOp::write(10, 0x80, vec![4]), &mut port).unwrap();
    assert!(dma.on_complete(req_id, &[], &mut port).unwrap().is_none());
    assert_eq!(dma.in_flight(), 1);
    assert!(dma.on_complete(0xdead_0000_0007, &[], &mut port).unwrap().is_none());
  }

  #[test]
  fn test_oversize_payload_is_fatal() {
    let mut port = RecordingPort { sent: Vec::new(), max: 16 };
    let mut dma = DmaPipeline::new(1);
    let err = dma.issue(DmaOp::write(1, 0, vec![0; 17]), &mut port).unwrap_err();
    assert!(matches!(err, SimError::DmaTooLarge { len: 17, max: 16 }));
    assert!(dma.is_idle());
  }

  #[test]
  fn test_oversize_completion_is_fatal() {
    let mut port = port();
    let mut dma = DmaPipeline::new(1);
    dma.issue(DmaOp::read(1, 0, 4), &mut port).unwrap();
    let req_id = port.sent[0].0;
    let err = dma.on_complete(req_id, &[0; 8], &mut port).unwrap_err();
    assert!(matches!(err, SimError::CompletionTooLarge { got: 8, expected: 4 }));
  }
}
