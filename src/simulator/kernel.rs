use super::dma::{DmaDirection, DmaOp, DmaPipeline, DmaPort};
use super::error::{ChannelError, SimError};
use super::event::{EventQueue, TimedEvent};
use super::server::socket::protocol::{
  D2H_READCOMP_FIXED, D2H_WRITE_FIXED, FRAME_HEADER_LEN, H2D_READCOMP_FIXED,
};
use super::server::socket::{Channel, InterruptKind, D2H};
use super::utils::report::PollStats;
use super::utils::trace::TraceWriter;
use log::{info, warn};
use serde_json::json;
use std::thread;

/// Timing state owned by the simulator, separate from the device so the two
/// can be borrowed independently.
pub struct Kernel<C: Channel> {
  pub(crate) channel: C,
  pub(crate) events: EventQueue,
  pub(crate) dma: DmaPipeline,
  pub(crate) main_time: u64,
  pub(crate) trace: Option<TraceWriter>,
  pub(crate) stats: PollStats,
}

impl<C: Channel> Kernel<C> {
  pub fn new(channel: C, start_tick: u64, max_pending_dma: usize, trace: Option<TraceWriter>) -> Self {
    Self {
      channel,
      events: EventQueue::new(),
      dma: DmaPipeline::new(max_pending_dma),
      main_time: start_tick,
      trace,
      stats: PollStats::default(),
    }
  }

  pub fn ctx(&mut self) -> PcieCtx<'_> {
    let now = self.main_time;
    PcieCtx {
      now,
      events: &mut self.events,
      dma: &mut self.dma,
      outbox: Outbox {
        channel: &mut self.channel,
        now,
        trace: self.trace.as_mut(),
      },
    }
  }

  pub(crate) fn trace(&mut self, kind: &str, detail: serde_json::Value) {
    if let Some(trace) = self.trace.as_mut() {
      if let Err(e) = trace.record(self.main_time, kind, detail) {
        warn!("trace write failed: {}", e);
      }
    }
  }
}

/// Outbound path: allocates channel messages, retrying while the queue is
/// full.
pub(crate) struct Outbox<'a> {
  channel: &'a mut dyn Channel,
  now: u64,
  trace: Option<&'a mut TraceWriter>,
}

impl Outbox<'_> {
  pub(crate) fn send(&mut self, msg: D2H) -> Result<(), SimError> {
    let mut warned = false;
    loop {
      match self.channel.send(self.now, &msg) {
        Ok(()) => {
          if warned {
            info!("outbound message successfully allocated (t={})", self.now);
          }
          return Ok(());
        },
        Err(ChannelError::Full) => {
          if !warned {
            warn!("outbound queue full, retrying (t={})", self.now);
            warned = true;
          }
          thread::yield_now();
        },
        Err(e) => return Err(e.into()),
      }
    }
  }

  fn trace(&mut self, kind: &str, detail: serde_json::Value) {
    if let Some(trace) = self.trace.as_mut() {
      if let Err(e) = trace.record(self.now, kind, detail) {
        warn!("trace write failed: {}", e);
      }
    }
  }

  fn max_msg_len(&self) -> usize {
    self.channel.max_msg_len()
  }
}

impl DmaPort for Outbox<'_> {
  fn max_payload(&self, dir: DmaDirection) -> usize {
    let fixed = match dir {
      DmaDirection::Write => D2H_WRITE_FIXED,
      DmaDirection::Read => H2D_READCOMP_FIXED,
    };
    self.max_msg_len().saturating_sub(FRAME_HEADER_LEN + fixed)
  }

  fn send_dma(&mut self, req_id: u64, op: &DmaOp) -> Result<(), SimError> {
    self.trace(
      "dma_issue",
      json!({
        "req_id": req_id,
        "tag": op.tag,
        "write": op.direction == DmaDirection::Write,
        "addr": op.address,
        "len": op.len(),
      }),
    );
    let msg = match op.direction {
      DmaDirection::Read => D2H::Read {
        req_id,
        addr: op.address,
        len: op.len() as u32,
      },
      DmaDirection::Write => D2H::Write {
        req_id,
        addr: op.address,
        data: op.buffer.clone(),
      },
    };
    self.send(msg)
  }
}

/// Services available to a device callback at the current simulation time.
pub struct PcieCtx<'a> {
  now: u64,
  events: &'a mut EventQueue,
  dma: &'a mut DmaPipeline,
  outbox: Outbox<'a>,
}

impl PcieCtx<'_> {
  pub fn now(&self) -> u64 {
    self.now
  }

  /// Hand a DMA operation to the pipeline. It goes on the wire now or once
  /// an in-flight slot frees up.
  pub fn issue_dma(&mut self, op: DmaOp) -> Result<(), SimError> {
    self.dma.issue(op, &mut self.outbox)
  }

  pub fn dma_in_flight(&self) -> usize {
    self.dma.in_flight()
  }

  pub fn dma_queued(&self) -> usize {
    self.dma.queued()
  }

  pub fn schedule_event(&mut self, evt: TimedEvent) -> Result<(), SimError> {
    if evt.time < self.now {
      return Err(SimError::EventInPast {
        time: evt.time,
        now: self.now,
      });
    }
    self.events.schedule(evt);
    Ok(())
  }

  pub fn next_event_time(&self) -> Option<u64> {
    self.events.next_deadline()
  }

  pub fn msi_issue(&mut self, vector: u16) -> Result<(), SimError> {
    self.interrupt(InterruptKind::Msi, vector)
  }

  pub fn msix_issue(&mut self, vector: u16) -> Result<(), SimError> {
    self.interrupt(InterruptKind::Msix, vector)
  }

  /// Raise (`true`) or lower the legacy interrupt line.
  pub fn intx_issue(&mut self, level: bool) -> Result<(), SimError> {
    let kind = if level {
      InterruptKind::LegacyHigh
    } else {
      InterruptKind::LegacyLow
    };
    self.interrupt(kind, 0)
  }

  fn interrupt(&mut self, kind: InterruptKind, vector: u16) -> Result<(), SimError> {
    self.outbox.trace("interrupt", json!({ "kind": format!("{:?}", kind), "vector": vector }));
    self.outbox.send(D2H::Interrupt { kind, vector })
  }

  pub(crate) fn complete_dma(&mut self, req_id: u64, data: &[u8]) -> Result<Option<DmaOp>, SimError> {
    let op = self.dma.on_complete(req_id, data, &mut self.outbox)?;
    if let Some(op) = op.as_ref() {
      self.outbox.trace(
        "dma_complete",
        json!({ "req_id": req_id, "tag": op.tag, "len": op.len() }),
      );
    }
    Ok(op)
  }

  /// Largest register read whose completion still fits one message.
  pub(crate) fn read_reply_max(&self) -> usize {
    self
      .outbox
      .max_msg_len()
      .saturating_sub(FRAME_HEADER_LEN + D2H_READCOMP_FIXED)
  }

  pub(crate) fn reply_read(&mut self, req_id: u64, data: Vec<u8>) -> Result<(), SimError> {
    let max = self.read_reply_max();
    if data.len() > max {
      return Err(SimError::DmaTooLarge { len: data.len(), max });
    }
    self.outbox.send(D2H::ReadComp { req_id, data })
  }

  pub(crate) fn reply_write(&mut self, req_id: u64) -> Result<(), SimError> {
    self.outbox.send(D2H::WriteComp { req_id })
  }
}
