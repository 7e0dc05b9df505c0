use super::func_sim::{self, Job, TAG_IN, TAG_OUT};
use super::lpn_def::{build_net, Block, StreamerNet};
use super::regs::*;
use crate::lpn::handshake::{self, AuxHandle, AuxState, SharedRequestMap};
use crate::lpn::RequestMap;
use crate::simulator::utils::report::print_transition_counts;
use crate::simulator::{
  BarConfig, DevCtrlFlags, Device, DeviceIntro, DmaDirection, DmaOp, PcieCtx, SimError, TimedEvent,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const VENDOR_ID: u16 = 0xdead;
pub const DEVICE_ID: u16 = 0xbeef;
/// Largest single DMA read issued for input blocks.
pub const DMA_BLOCK_SIZE: usize = 2048;

struct ActiveJob {
  job: Job,
  start: u64,
  blocks_written: usize,
  // Transformed output keyed by destination address.
  results: HashMap<u64, Vec<u8>>,
}

/// Reference accelerator: streams `len` bytes from `src`, XORs them with
/// `key` and writes them to `dst`, then raises an interrupt.
pub struct Streamer {
  regs: RegFile,
  devctrl: DevCtrlFlags,
  map: SharedRequestMap,
  aux: Option<AuxHandle<usize>>,
  timing: StreamerNet,
  job: Option<ActiveJob>,
  intx_asserted: bool,
  jobs_done: u64,
}

impl Default for Streamer {
  fn default() -> Self {
    Self::new()
  }
}

impl Streamer {
  pub fn new() -> Self {
    Self {
      regs: RegFile::default(),
      devctrl: DevCtrlFlags::empty(),
      map: Arc::new(Mutex::new(RequestMap::new())),
      aux: None,
      timing: build_net(),
      job: None,
      intx_asserted: false,
      jobs_done: 0,
    }
  }

  pub fn regs(&self) -> &RegFile {
    &self.regs
  }

  pub fn jobs_done(&self) -> u64 {
    self.jobs_done
  }

  pub fn is_busy(&self) -> bool {
    self.regs.status & STATUS_BUSY != 0
  }

  fn start(&mut self, ctx: &mut PcieCtx<'_>) -> Result<(), SimError> {
    if self.is_busy() {
      warn!("streamer: start ignored, job still running");
      return Ok(());
    }
    self.join_aux();

    let job = Job {
      src: self.regs.src,
      dst: self.regs.dst,
      len: self.regs.len as usize,
      key: self.regs.key as u8,
    };
    info!(
      "streamer: job src={:#x} dst={:#x} len={} at t={}",
      job.src,
      job.dst,
      job.len,
      ctx.now()
    );
    self.regs.status = STATUS_BUSY;
    self.job = Some(ActiveJob {
      job,
      start: ctx.now(),
      blocks_written: 0,
      results: HashMap::new(),
    });
    if job.len == 0 {
      return self.complete(ctx);
    }

    {
      let mut map = self.map.lock().unwrap();
      map.reset();
      map.setup(&[TAG_IN, TAG_OUT]);
    }
    self.timing.net.reset();
    self.aux = Some(handshake::spawn("streamer-func", Arc::clone(&self.map), move |port| {
      func_sim::run(port, job)
    })?);
    self.resume_aux(ctx)
  }

  fn reset(&mut self) {
    self.join_aux();
    self.map.lock().unwrap().reset();
    self.timing.net.reset();
    self.job = None;
    self.regs = RegFile::default();
  }

  fn join_aux(&mut self) {
    if let Some(mut aux) = self.aux.take() {
      match aux.join() {
        Some(Ok(bytes)) => debug!("streamer: functional model processed {} bytes", bytes),
        Some(Err(e)) => debug!("streamer: functional model stopped: {}", e),
        None => {},
      }
    }
  }

  /// Run the functional model until it blocks, then issue the DMA it is
  /// waiting on and feed its finished blocks into the timing net.
  fn resume_aux(&mut self, ctx: &mut PcieCtx<'_>) -> Result<(), SimError> {
    let Some(aux) = self.aux.as_mut() else {
      return Ok(());
    };
    let state = aux.resume()?;
    let (chunks, writes) = {
      let mut map = aux.map();
      (map.pending_dma(DMA_BLOCK_SIZE), map.take_writes())
    };
    if state == AuxState::Finished {
      debug!("streamer: functional model finished at t={}", ctx.now());
    }

    for chunk in chunks {
      ctx.issue_dma(DmaOp::read(chunk.tag, chunk.address, chunk.len))?;
    }

    if writes.is_empty() {
      return Ok(());
    }
    let now = ctx.now();
    self.timing.net.update_clock(now);
    if let Some(active) = self.job.as_mut() {
      for w in writes {
        let block = Block::Chunk {
          address: w.address,
          len: w.data.len(),
        };
        active.results.insert(w.address, w.data);
        self.timing.net.push_token(self.timing.fetched, now, block);
      }
    }
    self.drive(ctx)
  }

  /// Fire everything matured now, write back retired blocks and schedule the
  /// next commit.
  fn drive(&mut self, ctx: &mut PcieCtx<'_>) -> Result<(), SimError> {
    let now = ctx.now();
    self.timing.net.update_clock(now);
    self.timing.net.commit_at(now);
    // Transitions that just fired re-enable no earlier than now.
    self.timing.net.update_clock(now);

    while let Some(token) = self.timing.net.place_mut(self.timing.retired).pop() {
      let Block::Chunk { address, .. } = token.payload else {
        continue;
      };
      let data = self
        .job
        .as_mut()
        .and_then(|active| active.results.remove(&address))
        .ok_or_else(|| SimError::Device(format!("no result for block at {:#x}", address)))?;
      ctx.issue_dma(DmaOp::write(TAG_OUT, address, data))?;
    }

    if let Some(next) = self.timing.net.next_commit_time() {
      if next < now {
        return Err(SimError::Device(format!("net commit at {} before now {}", next, now)));
      }
      if ctx.next_event_time().map_or(true, |t| t > next) {
        ctx.schedule_event(TimedEvent::new(next, 0))?;
      }
    }
    Ok(())
  }

  fn complete(&mut self, ctx: &mut PcieCtx<'_>) -> Result<(), SimError> {
    let start = self.job.take().map_or(ctx.now(), |active| active.start);
    self.regs.status = STATUS_DONE;
    self.regs.elapsed = ctx.now() - start;
    self.jobs_done += 1;
    info!("streamer: job done at t={} ({} ps)", ctx.now(), self.regs.elapsed);
    self.join_aux();

    if self.devctrl.contains(DevCtrlFlags::MSIX_EN) {
      ctx.msix_issue(0)
    } else if self.devctrl.contains(DevCtrlFlags::MSI_EN) {
      ctx.msi_issue(0)
    } else if self.devctrl.contains(DevCtrlFlags::INTX_EN) {
      self.intx_asserted = true;
      ctx.intx_issue(true)
    } else {
      Ok(())
    }
  }

  fn check_access(bar: u8, offset: u64, len: usize) -> Option<(u64, u32)> {
    if bar != 0 {
      error!("streamer: access to unmapped BAR {}", bar);
      return None;
    }
    let access = split_access(offset, len);
    if access.is_none() {
      error!("streamer: bad register access offset={:#x} len={}", offset, len);
    }
    access
  }
}

impl Device for Streamer {
  fn setup_intro(&mut self) -> DeviceIntro {
    let mut intro = DeviceIntro {
      vendor_id: VENDOR_ID,
      device_id: DEVICE_ID,
      class: 0x12,
      subclass: 0x00,
      revision: 1,
      msi_nvecs_log2: 0,
      msix_nvecs: 1,
      ..Default::default()
    };
    intro.bars[0] = BarConfig {
      len: BAR0_LEN,
      is_io: false,
      is_64bit: true,
      prefetchable: false,
    };
    intro
  }

  fn reg_read(&mut self, _ctx: &mut PcieCtx<'_>, bar: u8, offset: u64, dest: &mut [u8]) -> Result<(), SimError> {
    dest.fill(0);
    let Some((reg, shift)) = Self::check_access(bar, offset, dest.len()) else {
      return Ok(());
    };
    let value = (self.regs.read(reg) >> shift).to_le_bytes();
    let n = dest.len();
    dest.copy_from_slice(&value[..n]);
    Ok(())
  }

  fn reg_write(&mut self, ctx: &mut PcieCtx<'_>, bar: u8, offset: u64, src: &[u8]) -> Result<(), SimError> {
    let Some((reg, shift)) = Self::check_access(bar, offset, src.len()) else {
      return Ok(());
    };
    let mut raw = [0u8; 8];
    raw[..src.len()].copy_from_slice(src);
    let written = u64::from_le_bytes(raw) << shift;

    match reg {
      REG_CTRL => {
        if written & CTRL_RESET != 0 {
          self.reset();
        }
        if written & CTRL_START != 0 {
          self.start(ctx)?;
        }
      },
      REG_STATUS => {
        self.regs.write(REG_STATUS, written);
        if self.intx_asserted && self.regs.status & STATUS_DONE == 0 {
          self.intx_asserted = false;
          ctx.intx_issue(false)?;
        }
      },
      _ => {
        let mask = if src.len() == 8 {
          u64::MAX
        } else {
          ((1u64 << (src.len() * 8)) - 1) << shift
        };
        let merged = (self.regs.read(reg) & !mask) | written;
        self.regs.write(reg, merged);
      },
    }
    Ok(())
  }

  fn dma_complete(&mut self, ctx: &mut PcieCtx<'_>, op: DmaOp) -> Result<(), SimError> {
    match op.direction {
      DmaDirection::Read => {
        if !self.map.lock().unwrap().fill(op.tag, op.address, &op.buffer) {
          warn!("streamer: read completion at {:#x} matches no request", op.address);
          return Ok(());
        }
        self.resume_aux(ctx)
      },
      DmaDirection::Write => {
        let Some(active) = self.job.as_mut() else {
          warn!("streamer: write completion without a job");
          return Ok(());
        };
        active.blocks_written += 1;
        if active.blocks_written == active.job.block_count() {
          self.complete(ctx)?;
        }
        Ok(())
      },
    }
  }

  fn execute_event(&mut self, ctx: &mut PcieCtx<'_>, _evt: TimedEvent) -> Result<(), SimError> {
    self.drive(ctx)
  }

  fn devctrl_update(&mut self, _ctx: &mut PcieCtx<'_>, flags: DevCtrlFlags) -> Result<(), SimError> {
    debug!("streamer: devctrl {:?}", flags);
    self.devctrl = flags;
    Ok(())
  }

  fn shutdown(&mut self) {
    self.join_aux();
    print_transition_counts(self.timing.net.name(), &self.timing.net.fire_counts());
  }
}
