use super::device::{DevCtrlFlags, Device};
use super::dma::DmaPipeline;
use super::error::{ChannelError, SimError};
use super::kernel::Kernel;
use super::server::socket::{Channel, H2D};
use super::sim::mode::{SimConfig, StepMode};
use super::sim::shell::{Command, Shell};
use super::utils::log::set_quiet;
use super::utils::report::{print_exit_report, print_window_report, PollStats};
use super::utils::signal::ReportRequests;
use super::utils::trace::TraceWriter;
use log::{debug, error, info, warn};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Time-stepped main loop driving one device model over one channel.
pub struct Simulator<D: Device, C: Channel> {
  config: SimConfig,
  kernel: Kernel<C>,
  device: D,
  exiting: Arc<AtomicBool>,
  requests: ReportRequests,
  // Stats at the last statistics request.
  window_base: Option<PollStats>,
}

impl<D: Device, C: Channel> Simulator<D, C> {
  /// Introduce the device to the host and set up the kernel state.
  pub fn new(config: SimConfig, mut channel: C, mut device: D) -> Result<Self, SimError> {
    let intro = device.setup_intro();
    channel.connect(&intro)?;

    let trace = match config.trace_file.as_deref() {
      Some(path) => Some(TraceWriter::create(Path::new(path))?),
      None => None,
    };
    let kernel = Kernel::new(channel, config.start_tick, config.max_pending_dma, trace);

    Ok(Self {
      config,
      kernel,
      device,
      exiting: Arc::new(AtomicBool::new(false)),
      requests: ReportRequests::default(),
      window_base: None,
    })
  }

  /// Shared flag; storing `true` stops the loop after the current step.
  pub fn exit_flag(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.exiting)
  }

  /// Shared time and statistics request flags, served between steps.
  pub fn report_requests(&self) -> ReportRequests {
    self.requests.clone()
  }

  /// Counters since the last statistics request, if one was made.
  pub fn window_stats(&self) -> Option<PollStats> {
    self.window_base.map(|base| self.kernel.stats.since(&base))
  }

  pub fn is_exiting(&self) -> bool {
    self.exiting.load(Ordering::Relaxed)
  }

  pub fn main_time(&self) -> u64 {
    self.kernel.main_time
  }

  pub fn device(&self) -> &D {
    &self.device
  }

  pub fn device_mut(&mut self) -> &mut D {
    &mut self.device
  }

  pub fn channel(&self) -> &C {
    &self.kernel.channel
  }

  pub fn channel_mut(&mut self) -> &mut C {
    &mut self.kernel.channel
  }

  pub fn dma(&self) -> &DmaPipeline {
    &self.kernel.dma
  }

  pub fn stats(&self) -> PollStats {
    self.kernel.stats
  }

  pub fn pending_events(&self) -> usize {
    self.kernel.events.len()
  }

  pub fn run(&mut self) -> Result<(), SimError> {
    set_quiet(self.config.quiet);
    info!(
      "starting at t={} (sync deadline {:?}, max_step {})",
      self.kernel.main_time,
      self.kernel.channel.next_sync_deadline(),
      self.config.max_step
    );

    let res = match self.config.step_mode {
      StepMode::Continuous => self.run_continuous(),
      StepMode::Step => self.run_step_mode(),
    };
    if let Err(e) = res {
      error!("simulation aborted at t={}: {}", self.kernel.main_time, e);
      self.device.shutdown();
      return Err(e);
    }
    self.finish()
  }

  fn run_continuous(&mut self) -> Result<(), SimError> {
    while !self.is_exiting() {
      self.step()?;
    }
    Ok(())
  }

  fn run_step_mode(&mut self) -> Result<(), SimError> {
    let mut shell = Shell::new()?;
    println!("Step mode - Enter to step, 'si N' to step N times, 'i' for state, 'c' to continue, 'q' to quit");
    while !self.is_exiting() {
      match shell.read_command()? {
        Command::Step(n) => {
          for _ in 0..n {
            if self.is_exiting() {
              break;
            }
            self.step()?;
          }
          self.print_state();
        },
        Command::Info => {
          self.print_state();
          let stats = self.kernel.stats;
          println!(
            "polls={} delivered={} syncs={} next event={:?} next sync={:?}",
            stats.h2d_poll_total,
            stats.h2d_poll_suc,
            stats.h2d_poll_sync,
            self.kernel.events.next_deadline(),
            self.kernel.channel.next_sync_deadline()
          );
        },
        Command::Continue => return self.run_continuous(),
        Command::Quit => self.exiting.store(true, Ordering::Relaxed),
      }
    }
    Ok(())
  }

  fn print_state(&self) {
    println!(
      "t={} events={} dma in flight={} queued={}",
      self.kernel.main_time,
      self.kernel.events.len(),
      self.kernel.dma.in_flight(),
      self.kernel.dma.queued()
    );
  }

  /// One outer iteration: sync, then poll and trigger until time may
  /// advance, then advance `main_time`.
  pub fn step(&mut self) -> Result<(), SimError> {
    self.serve_requests();
    if !self.kernel.channel.is_terminated() {
      self.sync_pulse()?;
    }

    let mut first = true;
    let next = loop {
      if !first {
        thread::yield_now();
      }
      first = false;

      self.poll_h2d()?;
      self.trigger_event()?;

      let next = self.next_timestamp();
      if next > self.kernel.main_time || self.is_exiting() {
        break next;
      }
    };
    self.kernel.main_time = self.kernel.main_time.max(next);

    if self.kernel.channel.is_terminated() && self.kernel.channel.next_timestamp().is_none() && !self.is_exiting() {
      info!("peer closed the channel at t={}", self.kernel.main_time);
      self.exiting.store(true, Ordering::Relaxed);
    }
    Ok(())
  }

  fn serve_requests(&mut self) {
    if self.requests.take_time() {
      info!("main_time = {}", self.kernel.main_time);
    }
    if self.requests.take_stats() {
      let stats = self.kernel.stats;
      info!(
        "stats at t={}: polls={} delivered={} syncs={} dma in flight={} queued={}",
        self.kernel.main_time,
        stats.h2d_poll_total,
        stats.h2d_poll_suc,
        stats.h2d_poll_sync,
        self.kernel.dma.in_flight(),
        self.kernel.dma.queued()
      );
      self.window_base = Some(stats);
    }
  }

  fn sync_pulse(&mut self) -> Result<(), SimError> {
    let mut warned = false;
    loop {
      match self.kernel.channel.sync(self.kernel.main_time) {
        Ok(()) => return Ok(()),
        Err(ChannelError::Full) => {
          if !warned {
            warn!("sync failed (t={}), retrying", self.kernel.main_time);
            warned = true;
          }
          thread::yield_now();
        },
        Err(e) => return Err(e.into()),
      }
    }
  }

  fn next_timestamp(&mut self) -> u64 {
    let cap = self.kernel.main_time.saturating_add(self.config.max_step);
    let mut next = self.kernel.channel.next_timestamp().map_or(cap, |ts| ts.min(cap));
    if let Some(sync) = self.kernel.channel.next_sync_deadline() {
      next = next.min(sync);
    }
    if let Some(evt) = self.kernel.events.next_deadline() {
      next = next.min(evt);
    }
    next
  }

  fn poll_h2d(&mut self) -> Result<(), SimError> {
    let now = self.kernel.main_time;
    self.kernel.stats.h2d_poll_total += 1;
    let Some(inbound) = self.kernel.channel.poll(now)? else {
      return Ok(());
    };
    self.kernel.stats.h2d_poll_suc += 1;

    match inbound.msg {
      H2D::Read { req_id, bar, offset, len } => {
        self.kernel.trace("h2d_read", json!({ "bar": bar, "offset": offset, "len": len }));
        let mut ctx = self.kernel.ctx();
        let len = len as usize;
        let max = ctx.read_reply_max();
        if len > max {
          return Err(SimError::DmaTooLarge { len, max });
        }
        let mut data = vec![0u8; len];
        self.device.reg_read(&mut ctx, bar, offset, &mut data)?;
        ctx.reply_read(req_id, data)?;
      },
      H2D::Write { req_id, bar, offset, data } => {
        self.kernel.trace("h2d_write", json!({ "bar": bar, "offset": offset, "len": data.len() }));
        let mut ctx = self.kernel.ctx();
        self.device.reg_write(&mut ctx, bar, offset, &data)?;
        ctx.reply_write(req_id)?;
      },
      H2D::WritePosted { bar, offset, data } => {
        self.kernel.trace("h2d_write", json!({ "bar": bar, "offset": offset, "len": data.len(), "posted": true }));
        let mut ctx = self.kernel.ctx();
        self.device.reg_write(&mut ctx, bar, offset, &data)?;
      },
      H2D::ReadComp { req_id, data } => {
        let mut ctx = self.kernel.ctx();
        if let Some(op) = ctx.complete_dma(req_id, &data)? {
          self.device.dma_complete(&mut ctx, op)?;
        }
      },
      H2D::WriteComp { req_id } => {
        let mut ctx = self.kernel.ctx();
        if let Some(op) = ctx.complete_dma(req_id, &[])? {
          self.device.dma_complete(&mut ctx, op)?;
        }
      },
      H2D::Devctrl { flags } => {
        let parsed = DevCtrlFlags::from_bits(flags).unwrap_or_else(|| {
          warn!("devctrl: unsupported flag bits {:#x}", flags & !DevCtrlFlags::all().bits());
          DevCtrlFlags::from_bits_truncate(flags)
        });
        let mut ctx = self.kernel.ctx();
        self.device.devctrl_update(&mut ctx, parsed)?;
      },
      H2D::Sync => self.kernel.stats.h2d_poll_sync += 1,
      H2D::Terminate => {
        info!("peer terminated at t={}", now);
        self.exiting.store(true, Ordering::Relaxed);
      },
      H2D::HostIntro => debug!("duplicate host intro ignored"),
      H2D::Unknown(msg_type) => warn!("poll_h2d: unsupported type={:#x}", msg_type),
    }
    Ok(())
  }

  /// Pop and execute at most one due event.
  fn trigger_event(&mut self) -> Result<(), SimError> {
    let Some(evt) = self.kernel.events.pop_due(self.kernel.main_time) else {
      return Ok(());
    };
    self.kernel.trace("event", json!({ "time": evt.time, "priority": evt.priority }));
    let mut ctx = self.kernel.ctx();
    self.device.execute_event(&mut ctx, evt)
  }

  fn finish(&mut self) -> Result<(), SimError> {
    self.drain_dma()?;
    self.device.shutdown();
    if let Some(trace) = self.kernel.trace.as_mut() {
      trace.flush()?;
    }
    print_exit_report(self.kernel.main_time, &self.kernel.stats, self.kernel.dma.totals());
    if let Some(window) = self.window_stats() {
      print_window_report(&window);
    }
    Ok(())
  }

  /// Keep stepping until outstanding DMA has completed, the peer is gone,
  /// or the wall-clock budget runs out.
  fn drain_dma(&mut self) -> Result<(), SimError> {
    if self.kernel.dma.is_idle() {
      return Ok(());
    }
    info!(
      "draining dma: {} in flight, {} queued",
      self.kernel.dma.in_flight(),
      self.kernel.dma.queued()
    );
    let deadline = Instant::now() + Duration::from_millis(self.config.drain_timeout_ms);
    while !self.kernel.dma.is_idle() {
      if self.kernel.channel.is_terminated() {
        warn!("peer terminated with {} dma ops outstanding", self.kernel.dma.in_flight());
        break;
      }
      if Instant::now() >= deadline {
        warn!("dma drain timed out with {} ops outstanding", self.kernel.dma.in_flight());
        break;
      }
      self.step()?;
    }
    Ok(())
  }
}
