use crate::log_info;

/// Inbound polling counters kept by the main loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
  pub h2d_poll_total: u64,
  pub h2d_poll_suc: u64,
  pub h2d_poll_sync: u64,
}

impl PollStats {
  pub fn poll_suc_rate(&self) -> f64 {
    ratio(self.h2d_poll_suc, self.h2d_poll_total)
  }

  pub fn sync_rate(&self) -> f64 {
    ratio(self.h2d_poll_sync, self.h2d_poll_suc)
  }

  /// Counters accumulated since `base` was taken.
  pub fn since(&self, base: &PollStats) -> PollStats {
    PollStats {
      h2d_poll_total: self.h2d_poll_total.saturating_sub(base.h2d_poll_total),
      h2d_poll_suc: self.h2d_poll_suc.saturating_sub(base.h2d_poll_suc),
      h2d_poll_sync: self.h2d_poll_sync.saturating_sub(base.h2d_poll_sync),
    }
  }
}

fn ratio(num: u64, den: u64) -> f64 {
  if den == 0 {
    0.0
  } else {
    num as f64 / den as f64
  }
}

pub fn print_exit_report(main_time: u64, stats: &PollStats, dma_totals: (u64, u64)) {
  log_info!("exit main_time: {}", main_time);
  log_info!(
    "{:>16}: {:>14} {:>16}: {:>14}  poll_suc_rate: {:.6}",
    "h2d_poll_total",
    stats.h2d_poll_total,
    "h2d_poll_suc",
    stats.h2d_poll_suc,
    stats.poll_suc_rate()
  );
  log_info!(
    "{:>16}: {:>14}  sync_rate: {:.6}",
    "h2d_poll_sync",
    stats.h2d_poll_sync,
    stats.sync_rate()
  );
  log_info!("dma issued: {} completed: {}", dma_totals.0, dma_totals.1);
}

/// Counters of the window opened by a statistics request.
pub fn print_window_report(window: &PollStats) {
  log_info!(
    "{:>16}: {:>14} {:>16}: {:>14}  poll_suc_rate: {:.6}",
    "s_h2d_poll_total",
    window.h2d_poll_total,
    "s_h2d_poll_suc",
    window.h2d_poll_suc,
    window.poll_suc_rate()
  );
  log_info!(
    "{:>16}: {:>14}  sync_rate: {:.6}",
    "s_h2d_poll_sync",
    window.h2d_poll_sync,
    window.sync_rate()
  );
}

/// Per-transition firing counts of one net.
pub fn print_transition_counts(net_name: &str, counts: &[(String, u64)]) {
  log_info!("--- {} transition counts ---", net_name);
  for (id, count) in counts {
    log_info!("  {:<24} {}", id, count);
  }
}
