use signal_hook::consts::{SIGINT, SIGUSR1, SIGUSR2};
use signal_hook::flag;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Report requests raised from outside the main loop, served between steps.
#[derive(Debug, Clone, Default)]
pub struct ReportRequests {
  /// Log the current `main_time`.
  pub time: Arc<AtomicBool>,
  /// Log a statistics snapshot and start a statistics window.
  pub stats: Arc<AtomicBool>,
}

impl ReportRequests {
  pub fn take_time(&self) -> bool {
    self.time.swap(false, Ordering::Relaxed)
  }

  pub fn take_stats(&self) -> bool {
    self.stats.swap(false, Ordering::Relaxed)
  }
}

/// SIGINT sets `exiting` so the loop drains and reports; a second SIGINT
/// exits at once. SIGUSR1 and SIGUSR2 raise the matching report request.
pub fn install(exiting: Arc<AtomicBool>, requests: &ReportRequests) -> io::Result<()> {
  flag::register_conditional_shutdown(SIGINT, 1, Arc::clone(&exiting))?;
  flag::register(SIGINT, exiting)?;
  flag::register(SIGUSR1, Arc::clone(&requests.time))?;
  flag::register(SIGUSR2, Arc::clone(&requests.stats))?;
  Ok(())
}
