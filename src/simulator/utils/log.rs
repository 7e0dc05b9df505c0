/// Global logging configuration
use log::LevelFilter;
use std::sync::atomic::{AtomicBool, Ordering};
static ENABLE_LOG: AtomicBool = AtomicBool::new(true);

/// Install the env_logger backend. `RUST_LOG` overrides the default `info`
/// filter. Safe to call more than once.
pub fn init_log() {
  let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .format_timestamp(None)
    .try_init();
}

/// Quiet mode: drop everything below warnings and suppress reports.
pub fn set_quiet(quiet: bool) {
  if quiet {
    log::set_max_level(LevelFilter::Warn);
  }
  set_log(!quiet);
}

/// Set report output enabled
pub fn set_log(enabled: bool) {
  ENABLE_LOG.store(enabled, Ordering::Relaxed);
}

/// Check if report output is enabled, default is true
pub fn is_log_enabled() -> bool {
  ENABLE_LOG.load(Ordering::Relaxed)
}

/// Print a report line with blue [Log] prefix
#[macro_export]
macro_rules! log_info {
  ($($arg:tt)*) => {
    if $crate::simulator::utils::log::is_log_enabled() {
      eprintln!("\x1b[34m[Log]\x1b[0m {}", format!($($arg)*));
    }
  };
}
