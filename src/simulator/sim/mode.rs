#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
  Continuous,
  Step,
}

/// Runtime knobs of the timing kernel, resolved from `AppConfig`.
#[derive(Debug, Clone)]
pub struct SimConfig {
  pub quiet: bool,
  pub step_mode: StepMode,
  pub trace_file: Option<String>,
  /// Initial simulation time in picoseconds.
  pub start_tick: u64,
  /// Upper bound on a single time advance in picoseconds.
  pub max_step: u64,
  pub max_pending_dma: usize,
  /// Wall-clock budget for draining in-flight DMA on exit.
  pub drain_timeout_ms: u64,
}

impl Default for SimConfig {
  fn default() -> Self {
    Self {
      quiet: false,
      step_mode: StepMode::Continuous,
      trace_file: None,
      start_tick: 0,
      max_step: 10_000,
      max_pending_dma: 64,
      drain_timeout_ms: 1_000,
    }
  }
}
