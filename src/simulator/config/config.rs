use crate::simulator::server::socket::protocol::{D2H_WRITE_FIXED, FRAME_HEADER_LEN};
use crate::simulator::server::socket::SyncState;
use crate::simulator::sim::mode::{SimConfig, StepMode};
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// Device models this binary knows how to build.
pub const KNOWN_DEVICES: &[&str] = &["streamer"];

/// Host link section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelSection {
  pub socket_path: String,
  /// Recorded for the host's benefit; the socket transport does not map it.
  #[serde(default)]
  pub shm_path: String,
  #[serde(default = "default_sync")]
  pub sync: bool,
  pub sync_period_ns: u64,
  pub link_latency_ns: u64,
  #[serde(default)]
  pub start_tick: u64,
  pub max_msg_len: usize,
}

fn default_sync() -> bool {
  true
}

impl Default for ChannelSection {
  fn default() -> Self {
    Self {
      socket_path: "/tmp/metronome-pcie.sock".to_string(),
      shm_path: "/dev/shm/metronome-pcie".to_string(),
      sync: default_sync(),
      sync_period_ns: 500,
      link_latency_ns: 500,
      start_tick: 0,
      max_msg_len: 4096,
    }
  }
}

impl ChannelSection {
  /// Sync period and link latency converted to picoseconds.
  pub fn sync_state(&self) -> SyncState {
    SyncState::new(self.sync, self.sync_period_ns * 1000, self.link_latency_ns * 1000)
  }
}

/// Simulation section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimulationSection {
  #[serde(default = "default_device")]
  pub device: String,
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub step_mode: bool,
  #[serde(default)]
  pub trace_file: String,
  pub max_pending_dma: usize,
  pub max_step: u64,
  pub drain_timeout_ms: u64,
}

fn default_device() -> String {
  "streamer".to_string()
}

impl Default for SimulationSection {
  fn default() -> Self {
    Self {
      device: default_device(),
      quiet: false,
      step_mode: false,
      trace_file: String::new(),
      max_pending_dma: 64,
      max_step: 10_000,
      drain_timeout_ms: 1_000,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub channel: ChannelSection,
  #[serde(default)]
  pub simulation: SimulationSection,
}

impl AppConfig {
  pub fn sim_config(&self) -> SimConfig {
    SimConfig {
      quiet: self.simulation.quiet,
      step_mode: if self.simulation.step_mode {
        StepMode::Step
      } else {
        StepMode::Continuous
      },
      trace_file: (!self.simulation.trace_file.is_empty()).then(|| self.simulation.trace_file.clone()),
      start_tick: self.channel.start_tick,
      max_step: self.simulation.max_step,
      max_pending_dma: self.simulation.max_pending_dma,
      drain_timeout_ms: self.simulation.drain_timeout_ms,
    }
  }

  pub fn to_toml(&self) -> io::Result<String> {
    toml::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
  }
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub socket_path: Option<String>,
  pub shm_path: Option<String>,
  pub start_tick: Option<u64>,
  pub sync_period_ns: Option<u64>,
  pub link_latency_ns: Option<u64>,
  pub no_sync: bool,
  pub quiet: bool,
  pub step: bool,
  pub trace_file: Option<String>,
  pub device: Option<String>,
}

/// Layer the built-in defaults, an optional file and `METRONOME__*`
/// environment variables.
pub fn load_layered_config(custom_config_path: Option<&Path>) -> io::Result<AppConfig> {
  let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

  if let Some(path) = custom_config_path {
    if !path.exists() {
      return Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("cannot read config file {:?}", path),
      ));
    }
    builder = builder.add_source(File::from(path).format(FileFormat::Toml));
  }

  builder = builder.add_source(Environment::with_prefix("METRONOME").separator("__").try_parsing(true));

  builder
    .build()
    .and_then(|settings| settings.try_deserialize::<AppConfig>())
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse config: {}", e)))
}

/// Apply CLI overrides to the configuration
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if let Some(path) = &cli.socket_path {
    config.channel.socket_path = path.clone();
  }
  if let Some(path) = &cli.shm_path {
    config.channel.shm_path = path.clone();
  }
  if let Some(tick) = cli.start_tick {
    config.channel.start_tick = tick;
  }
  if let Some(period) = cli.sync_period_ns {
    config.channel.sync_period_ns = period;
  }
  if let Some(latency) = cli.link_latency_ns {
    config.channel.link_latency_ns = latency;
  }
  if cli.no_sync {
    config.channel.sync = false;
  }
  if cli.quiet {
    config.simulation.quiet = true;
  }
  if cli.step {
    config.simulation.step_mode = true;
  }
  if let Some(file) = &cli.trace_file {
    config.simulation.trace_file = file.clone();
  }
  if let Some(device) = &cli.device {
    config.simulation.device = device.clone();
  }
}

pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  let invalid = |msg: String| Err(io::Error::new(io::ErrorKind::InvalidData, msg));

  if config.channel.socket_path.trim().is_empty() {
    return invalid("socket_path cannot be empty".to_string());
  }
  if config.channel.sync && config.channel.sync_period_ns == 0 {
    return invalid("sync_period_ns must be positive when sync is enabled".to_string());
  }
  let min_msg = FRAME_HEADER_LEN + D2H_WRITE_FIXED + 1;
  if config.channel.max_msg_len < min_msg {
    return invalid(format!("max_msg_len must be at least {}", min_msg));
  }
  if config.simulation.max_pending_dma == 0 {
    return invalid("max_pending_dma must be positive".to_string());
  }
  if config.simulation.max_step == 0 {
    return invalid("max_step must be positive".to_string());
  }
  if !KNOWN_DEVICES.contains(&config.simulation.device.to_lowercase().as_str()) {
    return invalid(format!("unsupported device: {}", config.simulation.device));
  }
  Ok(())
}

/// Make relative paths absolute against `root`
pub fn resolve_paths(config: &mut AppConfig, root: &Path) {
  config.channel.socket_path = resolve_single_path(&config.channel.socket_path, root);
  if !config.simulation.trace_file.is_empty() {
    config.simulation.trace_file = resolve_single_path(&config.simulation.trace_file, root);
  }
}

fn resolve_single_path(path_str: &str, root: &Path) -> String {
  let path = Path::new(path_str);
  if path_str.is_empty() || path.is_absolute() {
    return path_str.to_string();
  }
  root.join(path).to_string_lossy().to_string()
}

/// Load and merge configuration
///
/// 1. built-in defaults
/// 2. custom config file, if given
/// 3. environment
/// 4. CLI overrides
/// 5. path resolution
/// 6. validation
pub fn load_and_merge_configs(
  custom_config_path: Option<&str>,
  root: &Path,
  cli: &CliOverrides,
) -> io::Result<AppConfig> {
  let custom = custom_config_path.map(|p| {
    let path = PathBuf::from(p);
    if path.is_absolute() {
      path
    } else {
      root.join(path)
    }
  });

  let mut config = load_layered_config(custom.as_deref())?;
  apply_cli_overrides(&mut config, cli);
  resolve_paths(&mut config, root);
  validate_config(&config)?;
  Ok(config)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn test_default_toml_matches_default() {
    let parsed: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
    assert_eq!(parsed, AppConfig::default());
  }

  #[test]
  fn test_file_layer_and_cli_override() {
    let dir = std::env::temp_dir().join(format!("metronome-cfg-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
      dir.join("custom.toml"),
      "[channel]\nsync_period_ns = 250\n\n[simulation]\nmax_pending_dma = 8\n",
    )
    .unwrap();

    let cli = CliOverrides {
      socket_path: Some("pcie.sock".to_string()),
      link_latency_ns: Some(10),
      ..Default::default()
    };
    let config = load_and_merge_configs(Some("custom.toml"), &dir, &cli).unwrap();
    assert_eq!(config.channel.sync_period_ns, 250);
    assert_eq!(config.channel.link_latency_ns, 10);
    assert_eq!(config.simulation.max_pending_dma, 8);
    assert_eq!(config.simulation.max_step, 10_000);
    assert_eq!(PathBuf::from(&config.channel.socket_path), dir.join("pcie.sock"));

    let sim = config.sim_config();
    assert_eq!(sim.max_pending_dma, 8);
    assert_eq!(config.channel.sync_state().link_latency, 10_000);

    let _ = fs::remove_dir_all(&dir);
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let mut config = AppConfig::default();
    assert!(validate_config(&config).is_ok());

    config.simulation.max_pending_dma = 0;
    assert!(validate_config(&config).is_err());

    let mut config = AppConfig::default();
    config.simulation.device = "gpu".to_string();
    assert!(validate_config(&config).is_err());

    let mut config = AppConfig::default();
    config.channel.sync_period_ns = 0;
    assert!(validate_config(&config).is_err());
    config.channel.sync = false;
    assert!(validate_config(&config).is_ok());
  }

  #[test]
  fn test_missing_config_file() {
    let err = load_layered_config(Some(Path::new("/nonexistent/metronome.toml"))).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }
}
