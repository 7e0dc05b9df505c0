use clap::Parser;
use log::info;
use metronome::arch::create_device;
use metronome::simulator::config::{load_and_merge_configs, CliOverrides};
use metronome::simulator::server::socket::UnixChannel;
use metronome::simulator::utils::log::init_log;
use metronome::simulator::utils::signal;
use metronome::simulator::Simulator;
use std::path::Path;

/// Metronome - PCIe device timing simulator
#[derive(Parser, Debug)]
#[command(name = "metronome")]
#[command(version = "0.1.0")]
#[command(about = "Discrete-event timing kernel for host/device co-simulation", long_about = None)]
struct Args {
  /// Unix socket the host connects to
  #[arg(value_name = "PCI_SOCKET")]
  socket: String,

  /// Shared memory path announced by the host
  #[arg(value_name = "SHM")]
  shm: String,

  /// Start time in picoseconds
  #[arg(value_name = "START_TICK")]
  start_tick: Option<u64>,

  /// Sync period in nanoseconds
  #[arg(value_name = "SYNC_PERIOD")]
  sync_period: Option<u64>,

  /// PCIe link latency in nanoseconds
  #[arg(value_name = "PCI_LATENCY")]
  pci_latency: Option<u64>,

  /// Configuration file (TOML)
  #[arg(short, long, value_name = "FILE")]
  config: Option<String>,

  /// Enable step mode (interactive stepping)
  #[arg(short, long)]
  step: bool,

  /// Quiet mode (suppress log messages)
  #[arg(short, long)]
  quiet: bool,

  /// Output trace file path
  #[arg(long, value_name = "FILE")]
  trace_file: Option<String>,

  /// Run without sync messages
  #[arg(long)]
  no_sync: bool,

  /// Device model to simulate
  #[arg(short, long, value_name = "DEVICE")]
  device: Option<String>,

  /// Print the merged configuration and exit
  #[arg(long)]
  dump_config: bool,
}

fn main() -> std::io::Result<()> {
  init_log();

  let args = Args::parse();

  let cli = CliOverrides {
    socket_path: Some(args.socket),
    shm_path: Some(args.shm),
    start_tick: args.start_tick,
    sync_period_ns: args.sync_period,
    link_latency_ns: args.pci_latency,
    no_sync: args.no_sync,
    quiet: args.quiet,
    step: args.step,
    trace_file: args.trace_file,
    device: args.device,
  };

  let root = std::env::current_dir()?;
  let app = load_and_merge_configs(args.config.as_deref(), &root, &cli)?;
  if args.dump_config {
    print!("{}", app.to_toml()?);
    return Ok(());
  }

  let device = create_device(&app.simulation.device)?;
  info!("waiting for host on {}", app.channel.socket_path);
  let channel = UnixChannel::bind(
    Path::new(&app.channel.socket_path),
    app.channel.sync_state(),
    app.channel.max_msg_len,
  )?;

  let mut simulator = Simulator::new(app.sim_config(), channel, device)?;
  signal::install(simulator.exit_flag(), &simulator.report_requests())?;
  simulator.run()?;
  Ok(())
}
