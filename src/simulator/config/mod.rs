pub mod config;

pub use self::config::{
  load_and_merge_configs, load_layered_config, AppConfig, ChannelSection, CliOverrides, SimulationSection,
  KNOWN_DEVICES,
};
