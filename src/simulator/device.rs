use super::dma::DmaOp;
use super::error::SimError;
use super::event::TimedEvent;
use super::kernel::PcieCtx;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const BAR_COUNT: usize = 6;

bitflags! {
  /// PCIe device control bits pushed by the host.
  #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
  pub struct DevCtrlFlags: u64 {
    const INTX_EN = 1 << 0;
    const MSI_EN = 1 << 1;
    const MSIX_EN = 1 << 2;
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarConfig {
  /// Size in bytes. Zero means the BAR is not implemented.
  pub len: u64,
  pub is_io: bool,
  pub is_64bit: bool,
  pub prefetchable: bool,
}

/// Identification and layout announced to the host during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIntro {
  pub vendor_id: u16,
  pub device_id: u16,
  pub class: u8,
  pub subclass: u8,
  pub revision: u8,
  pub bars: [BarConfig; BAR_COUNT],
  /// log2 of the number of MSI vectors.
  pub msi_nvecs_log2: u8,
  pub msix_nvecs: u16,
}

/// Behavioural model of one accelerator.
///
/// Every callback runs on the timing thread with a context bound to the
/// current simulation time.
pub trait Device {
  fn setup_intro(&mut self) -> DeviceIntro;

  fn reg_read(&mut self, ctx: &mut PcieCtx<'_>, bar: u8, offset: u64, dest: &mut [u8]) -> Result<(), SimError>;

  fn reg_write(&mut self, ctx: &mut PcieCtx<'_>, bar: u8, offset: u64, src: &[u8]) -> Result<(), SimError>;

  /// Called once per finished DMA, after the pipeline has refilled itself.
  fn dma_complete(&mut self, ctx: &mut PcieCtx<'_>, op: DmaOp) -> Result<(), SimError>;

  fn execute_event(&mut self, ctx: &mut PcieCtx<'_>, evt: TimedEvent) -> Result<(), SimError>;

  fn devctrl_update(&mut self, ctx: &mut PcieCtx<'_>, flags: DevCtrlFlags) -> Result<(), SimError>;

  /// Release auxiliary resources before the process exits.
  fn shutdown(&mut self) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_devctrl_flags_from_raw() {
    let flags = DevCtrlFlags::from_bits(0b011).unwrap();
    assert!(flags.contains(DevCtrlFlags::INTX_EN | DevCtrlFlags::MSI_EN));
    assert!(!flags.contains(DevCtrlFlags::MSIX_EN));

    assert!(DevCtrlFlags::from_bits(1 << 9).is_none());
    assert_eq!(DevCtrlFlags::from_bits_truncate((1 << 9) | 4), DevCtrlFlags::MSIX_EN);
  }
}
