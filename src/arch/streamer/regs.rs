// Streamer register map (BAR0, 64-bit registers)
pub const BAR0_LEN: u64 = 4096;

pub const REG_CTRL: u64 = 0x00;
pub const REG_STATUS: u64 = 0x08;
pub const REG_SRC: u64 = 0x10;
pub const REG_DST: u64 = 0x18;
pub const REG_LEN: u64 = 0x20;
pub const REG_KEY: u64 = 0x28;
/// Picoseconds between start and the last write-back of the previous job.
pub const REG_ELAPSED: u64 = 0x30;

pub const CTRL_START: u64 = 1 << 0;
pub const CTRL_RESET: u64 = 1 << 1;

pub const STATUS_BUSY: u64 = 1 << 0;
pub const STATUS_DONE: u64 = 1 << 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegFile {
  pub status: u64,
  pub src: u64,
  pub dst: u64,
  pub len: u64,
  pub key: u64,
  pub elapsed: u64,
}

impl RegFile {
  pub fn read(&self, reg: u64) -> u64 {
    match reg {
      REG_STATUS => self.status,
      REG_SRC => self.src,
      REG_DST => self.dst,
      REG_LEN => self.len,
      REG_KEY => self.key,
      REG_ELAPSED => self.elapsed,
      _ => 0,
    }
  }

  /// Plain stores. CTRL is handled by the device; STATUS bits are
  /// write-one-to-clear for DONE.
  pub fn write(&mut self, reg: u64, value: u64) {
    match reg {
      REG_STATUS => self.status &= !(value & STATUS_DONE),
      REG_SRC => self.src = value,
      REG_DST => self.dst = value,
      REG_LEN => self.len = value,
      REG_KEY => self.key = value,
      _ => {},
    }
  }
}

/// Little-endian view of a (possibly partial) register access. Returns the
/// 8-byte aligned register and the byte shift inside it.
pub fn split_access(offset: u64, len: usize) -> Option<(u64, u32)> {
  let shift = (offset & 7) as usize;
  if len == 0 || shift + len > 8 || offset + len as u64 > BAR0_LEN {
    return None;
  }
  Some((offset & !7, (shift * 8) as u32))
}
