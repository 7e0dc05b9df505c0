//! Framed little-endian wire format shared by the socket transport and tests.
//!
//! Every frame is a 16 byte header followed by `body_len` bytes of body.

use crate::simulator::device::{BarConfig, DeviceIntro, BAR_COUNT};
use crate::simulator::error::ChannelError;

pub const FRAME_HEADER_LEN: usize = 16;

// Shared
pub const MSG_SYNC: u8 = 0x01;
pub const MSG_TERMINATE: u8 = 0x02;
pub const MSG_HOST_INTRO: u8 = 0x03;
pub const MSG_DEV_INTRO: u8 = 0x04;

// Device -> host
pub const MSG_D2H_READ: u8 = 0x40;
pub const MSG_D2H_WRITE: u8 = 0x41;
pub const MSG_D2H_INTERRUPT: u8 = 0x42;
pub const MSG_D2H_READCOMP: u8 = 0x43;
pub const MSG_D2H_WRITECOMP: u8 = 0x44;

// Host -> device
pub const MSG_H2D_READ: u8 = 0x60;
pub const MSG_H2D_WRITE: u8 = 0x61;
pub const MSG_H2D_READCOMP: u8 = 0x62;
pub const MSG_H2D_WRITECOMP: u8 = 0x63;
pub const MSG_H2D_DEVCTRL: u8 = 0x64;
pub const MSG_H2D_WRITE_POSTED: u8 = 0x65;

/// Fixed part of a device DMA write body (req_id, addr, len, pad).
pub const D2H_WRITE_FIXED: usize = 24;
/// Fixed part of a host read completion body (req_id).
pub const H2D_READCOMP_FIXED: usize = 8;
/// Fixed part of a device read completion body (req_id).
pub const D2H_READCOMP_FIXED: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
  pub msg_type: u8,
  pub body_len: u32,
  pub timestamp: u64,
}

impl FrameHeader {
  pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
    let mut out = [0u8; FRAME_HEADER_LEN];
    out[0] = self.msg_type;
    out[4..8].copy_from_slice(&self.body_len.to_le_bytes());
    out[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
    out
  }

  pub fn decode(buf: &[u8]) -> Result<Self, ChannelError> {
    let mut r = Reader::new(buf);
    let msg_type = r.u8()?;
    r.skip(3)?;
    Ok(Self {
      msg_type,
      body_len: r.u32()?,
      timestamp: r.u64()?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
  LegacyHigh = 1,
  LegacyLow = 2,
  Msi = 3,
  Msix = 4,
}

impl InterruptKind {
  fn from_u8(v: u8) -> Option<Self> {
    match v {
      1 => Some(Self::LegacyHigh),
      2 => Some(Self::LegacyLow),
      3 => Some(Self::Msi),
      4 => Some(Self::Msix),
      _ => None,
    }
  }
}

/// Host to device messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2D {
  HostIntro,
  Read { req_id: u64, bar: u8, offset: u64, len: u32 },
  Write { req_id: u64, bar: u8, offset: u64, data: Vec<u8> },
  WritePosted { bar: u8, offset: u64, data: Vec<u8> },
  ReadComp { req_id: u64, data: Vec<u8> },
  WriteComp { req_id: u64 },
  Devctrl { flags: u64 },
  Sync,
  Terminate,
  Unknown(u8),
}

/// Device to host messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum D2H {
  DevIntro(DeviceIntro),
  Read { req_id: u64, addr: u64, len: u32 },
  Write { req_id: u64, addr: u64, data: Vec<u8> },
  Interrupt { kind: InterruptKind, vector: u16 },
  ReadComp { req_id: u64, data: Vec<u8> },
  WriteComp { req_id: u64 },
  Sync,
}

impl H2D {
  pub fn msg_type(&self) -> u8 {
    match self {
      H2D::HostIntro => MSG_HOST_INTRO,
      H2D::Read { .. } => MSG_H2D_READ,
      H2D::Write { .. } => MSG_H2D_WRITE,
      H2D::WritePosted { .. } => MSG_H2D_WRITE_POSTED,
      H2D::ReadComp { .. } => MSG_H2D_READCOMP,
      H2D::WriteComp { .. } => MSG_H2D_WRITECOMP,
      H2D::Devctrl { .. } => MSG_H2D_DEVCTRL,
      H2D::Sync => MSG_SYNC,
      H2D::Terminate => MSG_TERMINATE,
      H2D::Unknown(t) => *t,
    }
  }

  pub fn encode(&self, timestamp: u64) -> Vec<u8> {
    let mut body = Vec::new();
    match self {
      H2D::Read { req_id, bar, offset, len } => {
        put_access(&mut body, *req_id, *offset, *len, *bar);
      },
      H2D::Write { req_id, bar, offset, data } => {
        put_access(&mut body, *req_id, *offset, data.len() as u32, *bar);
        body.extend_from_slice(data);
      },
      H2D::WritePosted { bar, offset, data } => {
        put_access(&mut body, 0, *offset, data.len() as u32, *bar);
        body.extend_from_slice(data);
      },
      H2D::ReadComp { req_id, data } => {
        body.extend_from_slice(&req_id.to_le_bytes());
        body.extend_from_slice(data);
      },
      H2D::WriteComp { req_id } => body.extend_from_slice(&req_id.to_le_bytes()),
      H2D::Devctrl { flags } => body.extend_from_slice(&flags.to_le_bytes()),
      H2D::HostIntro | H2D::Sync | H2D::Terminate | H2D::Unknown(_) => {},
    }
    frame(self.msg_type(), timestamp, body)
  }

  pub fn decode(msg_type: u8, body: &[u8]) -> Result<Self, ChannelError> {
    let mut r = Reader::new(body);
    let msg = match msg_type {
      MSG_HOST_INTRO => H2D::HostIntro,
      MSG_H2D_READ => {
        let (req_id, offset, len, bar) = r.access()?;
        H2D::Read { req_id, bar, offset, len }
      },
      MSG_H2D_WRITE => {
        let (req_id, offset, len, bar) = r.access()?;
        H2D::Write { req_id, bar, offset, data: r.bytes(len as usize)?.to_vec() }
      },
      MSG_H2D_WRITE_POSTED => {
        let (_, offset, len, bar) = r.access()?;
        H2D::WritePosted { bar, offset, data: r.bytes(len as usize)?.to_vec() }
      },
      MSG_H2D_READCOMP => H2D::ReadComp {
        req_id: r.u64()?,
        data: r.rest().to_vec(),
      },
      MSG_H2D_WRITECOMP => H2D::WriteComp { req_id: r.u64()? },
      MSG_H2D_DEVCTRL => H2D::Devctrl { flags: r.u64()? },
      MSG_SYNC => H2D::Sync,
      MSG_TERMINATE => H2D::Terminate,
      other => H2D::Unknown(other),
    };
    Ok(msg)
  }
}

impl D2H {
  pub fn msg_type(&self) -> u8 {
    match self {
      D2H::DevIntro(_) => MSG_DEV_INTRO,
      D2H::Read { .. } => MSG_D2H_READ,
      D2H::Write { .. } => MSG_D2H_WRITE,
      D2H::Interrupt { .. } => MSG_D2H_INTERRUPT,
      D2H::ReadComp { .. } => MSG_D2H_READCOMP,
      D2H::WriteComp { .. } => MSG_D2H_WRITECOMP,
      D2H::Sync => MSG_SYNC,
    }
  }

  pub fn encode(&self, timestamp: u64) -> Vec<u8> {
    let mut body = Vec::new();
    match self {
      D2H::DevIntro(intro) => put_intro(&mut body, intro),
      D2H::Read { req_id, addr, len } => {
        put_access(&mut body, *req_id, *addr, *len, 0);
      },
      D2H::Write { req_id, addr, data } => {
        put_access(&mut body, *req_id, *addr, data.len() as u32, 0);
        body.extend_from_slice(data);
      },
      D2H::Interrupt { kind, vector } => {
        body.extend_from_slice(&vector.to_le_bytes());
        body.push(*kind as u8);
        body.extend_from_slice(&[0u8; 5]);
      },
      D2H::ReadComp { req_id, data } => {
        body.extend_from_slice(&req_id.to_le_bytes());
        body.extend_from_slice(data);
      },
      D2H::WriteComp { req_id } => body.extend_from_slice(&req_id.to_le_bytes()),
      D2H::Sync => {},
    }
    frame(self.msg_type(), timestamp, body)
  }

  pub fn decode(msg_type: u8, body: &[u8]) -> Result<Self, ChannelError> {
    let mut r = Reader::new(body);
    let msg = match msg_type {
      MSG_DEV_INTRO => D2H::DevIntro(r.intro()?),
      MSG_D2H_READ => {
        let (req_id, addr, len, _) = r.access()?;
        D2H::Read { req_id, addr, len }
      },
      MSG_D2H_WRITE => {
        let (req_id, addr, len, _) = r.access()?;
        D2H::Write { req_id, addr, data: r.bytes(len as usize)?.to_vec() }
      },
      MSG_D2H_INTERRUPT => {
        let vector = r.u16()?;
        let raw = r.u8()?;
        let kind = InterruptKind::from_u8(raw)
          .ok_or_else(|| ChannelError::Protocol(format!("bad interrupt kind {}", raw)))?;
        D2H::Interrupt { kind, vector }
      },
      MSG_D2H_READCOMP => D2H::ReadComp {
        req_id: r.u64()?,
        data: r.rest().to_vec(),
      },
      MSG_D2H_WRITECOMP => D2H::WriteComp { req_id: r.u64()? },
      MSG_SYNC => D2H::Sync,
      other => return Err(ChannelError::Protocol(format!("unexpected d2h type {:#x}", other))),
    };
    Ok(msg)
  }
}

fn frame(msg_type: u8, timestamp: u64, body: Vec<u8>) -> Vec<u8> {
  let header = FrameHeader {
    msg_type,
    body_len: body.len() as u32,
    timestamp,
  };
  let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
  out.extend_from_slice(&header.encode());
  out.extend_from_slice(&body);
  out
}

fn put_access(body: &mut Vec<u8>, req_id: u64, addr: u64, len: u32, bar: u8) {
  body.extend_from_slice(&req_id.to_le_bytes());
  body.extend_from_slice(&addr.to_le_bytes());
  body.extend_from_slice(&len.to_le_bytes());
  body.push(bar);
  body.extend_from_slice(&[0u8; 3]);
}

fn put_intro(body: &mut Vec<u8>, intro: &DeviceIntro) {
  body.extend_from_slice(&intro.vendor_id.to_le_bytes());
  body.extend_from_slice(&intro.device_id.to_le_bytes());
  body.extend_from_slice(&[intro.class, intro.subclass, intro.revision, intro.msi_nvecs_log2]);
  body.extend_from_slice(&intro.msix_nvecs.to_le_bytes());
  for bar in &intro.bars {
    body.extend_from_slice(&bar.len.to_le_bytes());
    let flags = (bar.is_io as u8) | ((bar.is_64bit as u8) << 1) | ((bar.prefetchable as u8) << 2);
    body.push(flags);
    body.extend_from_slice(&[0u8; 7]);
  }
}

struct Reader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  fn bytes(&mut self, n: usize) -> Result<&'a [u8], ChannelError> {
    let end = self.pos + n;
    if end > self.buf.len() {
      return Err(ChannelError::Protocol(format!(
        "truncated body: need {} bytes at offset {}, have {}",
        n,
        self.pos,
        self.buf.len()
      )));
    }
    let out = &self.buf[self.pos..end];
    self.pos = end;
    Ok(out)
  }

  fn skip(&mut self, n: usize) -> Result<(), ChannelError> {
    self.bytes(n).map(|_| ())
  }

  fn rest(&mut self) -> &'a [u8] {
    let out = &self.buf[self.pos..];
    self.pos = self.buf.len();
    out
  }

  fn u8(&mut self) -> Result<u8, ChannelError> {
    Ok(self.bytes(1)?[0])
  }

  fn u16(&mut self) -> Result<u16, ChannelError> {
    let mut b = [0u8; 2];
    b.copy_from_slice(self.bytes(2)?);
    Ok(u16::from_le_bytes(b))
  }

  fn u32(&mut self) -> Result<u32, ChannelError> {
    let mut b = [0u8; 4];
    b.copy_from_slice(self.bytes(4)?);
    Ok(u32::from_le_bytes(b))
  }

  fn u64(&mut self) -> Result<u64, ChannelError> {
    let mut b = [0u8; 8];
    b.copy_from_slice(self.bytes(8)?);
    Ok(u64::from_le_bytes(b))
  }

  /// (req_id, addr/offset, len, bar)
  fn access(&mut self) -> Result<(u64, u64, u32, u8), ChannelError> {
    let req_id = self.u64()?;
    let addr = self.u64()?;
    let len = self.u32()?;
    let bar = self.u8()?;
    self.skip(3)?;
    Ok((req_id, addr, len, bar))
  }

  fn intro(&mut self) -> Result<DeviceIntro, ChannelError> {
    let mut intro = DeviceIntro {
      vendor_id: self.u16()?,
      device_id: self.u16()?,
      class: self.u8()?,
      subclass: self.u8()?,
      revision: self.u8()?,
      msi_nvecs_log2: self.u8()?,
      msix_nvecs: self.u16()?,
      bars: [BarConfig::default(); BAR_COUNT],
    };
    for bar in intro.bars.iter_mut() {
      bar.len = self.u64()?;
      let flags = self.u8()?;
      self.skip(7)?;
      bar.is_io = flags & 1 != 0;
      bar.is_64bit = flags & 2 != 0;
      bar.prefetchable = flags & 4 != 0;
    }
    Ok(intro)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn split(frame: &[u8]) -> (FrameHeader, &[u8]) {
    let header = FrameHeader::decode(&frame[..FRAME_HEADER_LEN]).unwrap();
    (header, &frame[FRAME_HEADER_LEN..])
  }

  #[test]
  fn test_h2d_write_frame() {
    let msg = H2D::Write {
      req_id: 7,
      bar: 0,
      offset: 0x10,
      data: vec![1, 2, 3, 4],
    };
    let bytes = msg.encode(1234);
    let (header, body) = split(&bytes);
    assert_eq!(header.msg_type, MSG_H2D_WRITE);
    assert_eq!(header.timestamp, 1234);
    assert_eq!(header.body_len as usize, body.len());
    assert_eq!(H2D::decode(header.msg_type, body).unwrap(), msg);
  }

  #[test]
  fn test_d2h_intro_frame() {
    let mut intro = DeviceIntro {
      vendor_id: 0xdead,
      device_id: 0xbeef,
      ..Default::default()
    };
    intro.bars[0].len = 4096;
    intro.bars[0].is_64bit = true;
    let bytes = D2H::DevIntro(intro.clone()).encode(0);
    let (header, body) = split(&bytes);
    assert_eq!(D2H::decode(header.msg_type, body).unwrap(), D2H::DevIntro(intro));
  }

  #[test]
  fn test_unknown_type_is_not_an_error() {
    assert_eq!(H2D::decode(0x7f, &[]).unwrap(), H2D::Unknown(0x7f));
  }

  #[test]
  fn test_truncated_body_rejected() {
    let err = H2D::decode(MSG_H2D_READ, &[0; 10]).unwrap_err();
    assert!(matches!(err, ChannelError::Protocol(_)));
  }
}
