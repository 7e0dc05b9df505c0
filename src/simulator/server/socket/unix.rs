use super::channel::{Channel, Inbound, SyncState};
use super::protocol::{FrameHeader, D2H, FRAME_HEADER_LEN, H2D};
use crate::simulator::device::DeviceIntro;
use crate::simulator::error::ChannelError;
use log::{debug, info};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Listener-side Unix domain socket transport.
///
/// The host connects once. Reads are non-blocking after the handshake;
/// writes go through a bounded buffer so a slow peer shows up as `Full`.
pub struct UnixChannel {
  path: PathBuf,
  listener: UnixListener,
  stream: Option<UnixStream>,
  sync: SyncState,
  max_msg_len: usize,
  tx_capacity: usize,
  rx_buf: Vec<u8>,
  rx_queue: VecDeque<Inbound>,
  tx_buf: Vec<u8>,
  terminated: bool,
}

impl UnixChannel {
  pub fn bind(path: &Path, sync: SyncState, max_msg_len: usize) -> io::Result<Self> {
    if path.exists() {
      fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    info!("Listening on {}", path.display());
    Ok(Self {
      path: path.to_path_buf(),
      listener,
      stream: None,
      sync,
      max_msg_len,
      tx_capacity: max_msg_len * 64,
      rx_buf: Vec::new(),
      rx_queue: VecDeque::new(),
      tx_buf: Vec::new(),
      terminated: false,
    })
  }

  /// Total length of an inbound frame, rejected before any body is read if
  /// it exceeds the message limit.
  fn frame_len(&self, header: &FrameHeader) -> Result<usize, ChannelError> {
    let total = FRAME_HEADER_LEN + header.body_len as usize;
    if total > self.max_msg_len {
      return Err(ChannelError::Protocol(format!(
        "inbound frame of {} bytes exceeds limit {}",
        total, self.max_msg_len
      )));
    }
    Ok(total)
  }

  fn stream(&mut self) -> Result<&mut UnixStream, ChannelError> {
    self
      .stream
      .as_mut()
      .ok_or_else(|| ChannelError::Protocol("not connected".to_string()))
  }

  /// Push buffered outbound bytes without blocking.
  fn flush_tx(&mut self) -> Result<(), ChannelError> {
    while !self.tx_buf.is_empty() {
      let Some(stream) = self.stream.as_mut() else {
        return Err(ChannelError::Protocol("not connected".to_string()));
      };
      let res = stream.write(&self.tx_buf);
      match res {
        Ok(0) => {
          self.terminated = true;
          return Err(ChannelError::PeerTerminated);
        },
        Ok(n) => {
          self.tx_buf.drain(..n);
        },
        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
        Err(e) if e.kind() == ErrorKind::Interrupted => {},
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
          self.terminated = true;
          return Err(ChannelError::PeerTerminated);
        },
        Err(e) => return Err(e.into()),
      }
    }
    Ok(())
  }

  /// Read whatever is available and split it into frames.
  fn fill_rx(&mut self) -> Result<(), ChannelError> {
    if self.terminated {
      return Ok(());
    }
    let mut chunk = [0u8; 4096];
    loop {
      let res = self.stream()?.read(&mut chunk);
      match res {
        Ok(0) => {
          debug!("peer closed the socket");
          self.terminated = true;
          break;
        },
        Ok(n) => self.rx_buf.extend_from_slice(&chunk[..n]),
        Err(e) if e.kind() == ErrorKind::WouldBlock => break,
        Err(e) if e.kind() == ErrorKind::Interrupted => {},
        Err(e) => return Err(e.into()),
      }
    }

    while self.rx_buf.len() >= FRAME_HEADER_LEN {
      let header = FrameHeader::decode(&self.rx_buf[..FRAME_HEADER_LEN])?;
      let total = self.frame_len(&header)?;
      if self.rx_buf.len() < total {
        break;
      }
      let msg = H2D::decode(header.msg_type, &self.rx_buf[FRAME_HEADER_LEN..total])?;
      self.rx_buf.drain(..total);
      self.sync.on_receive(header.timestamp);
      self.rx_queue.push_back(Inbound {
        timestamp: header.timestamp,
        msg,
      });
    }
    Ok(())
  }
}

impl Channel for UnixChannel {
  fn connect(&mut self, intro: &DeviceIntro) -> Result<(), ChannelError> {
    info!("Waiting for host connection...");
    let (stream, _) = self.listener.accept()?;
    info!("Host connected");

    let mut stream = stream;
    stream.write_all(&D2H::DevIntro(intro.clone()).encode(0))?;

    // Block until the host introduces itself.
    loop {
      let mut header = [0u8; FRAME_HEADER_LEN];
      stream.read_exact(&mut header)?;
      let header = FrameHeader::decode(&header)?;
      let total = self.frame_len(&header)?;
      let mut body = vec![0u8; total - FRAME_HEADER_LEN];
      stream.read_exact(&mut body)?;
      match H2D::decode(header.msg_type, &body)? {
        H2D::HostIntro => break,
        other => debug!("ignoring {:?} before host intro", other),
      }
    }

    stream.set_nonblocking(true)?;
    self.stream = Some(stream);
    Ok(())
  }

  fn poll(&mut self, now: u64) -> Result<Option<Inbound>, ChannelError> {
    if self.rx_queue.is_empty() {
      self.fill_rx()?;
    }
    match self.rx_queue.front() {
      Some(front) if front.timestamp <= now => {
        let inbound = self.rx_queue.pop_front();
        if let Some(Inbound { msg: H2D::Terminate, .. }) = inbound {
          self.terminated = true;
        }
        Ok(inbound)
      },
      _ => Ok(None),
    }
  }

  fn next_timestamp(&mut self) -> Option<u64> {
    match self.rx_queue.front() {
      Some(front) => Some(front.timestamp),
      None => self.sync.idle_timestamp(self.terminated),
    }
  }

  fn sync(&mut self, now: u64) -> Result<(), ChannelError> {
    if self.sync.due(now) {
      self.send(now, &D2H::Sync)?;
    }
    Ok(())
  }

  fn next_sync_deadline(&self) -> Option<u64> {
    self.sync.deadline()
  }

  fn send(&mut self, now: u64, msg: &D2H) -> Result<(), ChannelError> {
    if self.terminated {
      return Err(ChannelError::PeerTerminated);
    }
    self.flush_tx()?;
    let frame = msg.encode(self.sync.stamp(now));
    if self.tx_buf.len() + frame.len() > self.tx_capacity {
      return Err(ChannelError::Full);
    }
    self.tx_buf.extend_from_slice(&frame);
    self.sync.on_send(now);
    self.flush_tx()
  }

  fn max_msg_len(&self) -> usize {
    self.max_msg_len
  }

  fn is_terminated(&self) -> bool {
    self.terminated
  }
}

impl Drop for UnixChannel {
  fn drop(&mut self) {
    let _ = fs::remove_file(&self.path);
  }
}
