use crate::lpn::HandshakeError;
use std::io;
use thiserror::Error;

/// Failures reported by a channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
  /// Outbound queue has no free slot right now; the caller may retry.
  #[error("outbound queue full")]
  Full,
  #[error("peer terminated")]
  PeerTerminated,
  #[error("protocol error: {0}")]
  Protocol(String),
  #[error(transparent)]
  Io(#[from] io::Error),
}

/// Kernel level errors. Everything that reaches `Simulator::run` is fatal.
#[derive(Debug, Error)]
pub enum SimError {
  #[error("peer terminated while allocating an outbound message")]
  PeerTerminated,
  #[error("outbound payload of {len} bytes exceeds channel limit of {max}")]
  DmaTooLarge { len: usize, max: usize },
  #[error("dma completion carries {got} bytes but {expected} were requested")]
  CompletionTooLarge { got: usize, expected: usize },
  #[error("event at {time} scheduled before current time {now}")]
  EventInPast { time: u64, now: u64 },
  #[error("device error: {0}")]
  Device(String),
  #[error("channel error: {0}")]
  Channel(ChannelError),
  #[error("auxiliary thread: {0}")]
  Handshake(#[from] HandshakeError),
  #[error(transparent)]
  Io(#[from] io::Error),
}

impl From<ChannelError> for SimError {
  fn from(err: ChannelError) -> Self {
    match err {
      ChannelError::PeerTerminated => SimError::PeerTerminated,
      other => SimError::Channel(other),
    }
  }
}

impl From<SimError> for io::Error {
  fn from(err: SimError) -> Self {
    match err {
      SimError::Io(e) => e,
      other => io::Error::other(other),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_peer_terminated_maps_to_fatal() {
    let err: SimError = ChannelError::PeerTerminated.into();
    assert!(matches!(err, SimError::PeerTerminated));

    let err: SimError = ChannelError::Full.into();
    assert!(matches!(err, SimError::Channel(ChannelError::Full)));
  }

  #[test]
  fn test_io_roundtrip_keeps_kind() {
    let err = SimError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
    let io_err: io::Error = err.into();
    assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
  }
}
