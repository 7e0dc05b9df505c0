use super::matcher::{MemReq, RequestMap};
use log::{debug, error};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use thiserror::Error;

pub type SharedRequestMap = Arc<Mutex<RequestMap>>;

/// Where the auxiliary thread stopped after a `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxState {
  Blocked,
  Finished,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
  #[error("the other side of the handshake is gone")]
  Disconnected,
  #[error("auxiliary thread panicked")]
  Panicked,
}

/// Timing-side handle. At any moment exactly one of the two threads runs:
/// `resume` hands control over and waits until the auxiliary thread blocks
/// on missing data or finishes.
pub struct AuxHandle<T> {
  resume_tx: Option<SyncSender<()>>,
  state_rx: Option<Receiver<AuxState>>,
  thread: Option<JoinHandle<Result<T, HandshakeError>>>,
  map: SharedRequestMap,
  finished: bool,
}

/// Auxiliary-side handle, passed to the thread body.
pub struct AuxPort {
  resume_rx: Receiver<()>,
  state_tx: SyncSender<AuxState>,
  map: SharedRequestMap,
}

/// Start `body` on its own thread. It does not run until the first `resume`.
pub fn spawn<T, F>(name: &str, map: SharedRequestMap, body: F) -> std::io::Result<AuxHandle<T>>
where
  T: Send + 'static,
  F: FnOnce(&mut AuxPort) -> Result<T, HandshakeError> + Send + 'static,
{
  let (resume_tx, resume_rx) = sync_channel::<()>(0);
  let (state_tx, state_rx) = sync_channel::<AuxState>(0);
  let mut port = AuxPort {
    resume_rx,
    state_tx,
    map: Arc::clone(&map),
  };

  let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
    port
      .resume_rx
      .recv()
      .map_err(|_| HandshakeError::Disconnected)?;
    let out = body(&mut port);
    // The timing side may already have hung up.
    let _ = port.state_tx.send(AuxState::Finished);
    out
  })?;

  Ok(AuxHandle {
    resume_tx: Some(resume_tx),
    state_rx: Some(state_rx),
    thread: Some(thread),
    map,
    finished: false,
  })
}

impl<T> AuxHandle<T> {
  pub fn map(&self) -> MutexGuard<'_, RequestMap> {
    self.map.lock().unwrap()
  }

  pub fn is_finished(&self) -> bool {
    self.finished
  }

  /// Let the auxiliary thread run until it blocks or finishes.
  pub fn resume(&mut self) -> Result<AuxState, HandshakeError> {
    if self.finished {
      return Ok(AuxState::Finished);
    }
    let (Some(tx), Some(rx)) = (self.resume_tx.as_ref(), self.state_rx.as_ref()) else {
      return Err(HandshakeError::Disconnected);
    };
    tx.send(()).map_err(|_| HandshakeError::Disconnected)?;
    let state = rx.recv().map_err(|_| HandshakeError::Disconnected)?;
    if state == AuxState::Finished {
      self.finished = true;
    }
    Ok(state)
  }

  /// Tear down the handshake and wait for the thread. A thread still
  /// blocked on data sees `Disconnected` and unwinds through its `?`s.
  pub fn join(&mut self) -> Option<Result<T, HandshakeError>> {
    self.resume_tx.take();
    self.state_rx.take();
    let thread = self.thread.take()?;
    match thread.join() {
      Ok(res) => Some(res),
      Err(_) => {
        error!("auxiliary thread panicked");
        Some(Err(HandshakeError::Panicked))
      },
    }
  }
}

impl<T> Drop for AuxHandle<T> {
  fn drop(&mut self) {
    if let Some(Err(e)) = self.join() {
      debug!("auxiliary thread ended early: {}", e);
    }
  }
}

impl AuxPort {
  pub fn map(&self) -> MutexGuard<'_, RequestMap> {
    self.map.lock().unwrap()
  }

  /// Give control back to the timing side and wait to be resumed.
  pub fn block(&mut self) -> Result<(), HandshakeError> {
    self
      .state_tx
      .send(AuxState::Blocked)
      .map_err(|_| HandshakeError::Disconnected)?;
    self.resume_rx.recv().map_err(|_| HandshakeError::Disconnected)
  }

  /// Register a producer for `[address, address + len)` that the timing
  /// side will fetch by DMA.
  pub fn prefetch(&mut self, tag: u32, address: u64, len: usize) -> u64 {
    let mut map = self.map();
    let id = map.next_id();
    map.produce(tag, MemReq::producer(id, tag, address, len));
    id
  }

  /// Blocking read: yields to the timing side until every byte is there.
  pub fn get_data(&mut self, tag: u32, address: u64, len: usize) -> Result<Vec<u8>, HandshakeError> {
    {
      let mut map = self.map();
      let id = map.next_id();
      map.register(tag, MemReq::consumer(id, tag, address, len));
    }
    loop {
      {
        let mut map = self.map();
        if map.is_complete(tag) {
          if let Some(req) = map.consume(tag) {
            return Ok(req.into_data());
          }
        }
      }
      self.block()?;
    }
  }

  /// Non-blocking read: returns the bytes only if they are all buffered,
  /// otherwise leaves the buffered fragments untouched.
  pub fn get_data_nb(&mut self, tag: u32, address: u64, len: usize) -> Option<Vec<u8>> {
    let mut map = self.map();
    if !map.matcher(tag).is_some_and(|m| m.covers(address, len)) {
      return None;
    }
    let id = map.next_id();
    map.register(tag, MemReq::consumer(id, tag, address, len));
    map.consume(tag).map(MemReq::into_data)
  }

  /// Queue output for the timing side to write back.
  pub fn put_data(&mut self, tag: u32, address: u64, data: Vec<u8>) {
    self.map().push_write(tag, address, data);
  }
}
