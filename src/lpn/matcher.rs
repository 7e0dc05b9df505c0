use crate::simulator::dma::DmaDirection;
use log::warn;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqState {
  /// Created, not yet eligible for DMA. Consumers stay here until complete.
  Unissued,
  /// Waiting for the timing side to request its bytes.
  Ready,
  /// Every byte has been requested, some are still missing.
  Issued,
  Complete,
}

/// A memory request: either a consumer waiting for bytes or a producer
/// fragment holding (possibly partial) data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemReq {
  pub id: u64,
  pub tag: u32,
  pub address: u64,
  pub length: usize,
  pub direction: DmaDirection,
  pub issued_ts: Option<u64>,
  pub complete_ts: Option<u64>,
  acquired_len: usize,
  requested_len: usize,
  buffer: Vec<u8>,
  state: ReqState,
  // Out-of-order pieces past the contiguous prefix: offset -> len.
  early: BTreeMap<usize, usize>,
}

impl MemReq {
  pub fn new(id: u64, tag: u32, address: u64, length: usize, direction: DmaDirection) -> Self {
    Self {
      id,
      tag,
      address,
      length,
      direction,
      issued_ts: None,
      complete_ts: None,
      acquired_len: 0,
      requested_len: 0,
      buffer: vec![0; length],
      state: if length == 0 {
        ReqState::Complete
      } else {
        ReqState::Unissued
      },
      early: BTreeMap::new(),
    }
  }

  /// Consumer asking for `[address, address + length)`.
  pub fn consumer(id: u64, tag: u32, address: u64, length: usize) -> Self {
    Self::new(id, tag, address, length, DmaDirection::Read)
  }

  /// Producer whose bytes still have to be fetched by DMA.
  pub fn producer(id: u64, tag: u32, address: u64, length: usize) -> Self {
    let mut req = Self::new(id, tag, address, length, DmaDirection::Read);
    if req.state == ReqState::Unissued {
      req.state = ReqState::Ready;
    }
    req
  }

  /// Producer that already holds all of its bytes.
  pub fn filled(id: u64, tag: u32, address: u64, data: Vec<u8>) -> Self {
    let length = data.len();
    let mut req = Self::new(id, tag, address, length, DmaDirection::Read);
    req.buffer = data;
    req.acquired_len = length;
    req.requested_len = length;
    req.state = ReqState::Complete;
    req
  }

  pub fn acquired_len(&self) -> usize {
    self.acquired_len
  }

  pub fn state(&self) -> ReqState {
    self.state
  }

  pub fn is_complete(&self) -> bool {
    self.acquired_len == self.length
  }

  pub fn end(&self) -> u64 {
    self.address + self.length as u64
  }

  pub fn data(&self) -> &[u8] {
    &self.buffer[..self.acquired_len]
  }

  pub fn into_data(self) -> Vec<u8> {
    let mut buffer = self.buffer;
    buffer.truncate(self.acquired_len);
    buffer
  }

  pub fn mark_ready(&mut self) {
    if self.state == ReqState::Unissued {
      self.state = ReqState::Ready;
    }
  }

  /// Next unrequested slice of at most `block` bytes, for block-wise DMA.
  pub fn next_chunk(&mut self, block: usize) -> Option<(u64, usize)> {
    if self.state != ReqState::Ready || self.requested_len >= self.length || block == 0 {
      return None;
    }
    let len = block.min(self.length - self.requested_len);
    let address = self.address + self.requested_len as u64;
    self.requested_len += len;
    if self.requested_len == self.length {
      self.state = ReqState::Issued;
    }
    Some((address, len))
  }

  /// Deliver bytes for `[address, address + data.len())`. Pieces past a
  /// gap are held back until the gap closes, so `acquired_len` always
  /// counts a contiguous prefix. Returns false if the range does not fit.
  pub fn supply_at(&mut self, address: u64, data: &[u8]) -> bool {
    if address < self.address || address + data.len() as u64 > self.end() {
      return false;
    }
    let offset = (address - self.address) as usize;
    self.buffer[offset..offset + data.len()].copy_from_slice(data);

    if offset <= self.acquired_len {
      self.acquired_len = self.acquired_len.max(offset + data.len());
      while let Some((&off, &len)) = self.early.first_key_value() {
        if off > self.acquired_len {
          break;
        }
        self.acquired_len = self.acquired_len.max(off + len);
        self.early.remove(&off);
      }
    } else {
      let held = self.early.entry(offset).or_insert(0);
      *held = (*held).max(data.len());
    }

    if self.is_complete() {
      self.state = ReqState::Complete;
    }
    true
  }

  /// Whether `[address, address + len)` already arrived, either in the
  /// contiguous prefix or in a held-back piece.
  pub fn has_range(&self, address: u64, len: usize) -> bool {
    if address < self.address || address + len as u64 > self.end() {
      return false;
    }
    let offset = (address - self.address) as usize;
    offset + len <= self.acquired_len
      || self
        .early
        .range(..=offset)
        .any(|(&off, &held)| offset + len <= off + held)
  }

  /// Append bytes at the acquisition cursor.
  fn accept(&mut self, data: &[u8]) {
    let start = self.acquired_len;
    self.buffer[start..start + data.len()].copy_from_slice(data);
    self.acquired_len += data.len();
    if self.is_complete() {
      self.state = ReqState::Complete;
    }
  }
}

#[derive(Debug)]
struct Fragment {
  req: MemReq,
  // Bytes of the fragment already handed to consumers, from its start.
  consumed: usize,
}

/// Reconciles one consumer against the producer fragments of one tag.
///
/// Fragments of a tag must arrive in address order. Only the head fragment
/// is ever examined; a head that does not cover the consumer's next byte
/// stops matching until more data arrives.
#[derive(Debug, Default)]
pub struct Matcher {
  current: Option<MemReq>,
  reqs: VecDeque<Fragment>,
}

impl Matcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, req: MemReq) {
    if let Some(prev) = self.current.as_ref() {
      warn!(
        "tag {}: consumer {} replaced before it was consumed ({}/{} bytes)",
        req.tag, prev.id, prev.acquired_len, prev.length
      );
    }
    self.current = Some(req);
    self.match_all();
  }

  pub fn produce(&mut self, req: MemReq) {
    self.reqs.push_back(Fragment { req, consumed: 0 });
    self.match_all();
  }

  /// Detach the active consumer, complete or not.
  pub fn consume(&mut self) -> Option<MemReq> {
    self.current.take()
  }

  pub fn current(&self) -> Option<&MemReq> {
    self.current.as_ref()
  }

  pub fn is_complete(&self) -> bool {
    self.current.as_ref().is_some_and(MemReq::is_complete)
  }

  pub fn fragments(&self) -> usize {
    self.reqs.len()
  }

  pub fn clear(&mut self) {
    self.current = None;
    self.reqs.clear();
  }

  /// Whether the buffered fragments could satisfy `[address, address + len)`
  /// right now, without touching any state.
  pub fn covers(&self, address: u64, len: usize) -> bool {
    let end = address + len as u64;
    let mut cursor = address;
    for frag in self.reqs.iter().filter(|f| f.req.length > 0) {
      if cursor >= end {
        break;
      }
      let avail_end = frag.req.address + frag.req.acquired_len as u64;
      if cursor < frag.req.address || cursor >= avail_end {
        return false;
      }
      cursor = avail_end.min(end);
      if !frag.req.is_complete() {
        break;
      }
    }
    cursor >= end
  }

  /// DMA completion data for the first producer fragment that contains
  /// `address` and still lacks those bytes. Two fragments over the same
  /// memory are filled in queue order.
  pub fn fill(&mut self, address: u64, data: &[u8]) -> bool {
    let end = address + data.len() as u64;
    let found = self
      .reqs
      .iter_mut()
      .find(|f| {
        f.req.address <= address && end <= f.req.end() && !f.req.has_range(address, data.len())
      })
      .map(|f| f.req.supply_at(address, data))
      .unwrap_or(false);
    if found {
      self.match_all();
    }
    found
  }

  /// Hand out DMA chunks for every producer still waiting to be fetched.
  pub fn pending_dma(&mut self, block: usize) -> Vec<(u64, usize)> {
    let mut chunks = Vec::new();
    for frag in self.reqs.iter_mut() {
      while let Some(chunk) = frag.req.next_chunk(block) {
        chunks.push(chunk);
      }
    }
    chunks
  }

  fn match_all(&mut self) {
    loop {
      // Empty fragments are complete on arrival.
      while self.reqs.front().is_some_and(|f| f.req.length == 0) {
        self.reqs.pop_front();
      }
      let Some(cur) = self.current.as_mut() else {
        return;
      };
      if cur.is_complete() {
        return;
      }
      let Some(front) = self.reqs.front_mut() else {
        return;
      };

      let want = cur.address + cur.acquired_len as u64;
      let avail_start = front.req.address;
      let avail_end = front.req.address + front.req.acquired_len as u64;
      if want < avail_start || want >= avail_end {
        return;
      }

      let n = (cur.end() - want).min(avail_end - want) as usize;
      let from = (want - avail_start) as usize;
      cur.accept(&front.req.buffer[from..from + n]);
      front.consumed = front.consumed.max(from + n);

      if front.consumed >= front.req.length {
        self.reqs.pop_front();
      }
    }
  }
}

/// A DMA read the timing side still has to issue for some tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaChunk {
  pub tag: u32,
  pub address: u64,
  pub len: usize,
}

/// Output produced by the functional side, waiting to be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBack {
  pub tag: u32,
  pub address: u64,
  pub data: Vec<u8>,
}

/// All matchers of a device, keyed by tag, plus the write-back queue.
#[derive(Debug, Default)]
pub struct RequestMap {
  matchers: HashMap<u32, Matcher>,
  writes: VecDeque<WriteBack>,
  next_id: u64,
}

impl RequestMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn setup(&mut self, tags: &[u32]) {
    for tag in tags {
      self.matchers.entry(*tag).or_default();
    }
  }

  pub fn clear(&mut self, tags: &[u32]) {
    for tag in tags {
      if let Some(m) = self.matchers.get_mut(tag) {
        m.clear();
      }
    }
  }

  pub fn reset(&mut self) {
    self.matchers.clear();
    self.writes.clear();
  }

  pub fn next_id(&mut self) -> u64 {
    self.next_id += 1;
    self.next_id
  }

  pub fn matcher(&self, tag: u32) -> Option<&Matcher> {
    self.matchers.get(&tag)
  }

  pub fn matcher_mut(&mut self, tag: u32) -> &mut Matcher {
    self.matchers.entry(tag).or_default()
  }

  pub fn register(&mut self, tag: u32, req: MemReq) {
    self.matcher_mut(tag).register(req);
  }

  pub fn produce(&mut self, tag: u32, req: MemReq) {
    self.matcher_mut(tag).produce(req);
  }

  pub fn consume(&mut self, tag: u32) -> Option<MemReq> {
    self.matchers.get_mut(&tag).and_then(Matcher::consume)
  }

  pub fn is_complete(&self, tag: u32) -> bool {
    self.matchers.get(&tag).is_some_and(Matcher::is_complete)
  }

  pub fn fill(&mut self, tag: u32, address: u64, data: &[u8]) -> bool {
    self
      .matchers
      .get_mut(&tag)
      .is_some_and(|m| m.fill(address, data))
  }

  /// Chunks of every ready producer, in tag order.
  pub fn pending_dma(&mut self, block: usize) -> Vec<DmaChunk> {
    let mut tags: Vec<u32> = self.matchers.keys().copied().collect();
    tags.sort_unstable();
    let mut chunks = Vec::new();
    for tag in tags {
      if let Some(m) = self.matchers.get_mut(&tag) {
        chunks.extend(
          m.pending_dma(block)
            .into_iter()
            .map(|(address, len)| DmaChunk { tag, address, len }),
        );
      }
    }
    chunks
  }

  pub fn push_write(&mut self, tag: u32, address: u64, data: Vec<u8>) {
    self.writes.push_back(WriteBack { tag, address, data });
  }

  pub fn take_writes(&mut self) -> Vec<WriteBack> {
    self.writes.drain(..).collect()
  }
}
