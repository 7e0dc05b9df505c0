use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A scheduled wake-up for the device model. Time is in picoseconds.
///
/// Events order by `(time, priority)`, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimedEvent {
  pub time: u64,
  pub priority: i32,
}

impl TimedEvent {
  pub fn new(time: u64, priority: i32) -> Self {
    Self { time, priority }
  }
}

impl Ord for TimedEvent {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .time
      .cmp(&other.time)
      .then(self.priority.cmp(&other.priority))
  }
}

impl PartialOrd for TimedEvent {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Min-heap of pending events. Equal keys pop in insertion order.
#[derive(Debug, Default)]
pub struct EventQueue {
  heap: BinaryHeap<Reverse<(TimedEvent, u64)>>,
  seq: u64,
}

impl EventQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert an event. Duplicates are allowed.
  pub fn schedule(&mut self, evt: TimedEvent) {
    self.heap.push(Reverse((evt, self.seq)));
    self.seq += 1;
  }

  pub fn peek(&self) -> Option<&TimedEvent> {
    self.heap.peek().map(|Reverse((evt, _))| evt)
  }

  pub fn next_deadline(&self) -> Option<u64> {
    self.peek().map(|evt| evt.time)
  }

  /// Pop the earliest event if it is due at `now`.
  pub fn pop_due(&mut self, now: u64) -> Option<TimedEvent> {
    match self.peek() {
      Some(evt) if evt.time <= now => self.heap.pop().map(|Reverse((evt, _))| evt),
      _ => None,
    }
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }
}
