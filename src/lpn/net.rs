use super::place::{Place, PlaceId, PlaceSet, Token};
use super::transition::{Transition, TransitionId};
use log::debug;
use std::collections::HashMap;

/// A latency Petri net: places, timed transitions and the clock that gates
/// late enablings.
pub struct Net<P> {
  name: String,
  places: PlaceSet<P>,
  transitions: Vec<Transition<P>>,
  conflict_free: Vec<bool>,
  clock: u64,
}

pub struct NetBuilder<P> {
  name: String,
  places: PlaceSet<P>,
  transitions: Vec<Transition<P>>,
}

impl<P: Clone + 'static> NetBuilder<P> {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      places: PlaceSet::new(),
      transitions: Vec::new(),
    }
  }

  pub fn place(&mut self, id: &str) -> PlaceId {
    self.places.add(Place::new(id))
  }

  pub fn place_with_tokens(&mut self, id: &str, tokens: Vec<Token<P>>) -> PlaceId {
    self.places.add(Place::with_tokens(id, tokens))
  }

  pub fn transition(&mut self, transition: Transition<P>) -> TransitionId {
    self.transitions.push(transition);
    TransitionId(self.transitions.len() - 1)
  }

  pub fn build(self) -> Net<P> {
    let conflict_free = detect_conflicts(&self.transitions);
    for (t, free) in self.transitions.iter().zip(&conflict_free) {
      if !free {
        debug!("{}: transition {} shares an output place", self.name, t.id());
      }
    }
    Net {
      name: self.name,
      places: self.places,
      transitions: self.transitions,
      conflict_free,
      clock: 0,
    }
  }
}

/// Transitions writing to a common output place are not conflict free.
fn detect_conflicts<P>(transitions: &[Transition<P>]) -> Vec<bool> {
  let mut writers: HashMap<PlaceId, Vec<usize>> = HashMap::new();
  for (idx, t) in transitions.iter().enumerate() {
    for place in t.output_places() {
      let list = writers.entry(place).or_default();
      if !list.contains(&idx) {
        list.push(idx);
      }
    }
  }

  let mut conflict_free = vec![true; transitions.len()];
  for list in writers.values().filter(|list| list.len() > 1) {
    for idx in list {
      conflict_free[*idx] = false;
    }
  }
  conflict_free
}

impl<P: Clone + 'static> Net<P> {
  pub fn builder(name: impl Into<String>) -> NetBuilder<P> {
    NetBuilder::new(name)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn places(&self) -> &PlaceSet<P> {
    &self.places
  }

  pub fn place(&self, id: PlaceId) -> &Place<P> {
    &self.places[id]
  }

  pub fn place_mut(&mut self, id: PlaceId) -> &mut Place<P> {
    &mut self.places[id]
  }

  pub fn push_token(&mut self, id: PlaceId, ts: u64, payload: P) {
    self.places[id].push(Token::new(ts, payload));
  }

  pub fn transition(&self, id: TransitionId) -> &Transition<P> {
    &self.transitions[id.0]
  }

  pub fn transition_mut(&mut self, id: TransitionId) -> &mut Transition<P> {
    &mut self.transitions[id.0]
  }

  pub fn is_conflict_free(&self, id: TransitionId) -> bool {
    self.conflict_free[id.0]
  }

  pub fn clock(&self) -> u64 {
    self.clock
  }

  /// Advance the net clock. Disabled transitions will not enable earlier
  /// than `now`, even if their input tokens are older.
  pub fn update_clock(&mut self, now: u64) {
    self.clock = self.clock.max(now);
    for t in self.transitions.iter_mut() {
      t.update_clock(self.clock);
    }
  }

  fn trigger_all(&mut self) {
    for t in self.transitions.iter_mut() {
      t.trigger(&self.places);
    }
  }

  /// Earliest maturation time over all pending transitions, after an enable
  /// pass. `None` when nothing is pending.
  pub fn next_commit_time(&mut self) -> Option<u64> {
    self.trigger_all();
    self.transitions.iter().filter_map(Transition::maturation_time).min()
  }

  /// Enable pass, then fire every transition matured at `time`, in
  /// declaration order. Returns how many fired.
  pub fn commit_at(&mut self, time: u64) -> usize {
    self.trigger_all();
    let mut fired = 0;
    for t in self.transitions.iter_mut() {
      if t.fire(time, &mut self.places) {
        fired += 1;
      }
    }
    fired
  }

  /// Restore the initial marking and forget all pending state.
  pub fn reset(&mut self) {
    for place in self.places.iter_mut() {
      place.reset();
    }
    for t in self.transitions.iter_mut() {
      t.reset();
    }
    self.clock = 0;
  }

  pub fn fire_counts(&self) -> Vec<(String, u64)> {
    self
      .transitions
      .iter()
      .map(|t| (t.id().to_string(), t.fire_count()))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  enum Tok {
    Unit,
    Job(u32),
  }

  #[test]
  fn test_delay_ten_at_hundred() {
    let mut b = Net::builder("single");
    let input = b.place("in");
    let out = b.place("out");
    b.transition(Transition::with_delay("t", 10).input(input, 1).output_const(out, 1, Tok::Unit));
    let mut net = b.build();

    net.push_token(input, 100, Tok::Unit);
    assert_eq!(net.next_commit_time(), Some(110));
    assert_eq!(net.commit_at(105), 0);
    assert_eq!(net.place(out).len(), 0);
    assert_eq!(net.commit_at(110), 1);
    assert_eq!(net.place(out).ts_at(0), Some(110));
    assert!(net.place(input).is_empty());
    assert_eq!(net.next_commit_time(), None);
  }

  #[test]
  fn test_pipelined_back_to_back() {
    let mut b = Net::builder("pipe");
    let input = b.place("in");
    let out = b.place("out");
    b.transition(
      Transition::with_delay("stage", 10)
        .pipelined(2)
        .input(input, 1)
        .output_const(out, 1, Tok::Unit),
    );
    let mut net = b.build();
    net.push_token(input, 0, Tok::Unit);
    net.push_token(input, 0, Tok::Unit);

    assert_eq!(net.next_commit_time(), Some(10));
    assert_eq!(net.commit_at(10), 1);
    // Second enabling starts at the pipeline offset, not at maturation.
    assert_eq!(net.next_commit_time(), Some(12));
  }

  #[test]
  fn test_unpipelined_waits_for_previous() {
    let mut b = Net::builder("serial");
    let input = b.place("in");
    let out = b.place("out");
    b.transition(Transition::with_delay("stage", 10).input(input, 1).output_const(out, 1, Tok::Unit));
    let mut net = b.build();
    net.push_token(input, 0, Tok::Unit);
    net.push_token(input, 0, Tok::Unit);
    assert_eq!(net.next_commit_time(), Some(10));
    net.commit_at(10);
    assert_eq!(net.next_commit_time(), Some(20));
  }

  #[test]
  fn test_guard_routes_on_content() {
    let mut b = Net::builder("route");
    let input = b.place("in");
    let small = b.place("small");
    let large = b.place("large");
    let is_small = |p: &Place<Tok>| matches!(p.front(), Some(Token { payload: Tok::Job(n), .. }) if *n < 100);
    let is_large = |p: &Place<Tok>| matches!(p.front(), Some(Token { payload: Tok::Job(n), .. }) if *n >= 100);
    b.transition(
      Transition::with_delay("to_small", 1)
        .input_guarded(input, 1, is_small)
        .output(small, |ps: &PlaceSet<Tok>| vec![ps.iter().next().and_then(|p| p.front()).map(|t| t.payload.clone()).unwrap_or(Tok::Unit)]),
    );
    b.transition(Transition::with_delay("to_large", 1).input_guarded(input, 1, is_large).output_const(large, 1, Tok::Unit));
    let mut net = b.build();

    net.push_token(input, 0, Tok::Job(500));
    assert_eq!(net.next_commit_time(), Some(1));
    net.commit_at(1);
    assert_eq!(net.place(large).len(), 1);
    assert_eq!(net.place(small).len(), 0);

    net.push_token(input, 1, Tok::Job(7));
    net.commit_at(2);
    assert_eq!(net.place(small).front().map(|t| t.payload.clone()), Some(Tok::Job(7)));
  }

  #[test]
  fn test_threshold_and_inhibitor() {
    let mut b = Net::builder("gate");
    let input = b.place("in");
    let block = b.place("block");
    let out = b.place("out");
    b.transition(
      Transition::with_delay("t", 0)
        .input_threshold(input, 1, 3)
        .inhibitor(block)
        .output_const(out, 1, Tok::Unit),
    );
    let mut net = b.build();
    net.push_token(input, 0, Tok::Unit);
    net.push_token(input, 4, Tok::Unit);
    assert_eq!(net.next_commit_time(), None);

    net.push_token(input, 6, Tok::Unit);
    net.push_token(block, 0, Tok::Unit);
    assert_eq!(net.next_commit_time(), None);

    net.place_mut(block).pop();
    // Enabled by the third token, consumes only one.
    assert_eq!(net.next_commit_time(), Some(6));
    assert_eq!(net.commit_at(6), 1);
    assert_eq!(net.place(input).len(), 2);
  }

  #[test]
  fn test_update_clock_delays_late_enabling() {
    let mut b = Net::builder("late");
    let input = b.place("in");
    let out = b.place("out");
    b.transition(Transition::with_delay("t", 5).input(input, 1).output_const(out, 1, Tok::Unit));
    let mut net = b.build();

    net.update_clock(50);
    net.push_token(input, 10, Tok::Unit);
    assert_eq!(net.next_commit_time(), Some(55));
  }

  #[test]
  fn test_reset_and_counts() {
    let mut b = Net::builder("reset");
    let src = b.place_with_tokens("src", vec![Token::new(0, Tok::Unit); 2]);
    let dst = b.place("dst");
    let t = b.transition(Transition::with_delay("mv", 1).input(src, 1).output_const(dst, 1, Tok::Unit));
    let mut net = b.build();

    net.next_commit_time();
    net.commit_at(1);
    net.next_commit_time();
    net.commit_at(2);
    assert_eq!(net.place(dst).len(), 2);
    assert_eq!(net.transition(t).fire_count(), 2);
    assert_eq!(net.fire_counts(), vec![("mv".to_string(), 2)]);

    net.reset();
    assert_eq!(net.place(src).len(), 2);
    assert_eq!(net.place(dst).len(), 0);
    assert_eq!(net.transition(t).fire_count(), 0);
  }

  #[test]
  fn test_conflict_detection() {
    let mut b: NetBuilder<Tok> = Net::builder("conflict");
    let a = b.place("a");
    let c = b.place("c");
    let shared = b.place("shared");
    let t1 = b.transition(Transition::with_delay("t1", 1).input(a, 1).output_const(shared, 1, Tok::Unit));
    let t2 = b.transition(Transition::with_delay("t2", 1).input(c, 1).output_const(shared, 1, Tok::Unit));
    let t3 = b.transition(Transition::with_delay("t3", 1).input(shared, 1).output_const(a, 1, Tok::Unit));
    let net = b.build();
    assert!(!net.is_conflict_free(t1));
    assert!(!net.is_conflict_free(t2));
    assert!(net.is_conflict_free(t3));
  }

  #[test]
  #[should_panic(expected = "out of tokens")]
  fn test_stolen_tokens_panic() {
    let mut b = Net::builder("steal");
    let input = b.place("in");
    let out = b.place("out");
    b.transition(Transition::with_delay("t", 10).input(input, 1).output_const(out, 1, Tok::Unit));
    let mut net = b.build();
    net.push_token(input, 0, Tok::Unit);
    net.next_commit_time();
    net.place_mut(input).pop();
    net.commit_at(10);
  }
}
