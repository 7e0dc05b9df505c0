use std::collections::VecDeque;
use std::ops::{Index, IndexMut};

/// A token: the time it became available plus a device-defined payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<P> {
  pub ts: u64,
  pub payload: P,
}

impl<P> Token<P> {
  pub fn new(ts: u64, payload: P) -> Self {
    Self { ts, payload }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceId(pub(crate) usize);

impl PlaceId {
  pub fn index(self) -> usize {
    self.0
  }
}

/// FIFO of tokens. The initial marking is kept for `reset`.
#[derive(Debug, Clone)]
pub struct Place<P> {
  id: String,
  tokens: VecDeque<Token<P>>,
  init: Vec<Token<P>>,
}

impl<P> Place<P> {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      tokens: VecDeque::new(),
      init: Vec::new(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn push(&mut self, token: Token<P>) {
    self.tokens.push_back(token);
  }

  pub fn pop(&mut self) -> Option<Token<P>> {
    self.tokens.pop_front()
  }

  pub fn front(&self) -> Option<&Token<P>> {
    self.tokens.front()
  }

  pub fn get(&self, index: usize) -> Option<&Token<P>> {
    self.tokens.get(index)
  }

  /// Availability time of the token at `index`.
  pub fn ts_at(&self, index: usize) -> Option<u64> {
    self.tokens.get(index).map(|t| t.ts)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Token<P>> {
    self.tokens.iter()
  }

  pub fn len(&self) -> usize {
    self.tokens.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tokens.is_empty()
  }
}

impl<P: Clone> Place<P> {
  pub fn with_tokens(id: impl Into<String>, tokens: Vec<Token<P>>) -> Self {
    Self {
      id: id.into(),
      tokens: tokens.iter().cloned().collect(),
      init: tokens,
    }
  }

  pub fn reset(&mut self) {
    self.tokens = self.init.iter().cloned().collect();
  }

  /// Make the current marking the one `reset` restores.
  pub fn copy_to_init(&mut self) {
    self.init = self.tokens.iter().cloned().collect();
  }
}

/// All places of one net, addressed by `PlaceId`.
#[derive(Debug, Clone)]
pub struct PlaceSet<P> {
  places: Vec<Place<P>>,
}

impl<P> PlaceSet<P> {
  pub fn new() -> Self {
    Self { places: Vec::new() }
  }

  pub fn add(&mut self, place: Place<P>) -> PlaceId {
    self.places.push(place);
    PlaceId(self.places.len() - 1)
  }

  pub fn find(&self, id: &str) -> Option<PlaceId> {
    self.places.iter().position(|p| p.id == id).map(PlaceId)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Place<P>> {
    self.places.iter()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Place<P>> {
    self.places.iter_mut()
  }

  pub fn len(&self) -> usize {
    self.places.len()
  }

  pub fn is_empty(&self) -> bool {
    self.places.is_empty()
  }

  pub fn total_tokens(&self) -> usize {
    self.places.iter().map(Place::len).sum()
  }
}

impl<P> Default for PlaceSet<P> {
  fn default() -> Self {
    Self::new()
  }
}

impl<P> Index<PlaceId> for PlaceSet<P> {
  type Output = Place<P>;

  fn index(&self, id: PlaceId) -> &Place<P> {
    &self.places[id.0]
  }
}

impl<P> IndexMut<PlaceId> for PlaceSet<P> {
  fn index_mut(&mut self, id: PlaceId) -> &mut Place<P> {
    &mut self.places[id.0]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fifo_and_reset() {
    let mut place = Place::with_tokens("p", vec![Token::new(0, 'a')]);
    place.push(Token::new(5, 'b'));
    assert_eq!(place.len(), 2);
    assert_eq!(place.ts_at(1), Some(5));
    assert_eq!(place.pop().map(|t| t.payload), Some('a'));
    place.reset();
    assert_eq!(place.len(), 1);
    assert_eq!(place.front().map(|t| t.payload), Some('a'));

    place.push(Token::new(9, 'c'));
    place.copy_to_init();
    place.pop();
    place.reset();
    assert_eq!(place.len(), 2);
  }

  #[test]
  fn test_place_set_lookup() {
    let mut set: PlaceSet<u8> = PlaceSet::new();
    let a = set.add(Place::new("a"));
    let b = set.add(Place::new("b"));
    set[b].push(Token::new(1, 7));
    assert_eq!(set.find("b"), Some(b));
    assert_eq!(set.find("zz"), None);
    assert!(set[a].is_empty());
    assert_eq!(set.total_tokens(), 1);
  }
}
