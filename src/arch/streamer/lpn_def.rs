use crate::lpn::{Net, PlaceId, PlaceSet, Token, Transition};

// Timing parameters (ps)
pub const COMPUTE_SLOTS: usize = 2;
pub const COMPUTE_BASE_PS: u64 = 2_000;
pub const COMPUTE_PS_PER_BYTE: u64 = 8;
pub const COMPUTE_ISSUE_PS: u64 = 1_000;
pub const RETIRE_PS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
  Slot,
  /// A block whose result is ready for write-back at `address`.
  Chunk { address: u64, len: usize },
}

impl Block {
  fn len(&self) -> usize {
    match self {
      Block::Slot => 0,
      Block::Chunk { len, .. } => *len,
    }
  }
}

/// fetched -> compute -> computed -> retire -> retired, with a bounded pool
/// of compute slots recycled by retire.
pub struct StreamerNet {
  pub net: Net<Block>,
  pub fetched: PlaceId,
  pub retired: PlaceId,
}

fn front_payload(place: PlaceId) -> impl FnMut(&PlaceSet<Block>) -> Vec<Block> {
  move |ps: &PlaceSet<Block>| ps[place].front().map(|t| t.payload.clone()).into_iter().collect()
}

pub fn compute_delay(len: usize) -> u64 {
  COMPUTE_BASE_PS + COMPUTE_PS_PER_BYTE * len as u64
}

pub fn build_net() -> StreamerNet {
  let mut b = Net::builder("streamer");
  let fetched = b.place("fetched");
  let slots = b.place_with_tokens("slots", vec![Token::new(0, Block::Slot); COMPUTE_SLOTS]);
  let computed = b.place("computed");
  let retired = b.place("retired");

  b.transition(
    Transition::new("compute", move |ps: &PlaceSet<Block>| {
      compute_delay(ps[fetched].front().map_or(0, |t| t.payload.len()))
    })
    .pipelined(COMPUTE_ISSUE_PS)
    .input(fetched, 1)
    .input(slots, 1)
    .output(computed, front_payload(fetched)),
  );
  b.transition(
    Transition::with_delay("retire", RETIRE_PS)
      .input(computed, 1)
      .output_const(slots, 1, Block::Slot)
      .output(retired, front_payload(computed)),
  );

  StreamerNet {
    net: b.build(),
    fetched,
    retired,
  }
}
