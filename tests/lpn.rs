use metronome::lpn::handshake::{self, AuxState};
use metronome::lpn::{Matcher, MemReq, Net, RequestMap, Token, Transition};
use std::sync::{Arc, Mutex};

#[test]
fn test_matcher_tag5_two_fragments() {
  let payload: Vec<u8> = (0..64).collect();
  let mut m = Matcher::new();
  m.register(MemReq::consumer(1, 5, 1000, 64));
  m.produce(MemReq::filled(2, 5, 1000, payload[..32].to_vec()));
  assert!(!m.is_complete());
  m.produce(MemReq::filled(3, 5, 1032, payload[32..].to_vec()));
  assert!(m.is_complete());

  let req = m.consume().unwrap();
  assert_eq!(req.tag, 5);
  assert_eq!(req.acquired_len(), req.length);
  assert_eq!(req.into_data(), payload);
  assert!(!m.is_complete());
}

#[test]
fn test_matcher_produce_before_register() {
  let payload = vec![0xee; 48];
  let mut m = Matcher::new();
  m.produce(MemReq::filled(1, 5, 1000, payload[..16].to_vec()));
  m.produce(MemReq::filled(2, 5, 1016, payload[16..].to_vec()));
  m.register(MemReq::consumer(3, 5, 1000, 48));
  assert!(m.is_complete());
  assert_eq!(m.fragments(), 0);
}

#[test]
fn test_acquired_len_is_monotonic() {
  let mut map = RequestMap::new();
  map.setup(&[1]);
  map.produce(1, MemReq::producer(10, 1, 0, 96));
  map.register(1, MemReq::consumer(11, 1, 0, 96));
  let chunks = map.pending_dma(32);
  assert_eq!(chunks.len(), 3);

  let mut last = 0;
  for chunk in chunks.iter().rev() {
    map.fill(1, chunk.address, &vec![1; chunk.len]);
    let acquired = map.matcher(1).and_then(|m| m.current()).map_or(0, MemReq::acquired_len);
    assert!(acquired >= last);
    last = acquired;
  }
  assert!(map.is_complete(1));
}

#[test]
fn test_same_memory_read_twice_fills_both_fragments() {
  let mut map = RequestMap::new();
  map.setup(&[1]);
  map.produce(1, MemReq::producer(1, 1, 0, 8));
  map.produce(1, MemReq::producer(2, 1, 0, 8));
  assert_eq!(map.pending_dma(8).len(), 2);

  assert!(map.fill(1, 0, &[1; 8]));
  assert!(map.fill(1, 0, &[2; 8]));
  // Both fragments hold their bytes now; a third copy has nowhere to go.
  assert!(!map.fill(1, 0, &[3; 8]));

  map.register(1, MemReq::consumer(3, 1, 0, 8));
  assert!(map.is_complete(1));
  assert_eq!(map.consume(1).unwrap().into_data(), vec![1; 8]);

  map.register(1, MemReq::consumer(4, 1, 0, 8));
  assert!(map.is_complete(1));
  assert_eq!(map.consume(1).unwrap().into_data(), vec![2; 8]);
}

#[test]
fn test_net_time_is_monotonic_and_tokens_conserved() {
  let mut b = Net::builder("ring");
  let a = b.place_with_tokens("a", vec![Token::new(0, ()); 3]);
  let c = b.place("c");
  b.transition(Transition::with_delay("fwd", 7).input(a, 1).output_const(c, 1, ()));
  b.transition(Transition::with_delay("back", 3).input(c, 1).output_const(a, 1, ()));
  let mut net = b.build();

  let mut now = 0;
  for _ in 0..20 {
    let next = net.next_commit_time().unwrap();
    assert!(next >= now);
    now = next;
    assert!(net.commit_at(now) >= 1);
    assert_eq!(net.places().total_tokens(), 3);
    for place in net.places().iter() {
      assert!(place.iter().all(|t| t.ts <= now));
    }
  }
}

#[test]
fn test_delay_ten_scenario() {
  let mut b = Net::builder("delay");
  let input = b.place("in");
  let out = b.place("out");
  b.transition(Transition::with_delay("t", 10).input(input, 1).output_const(out, 1, 0u32));
  let mut net = b.build();
  net.push_token(input, 100, 0);
  assert_eq!(net.next_commit_time(), Some(110));
  net.commit_at(110);
  assert_eq!(net.place(out).ts_at(0), Some(110));
}

#[test]
fn test_handshake_ping_pong() {
  let map = Arc::new(Mutex::new(RequestMap::new()));
  let mut aux = handshake::spawn("pingpong", Arc::clone(&map), |port| {
    let mut sum = 0u32;
    for i in 0..3u64 {
      port.prefetch(7, i * 4, 4);
      let data = port.get_data(7, i * 4, 4)?;
      sum += data.iter().map(|b| *b as u32).sum::<u32>();
    }
    Ok(sum)
  })
  .unwrap();

  for i in 0..3u64 {
    assert_eq!(aux.resume().unwrap(), AuxState::Blocked);
    let chunks = aux.map().pending_dma(64);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].address, i * 4);
    assert!(aux.map().fill(7, i * 4, &[1, 1, 1, 1]));
  }
  assert_eq!(aux.resume().unwrap(), AuxState::Finished);
  assert!(aux.is_finished());
  assert_eq!(aux.join().unwrap().unwrap(), 12);
}
