use metronome::arch::streamer::func_sim::transform;
use metronome::arch::streamer::regs::*;
use metronome::arch::streamer::{Streamer, VENDOR_ID};
use metronome::simulator::server::socket::{InterruptKind, LoopbackChannel, D2H, H2D};
use metronome::simulator::{DevCtrlFlags, Simulator};
use metronome::SimConfig;

const SRC: u64 = 0x1000;
const DST: u64 = 0x8000;
const LEN: usize = 600;
const KEY: u8 = 0x5a;

fn reg_write(ch: &mut LoopbackChannel, offset: u64, value: u64) {
  ch.inject(
    0,
    H2D::WritePosted {
      bar: 0,
      offset,
      data: value.to_le_bytes().to_vec(),
    },
  );
}

fn setup(devctrl: DevCtrlFlags, max_pending_dma: usize) -> Simulator<Streamer, LoopbackChannel> {
  let mut ch = LoopbackChannel::new(1_000).with_memory(0x10000);
  let memory = ch.memory_mut().unwrap();
  for i in 0..LEN {
    memory[SRC as usize + i] = (i * 7) as u8;
  }
  ch.inject(0, H2D::Devctrl { flags: devctrl.bits() });
  reg_write(&mut ch, REG_SRC, SRC);
  reg_write(&mut ch, REG_DST, DST);
  reg_write(&mut ch, REG_LEN, LEN as u64);
  reg_write(&mut ch, REG_KEY, KEY as u64);
  reg_write(&mut ch, REG_CTRL, CTRL_START);

  let config = SimConfig {
    quiet: true,
    max_pending_dma,
    ..Default::default()
  };
  Simulator::new(config, ch, Streamer::new()).unwrap()
}

fn run_until_done(sim: &mut Simulator<Streamer, LoopbackChannel>) {
  for _ in 0..10_000 {
    if sim.device().jobs_done() > 0 {
      return;
    }
    sim.step().unwrap();
  }
  panic!("streamer job did not finish by t={}", sim.main_time());
}

#[test]
fn test_streamer_transforms_buffer() {
  let mut sim = setup(DevCtrlFlags::MSI_EN, 2);
  assert_eq!(sim.channel().intro().map(|i| i.vendor_id), Some(VENDOR_ID));
  run_until_done(&mut sim);

  let memory = sim.channel().memory().unwrap();
  let src = &memory[SRC as usize..SRC as usize + LEN];
  let dst = &memory[DST as usize..DST as usize + LEN];
  assert_eq!(dst, transform(src, KEY).as_slice());

  assert_eq!(sim.device().regs().status, STATUS_DONE);
  assert!(sim.device().regs().elapsed > 0);
  assert!(sim.channel().sent().iter().any(|(_, m)| *m
    == D2H::Interrupt {
      kind: InterruptKind::Msi,
      vector: 0
    }));
  // Three input blocks and three write-backs.
  assert_eq!(sim.dma().totals(), (6, 6));
}

#[test]
fn test_streamer_reports_status_to_host() {
  let mut sim = setup(DevCtrlFlags::INTX_EN, 64);
  run_until_done(&mut sim);
  let now = sim.main_time();
  sim.channel_mut().take_sent();

  sim.channel_mut().inject(
    now,
    H2D::Read {
      req_id: 1,
      bar: 0,
      offset: REG_STATUS,
      len: 8,
    },
  );
  sim.channel_mut().inject(
    now,
    H2D::WritePosted {
      bar: 0,
      offset: REG_STATUS,
      data: STATUS_DONE.to_le_bytes().to_vec(),
    },
  );
  sim.step().unwrap();

  let sent = sim.channel().sent();
  assert!(sent.iter().any(|(_, m)| *m
    == D2H::ReadComp {
      req_id: 1,
      data: STATUS_DONE.to_le_bytes().to_vec()
    }));
  // Clearing DONE lowers the legacy interrupt line.
  assert!(sent.iter().any(|(_, m)| *m
    == D2H::Interrupt {
      kind: InterruptKind::LegacyLow,
      vector: 0
    }));
  assert_eq!(sim.device().regs().status, 0);
}

#[test]
fn test_bad_register_access_is_ignored() {
  let mut ch = LoopbackChannel::new(0);
  ch.inject(
    0,
    H2D::Read {
      req_id: 2,
      bar: 3,
      offset: 0,
      len: 4,
    },
  );
  ch.inject(
    0,
    H2D::Write {
      req_id: 3,
      bar: 0,
      offset: BAR0_LEN,
      data: vec![1; 4],
    },
  );
  let mut sim = Simulator::new(SimConfig::default(), ch, Streamer::new()).unwrap();
  sim.step().unwrap();
  let sent = sim.channel().sent();
  assert!(sent.iter().any(|(_, m)| *m
    == D2H::ReadComp {
      req_id: 2,
      data: vec![0; 4]
    }));
  assert!(sent.iter().any(|(_, m)| *m == D2H::WriteComp { req_id: 3 }));
  assert!(!sim.device().is_busy());
}

#[cfg(feature = "smoke-tests")]
mod smoke {
  use metronome::arch::streamer::{Streamer, DEVICE_ID};
  use metronome::simulator::server::socket::protocol::{FrameHeader, D2H, FRAME_HEADER_LEN, H2D, MSG_H2D_WRITE};
  use metronome::simulator::server::socket::{SyncState, UnixChannel};
  use metronome::simulator::{ChannelError, SimError, Simulator};
  use metronome::SimConfig;
  use std::io::{Read, Write};
  use std::os::unix::net::UnixStream;
  use std::thread;
  use std::time::Duration;

  fn read_frame(stream: &mut UnixStream) -> (FrameHeader, Vec<u8>) {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut hdr).unwrap();
    let header = FrameHeader::decode(&hdr).unwrap();
    let mut body = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body).unwrap();
    (header, body)
  }

  #[test]
  fn test_unix_socket_handshake_and_terminate() {
    let path = std::env::temp_dir().join(format!("metronome-smoke-{}.sock", std::process::id()));
    let channel = UnixChannel::bind(&path, SyncState::disabled(0), 4096).unwrap();

    let host_path = path.clone();
    let host = thread::spawn(move || {
      let mut stream = loop {
        match UnixStream::connect(&host_path) {
          Ok(s) => break s,
          Err(_) => thread::sleep(Duration::from_millis(10)),
        }
      };
      let (header, body) = read_frame(&mut stream);
      let intro = match D2H::decode(header.msg_type, &body).unwrap() {
        D2H::DevIntro(intro) => intro,
        other => panic!("expected intro, got {:?}", other),
      };
      stream.write_all(&H2D::HostIntro.encode(0)).unwrap();
      stream.write_all(&H2D::Terminate.encode(100)).unwrap();
      intro.device_id
    });

    let mut sim = Simulator::new(SimConfig::default(), channel, Streamer::new()).unwrap();
    sim.run().unwrap();
    assert_eq!(host.join().unwrap(), DEVICE_ID);
  }

  #[test]
  fn test_oversized_frame_before_intro_is_rejected() {
    let path = std::env::temp_dir().join(format!("metronome-big-{}.sock", std::process::id()));
    let channel = UnixChannel::bind(&path, SyncState::disabled(0), 4096).unwrap();

    let host_path = path.clone();
    let host = thread::spawn(move || {
      let mut stream = loop {
        match UnixStream::connect(&host_path) {
          Ok(s) => break s,
          Err(_) => thread::sleep(Duration::from_millis(10)),
        }
      };
      read_frame(&mut stream);
      let header = FrameHeader {
        msg_type: MSG_H2D_WRITE,
        body_len: u32::MAX,
        timestamp: 0,
      };
      stream.write_all(&header.encode()).unwrap();
    });

    let res = Simulator::new(SimConfig::default(), channel, Streamer::new());
    assert!(matches!(res, Err(SimError::Channel(ChannelError::Protocol(_)))));
    host.join().unwrap();
  }
}
