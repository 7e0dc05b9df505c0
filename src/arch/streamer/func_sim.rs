use crate::lpn::{AuxPort, HandshakeError};

pub const TAG_IN: u32 = 0;
pub const TAG_OUT: u32 = 1;
/// Granularity of the functional model and of the timing tokens.
pub const BLOCK_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
  pub src: u64,
  pub dst: u64,
  pub len: usize,
  pub key: u8,
}

impl Job {
  /// `(offset, len)` of every block, in address order.
  pub fn blocks(&self) -> impl Iterator<Item = (usize, usize)> {
    let len = self.len;
    (0..len).step_by(BLOCK_SIZE).map(move |off| (off, BLOCK_SIZE.min(len - off)))
  }

  pub fn block_count(&self) -> usize {
    self.len.div_ceil(BLOCK_SIZE)
  }
}

pub fn transform(data: &[u8], key: u8) -> Vec<u8> {
  data.iter().map(|b| b ^ key).collect()
}

/// Functional side of a job: announce every input block, then wait for each
/// in turn and hand the transformed bytes back for write-back.
pub fn run(port: &mut AuxPort, job: Job) -> Result<usize, HandshakeError> {
  for (off, len) in job.blocks() {
    port.prefetch(TAG_IN, job.src + off as u64, len);
  }

  let mut done = 0;
  for (off, len) in job.blocks() {
    let data = port.get_data(TAG_IN, job.src + off as u64, len)?;
    port.put_data(TAG_OUT, job.dst + off as u64, transform(&data, job.key));
    done += len;
  }
  Ok(done)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_blocks_cover_length() {
    let job = Job {
      src: 0,
      dst: 0,
      len: 600,
      key: 0,
    };
    let blocks: Vec<_> = job.blocks().collect();
    assert_eq!(blocks, vec![(0, 256), (256, 256), (512, 88)]);
    assert_eq!(job.block_count(), 3);
  }

  #[test]
  fn test_transform_is_involution() {
    let data = vec![0x00, 0x5a, 0xff];
    assert_eq!(transform(&transform(&data, 0x3c), 0x3c), data);
  }
}
