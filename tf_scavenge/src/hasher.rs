//! Stream name hashing / 流名哈希

pub trait StreamHasher {
  fn hash(&self, stream: &str) -> u64;
}

/// crc32 of the name in the low half, crc32 of the reversed name in the high half
/// 低 32 位为名称 crc32，高 32 位为反转名称 crc32
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Hasher;

impl StreamHasher for Crc32Hasher {
  fn hash(&self, stream: &str) -> u64 {
    let low = crc32fast::hash(stream.as_bytes());
    let mut h = crc32fast::Hasher::new();
    for b in stream.bytes().rev() {
      h.update(&[b]);
    }
    ((h.finalize() as u64) << 32) | low as u64
  }
}
