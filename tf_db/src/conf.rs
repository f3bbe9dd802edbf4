//! Database configuration / 数据库配置

use tf_chunk::ChunkConf;

use crate::consts::{DEFAULT_CACHED_CHUNKS, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Clone, Copy)]
pub enum Conf {
  ChunkSize(u32),
  /// Newest completed chunks cached in memory / 缓存在内存中的最新已完成块数
  CachedChunks(usize),
  /// Verify completed chunk hashes at open / 打开时校验已完成块哈希
  VerifyHash(bool),
  ReadOnly(bool),
  /// Create the next chunk when the writer sits on a boundary / 写入位置在边界时新建块
  CreateNewChunks(bool),
  Chunk(tf_chunk::Conf),
}

#[derive(Debug, Clone)]
pub struct DbConf {
  pub chunk_size: u32,
  pub cached_chunks: usize,
  pub verify_hash: bool,
  pub read_only: bool,
  pub create_new_chunks: bool,
  pub chunk: ChunkConf,
}

impl Default for DbConf {
  fn default() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      cached_chunks: DEFAULT_CACHED_CHUNKS,
      verify_hash: false,
      read_only: false,
      create_new_chunks: true,
      chunk: ChunkConf::default(),
    }
  }
}

impl DbConf {
  pub fn parse(conf: &[Conf]) -> Self {
    let mut c = Self::default();
    let mut chunk = Vec::new();
    for i in conf {
      match *i {
        Conf::ChunkSize(v) => c.chunk_size = v.max(1),
        Conf::CachedChunks(v) => c.cached_chunks = v,
        Conf::VerifyHash(v) => c.verify_hash = v,
        Conf::ReadOnly(v) => c.read_only = v,
        Conf::CreateNewChunks(v) => c.create_new_chunks = v,
        Conf::Chunk(v) => chunk.push(v),
      }
    }
    c.chunk = ChunkConf::parse(&chunk);
    c
  }
}
