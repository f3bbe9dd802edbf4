//! Chunk configuration / 块配置

use crate::consts::{
  DEFAULT_MAX_READER_COUNT, DEFAULT_MIDPOINTS_DEPTH, DEFAULT_READER_COUNT, DEFAULT_RETRY_COUNT,
};

/// Chunk configuration options / 块配置选项
#[derive(Debug, Clone, Copy)]
pub enum Conf {
  /// File readers opened up front / 预先打开的文件读取器数
  ReaderCount(usize),
  /// Upper bound of file readers / 文件读取器上限
  MaxReaderCount(usize),
  /// Midpoint sampling depth, at most 31 / 中点采样深度
  MidpointsDepth(u32),
  /// Bounded retries when the reader pool is drained / 读取器池耗尽时重试次数
  RetryCount(usize),
}

/// Parsed config / 解析后的配置
#[derive(Debug, Clone, Copy)]
pub struct ChunkConf {
  pub reader_count: usize,
  pub max_reader_count: usize,
  pub midpoints_depth: u32,
  pub retry_count: usize,
}

impl Default for ChunkConf {
  fn default() -> Self {
    Self {
      reader_count: DEFAULT_READER_COUNT,
      max_reader_count: DEFAULT_MAX_READER_COUNT,
      midpoints_depth: DEFAULT_MIDPOINTS_DEPTH,
      retry_count: DEFAULT_RETRY_COUNT,
    }
  }
}

impl ChunkConf {
  pub fn parse(conf: &[Conf]) -> Self {
    let mut c = Self::default();
    for i in conf {
      match *i {
        Conf::ReaderCount(v) => c.reader_count = v.max(1),
        Conf::MaxReaderCount(v) => c.max_reader_count = v.max(1),
        Conf::MidpointsDepth(v) => c.midpoints_depth = v,
        Conf::RetryCount(v) => c.retry_count = v.max(1),
      }
    }
    if c.reader_count > c.max_reader_count {
      c.reader_count = c.max_reader_count;
    }
    c
  }
}
