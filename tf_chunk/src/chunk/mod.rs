//! One chunk file of the transaction log
//! 事务日志的单个块文件

mod cache;
mod destroy;
mod open;
mod read;
mod write;

use std::{
  fmt,
  ops::Deref,
  path::{Path, PathBuf},
  sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use compio_fs::File;
use md5::Md5;
use parking_lot::{Mutex, RwLock};

pub use cache::BulkReader;
pub use read::RecordRead;
pub use write::Append;

use crate::{
  conf::ChunkConf,
  consts::HEADER_SIZE,
  error::{Error, Result},
  footer::ChunkFooter,
  handle::{Handle, Life, Pool},
  header::ChunkHeader,
  read_side::ReadSide,
};

/// Exclusive write state, gone once the chunk is completed
/// 独占写状态，完成后释放
pub(crate) struct Writer {
  file: File,
  /// Raw file offset of the next write / 下次写入的文件偏移
  pos: u64,
  md5: Md5,
  buf: Vec<u8>,
  /// Expected file length for raw copies / 原始复制的目标长度
  raw_len: Option<u64>,
}

/// Append-only chunk shared across readers and one writer
/// 追加写块，多读单写
pub struct Chunk {
  path: PathBuf,
  header: ChunkHeader,
  footer: RwLock<Option<ChunkFooter>>,
  conf: ChunkConf,
  read_only: AtomicBool,
  physical: AtomicU64,
  logical: AtomicU64,
  file_size: AtomicU64,
  writer: futures::lock::Mutex<Option<Writer>>,
  pool: Pool,
  read_side: ReadSide,
  cache: Mutex<Option<Bytes>>,
  cached: AtomicBool,
}

impl Chunk {
  fn build(
    path: PathBuf,
    header: ChunkHeader,
    footer: Option<ChunkFooter>,
    conf: ChunkConf,
    want_midpoints: bool,
  ) -> Self {
    let (physical, logical, read_only) = match &footer {
      Some(f) => (f.physical_data_size(), f.logical_data_size(), true),
      None => (0, 0, false),
    };
    Self {
      pool: Pool::new(conf.max_reader_count),
      read_side: ReadSide::new(header.is_scavenged(), want_midpoints),
      path,
      header,
      footer: RwLock::new(footer),
      conf,
      read_only: AtomicBool::new(read_only),
      physical: AtomicU64::new(physical),
      logical: AtomicU64::new(logical),
      file_size: AtomicU64::new(0),
      writer: futures::lock::Mutex::new(None),
      cache: Mutex::new(None),
      cached: AtomicBool::new(false),
    }
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn header(&self) -> &ChunkHeader {
    &self.header
  }

  #[inline]
  pub fn footer(&self) -> Option<ChunkFooter> {
    *self.footer.read()
  }

  #[inline]
  pub fn conf(&self) -> &ChunkConf {
    &self.conf
  }

  #[inline]
  pub fn read_side(&self) -> &ReadSide {
    &self.read_side
  }

  #[inline]
  pub fn is_read_only(&self) -> bool {
    self.read_only.load(Ordering::Acquire)
  }

  #[inline]
  pub fn is_scavenged(&self) -> bool {
    self.header.is_scavenged()
  }

  #[inline]
  pub fn is_cached(&self) -> bool {
    self.cached.load(Ordering::Acquire)
  }

  /// Bytes of record data written / 已写记录字节
  #[inline]
  pub fn physical_data_size(&self) -> u64 {
    self.physical.load(Ordering::Acquire)
  }

  /// Logical span covered / 覆盖的逻辑跨度
  #[inline]
  pub fn logical_data_size(&self) -> u64 {
    self.logical.load(Ordering::Acquire)
  }

  /// Local position of the next append / 下次追加的块内位置
  #[inline]
  pub fn write_position(&self) -> u64 {
    self.physical_data_size()
  }

  #[inline]
  pub fn file_size(&self) -> u64 {
    self.file_size.load(Ordering::Acquire)
  }

  #[inline]
  pub fn life(&self) -> Life {
    self.pool.life()
  }

  pub(crate) fn completed_footer(&self) -> Result<ChunkFooter> {
    self.footer().ok_or(Error::NotReadOnly)
  }

  pub(crate) fn set_sizes(&self, physical: u64, logical: u64) {
    self.physical.store(physical, Ordering::Release);
    self.logical.store(logical, Ordering::Release);
  }

  /// Raw file offset of the position map / 位置映射的文件偏移
  #[inline]
  pub(crate) fn map_offset(&self) -> u64 {
    HEADER_SIZE as u64 + self.physical_data_size()
  }

  pub(crate) async fn reader(&self) -> Result<Reader<'_>> {
    let handle = self.pool.acquire(&self.path, self.conf.retry_count).await?;
    Ok(Reader {
      chunk: self,
      handle: Some(handle),
    })
  }
}

impl fmt::Display for Chunk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "#{}-{} ({})",
      self.header.start(),
      self.header.end(),
      self
        .path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default()
    )
  }
}

impl fmt::Debug for Chunk {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(self, f)
  }
}

/// Pooled handle returned on drop / 借出句柄，析构时归还
pub(crate) struct Reader<'a> {
  chunk: &'a Chunk,
  handle: Option<Handle>,
}

impl Deref for Reader<'_> {
  type Target = Handle;

  fn deref(&self) -> &Handle {
    // present until drop
    self.handle.as_ref().unwrap_or_else(|| unreachable!())
  }
}

impl Drop for Reader<'_> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      let c = self.chunk;
      c.pool.release(handle, c.is_cached(), &c.cache, &c.path);
    }
  }
}
