use uuid::Uuid;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, byteorder::little_endian::U32};

use crate::consts::{CURRENT_VERSION, HEADER_SIZE, MIN_COMPAT_VERSION};

/// Chunk header (128B), written once and never mutated
/// 块头（128字节），只写一次
///
/// | Field       | Offset | Size | Description                          |
/// |-------------|--------|------|--------------------------------------|
/// | version     | 0      | 1    | Chunk version / 版本                  |
/// | min_compat  | 1      | 1    | Minimum compatible version / 最低兼容 |
/// | chunk_size  | 2      | 4    | Nominal data size / 标称数据大小       |
/// | start       | 6      | 4    | First logical chunk number / 起始块号 |
/// | end         | 10     | 4    | Last logical chunk number / 结束块号  |
/// | scavenged   | 14     | 1    | Scavenged flag / 已清理标志           |
/// | id          | 15     | 16   | Chunk UUID / 块标识                   |
/// | transform   | 31     | 1    | Data transform type / 数据变换类型    |
/// | reserved    | 32     | 96   | Zero / 保留                          |
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ChunkHeader {
  version: u8,
  min_compat: u8,
  chunk_size: U32,
  start: U32,
  end: U32,
  scavenged: u8,
  id: [u8; 16],
  transform: u8,
  reserved: [u8; 96],
}

const _: () = assert!(size_of::<ChunkHeader>() == HEADER_SIZE);

/// Identity transform / 无变换
pub const TRANSFORM_IDENTITY: u8 = 0;

impl ChunkHeader {
  pub fn new(chunk_size: u32, start: u32, end: u32, scavenged: bool, id: Uuid) -> Self {
    Self::with_version(CURRENT_VERSION, chunk_size, start, end, scavenged, id)
  }

  pub fn with_version(
    version: u8,
    chunk_size: u32,
    start: u32,
    end: u32,
    scavenged: bool,
    id: Uuid,
  ) -> Self {
    Self {
      version,
      min_compat: MIN_COMPAT_VERSION,
      chunk_size: chunk_size.into(),
      start: start.into(),
      end: end.into(),
      scavenged: scavenged as u8,
      id: id.into_bytes(),
      transform: TRANSFORM_IDENTITY,
      reserved: [0; 96],
    }
  }

  /// Decode from bytes, None if too short / 解码，长度不足返回 None
  pub fn decode(bytes: &[u8]) -> Option<Self> {
    Self::read_from_bytes(bytes.get(..HEADER_SIZE)?).ok()
  }

  #[inline]
  pub fn version(&self) -> u8 {
    self.version
  }

  #[inline]
  pub fn min_compat(&self) -> u8 {
    self.min_compat
  }

  #[inline]
  pub fn chunk_size(&self) -> u32 {
    self.chunk_size.get()
  }

  #[inline]
  pub fn start(&self) -> u32 {
    self.start.get()
  }

  #[inline]
  pub fn end(&self) -> u32 {
    self.end.get()
  }

  #[inline]
  pub fn is_scavenged(&self) -> bool {
    self.scavenged != 0
  }

  #[inline]
  pub fn id(&self) -> Uuid {
    Uuid::from_bytes(self.id)
  }

  #[inline]
  pub fn transform(&self) -> u8 {
    self.transform
  }

  /// Global log position where this chunk starts / 块起始全局位置
  #[inline]
  pub fn start_position(&self) -> i64 {
    self.start() as i64 * self.chunk_size() as i64
  }

  /// Global log position right after this chunk / 块结束全局位置
  #[inline]
  pub fn end_position(&self) -> i64 {
    (self.end() as i64 + 1) * self.chunk_size() as i64
  }

  /// Global to chunk-local position / 全局位置转块内位置
  #[inline]
  pub fn local_position(&self, log_position: i64) -> i64 {
    log_position - self.start_position()
  }

  #[inline]
  pub fn contains(&self, log_position: i64) -> bool {
    log_position >= self.start_position() && log_position < self.end_position()
  }
}
