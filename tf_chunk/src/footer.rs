use zerocopy::{
  FromBytes, Immutable, IntoBytes, KnownLayout,
  byteorder::little_endian::{U32, U64},
};

use crate::{
  consts::{CHECKSUM_SIZE, FOOTER_SIZE},
  pos_map::PosMapFormat,
};

/// Chunk footer (128B), written once on completion
/// 块尾（128字节），完成时写入
///
/// | Field      | Offset | Size | Description                         |
/// |------------|--------|------|-------------------------------------|
/// | completed  | 0      | 1    | Completed flag / 完成标志            |
/// | map12      | 1      | 1    | 12-byte pos map entries / 12字节映射 |
/// | physical   | 2      | 4    | Physical data size / 物理数据大小    |
/// | logical    | 6      | 8    | Logical data size / 逻辑数据大小     |
/// | map_size   | 14     | 4    | Pos map bytes / 位置映射字节数       |
/// | reserved   | 18     | 94   | Zero / 保留                         |
/// | checksum   | 112    | 16   | MD5 of everything before / MD5 校验 |
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ChunkFooter {
  completed: u8,
  map12: u8,
  physical: U32,
  logical: U64,
  map_size: U32,
  reserved: [u8; 94],
  checksum: [u8; CHECKSUM_SIZE],
}

const _: () = assert!(size_of::<ChunkFooter>() == FOOTER_SIZE);

impl ChunkFooter {
  pub fn new(
    format: PosMapFormat,
    physical: u32,
    logical: u64,
    map_size: u32,
    checksum: [u8; CHECKSUM_SIZE],
  ) -> Self {
    Self {
      completed: 1,
      map12: matches!(format, PosMapFormat::Full) as u8,
      physical: physical.into(),
      logical: logical.into(),
      map_size: map_size.into(),
      reserved: [0; 94],
      checksum,
    }
  }

  pub fn decode(bytes: &[u8]) -> Option<Self> {
    Self::read_from_bytes(bytes.get(..FOOTER_SIZE)?).ok()
  }

  #[inline]
  pub fn is_completed(&self) -> bool {
    self.completed != 0
  }

  #[inline]
  pub fn format(&self) -> PosMapFormat {
    if self.map12 != 0 {
      PosMapFormat::Full
    } else {
      PosMapFormat::Legacy
    }
  }

  #[inline]
  pub fn physical_data_size(&self) -> u64 {
    self.physical.get() as u64
  }

  #[inline]
  pub fn logical_data_size(&self) -> u64 {
    self.logical.get()
  }

  #[inline]
  pub fn map_size(&self) -> u64 {
    self.map_size.get() as u64
  }

  #[inline]
  pub fn map_count(&self) -> usize {
    self.map_size() as usize / self.format().size()
  }

  #[inline]
  pub fn checksum(&self) -> &[u8; CHECKSUM_SIZE] {
    &self.checksum
  }

  /// Bytes covered by the checksum / 参与校验的字节
  #[inline]
  pub fn hashed_bytes(&self) -> &[u8] {
    &self.as_bytes()[..FOOTER_SIZE - CHECKSUM_SIZE]
  }

  pub(crate) fn with_checksum(mut self, checksum: [u8; CHECKSUM_SIZE]) -> Self {
    self.checksum = checksum;
    self
  }
}
