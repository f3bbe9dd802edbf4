//! Logical to physical position map of scavenged chunks
//! 已清理块的逻辑到物理位置映射

use crate::{
  consts::{POS_MAP_FULL, POS_MAP_LEGACY},
  error::{Error, Result},
};

/// Map entry encoding / 映射项编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosMapFormat {
  /// 8 bytes: `log_pos:u32 << 32 | actual_pos:u32`
  Legacy,
  /// 12 bytes: `log_pos:i64, actual_pos:i32`
  Full,
}

impl PosMapFormat {
  #[inline]
  pub const fn size(self) -> usize {
    match self {
      Self::Legacy => POS_MAP_LEGACY,
      Self::Full => POS_MAP_FULL,
    }
  }

  /// Read entry `index` of a packed table / 读取第 index 项
  #[inline]
  pub fn read(self, table: &[u8], index: usize) -> PosMap {
    let off = index * self.size();
    match self {
      Self::Legacy => {
        let mut b = [0u8; 8];
        b.copy_from_slice(&table[off..off + 8]);
        let v = u64::from_le_bytes(b);
        PosMap {
          log_pos: (v >> 32) as i64,
          actual_pos: (v & 0xFFFF_FFFF) as u32,
        }
      }
      Self::Full => {
        let mut l = [0u8; 8];
        l.copy_from_slice(&table[off..off + 8]);
        let mut a = [0u8; 4];
        a.copy_from_slice(&table[off + 8..off + 12]);
        PosMap {
          log_pos: i64::from_le_bytes(l),
          actual_pos: u32::from_le_bytes(a),
        }
      }
    }
  }
}

/// Chunk-local logical position and its physical offset
/// 块内逻辑位置与物理偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PosMap {
  pub log_pos: i64,
  pub actual_pos: u32,
}

impl PosMap {
  pub const fn new(log_pos: i64, actual_pos: u32) -> Self {
    Self {
      log_pos,
      actual_pos,
    }
  }

  pub fn write(&self, format: PosMapFormat, out: &mut Vec<u8>) {
    match format {
      PosMapFormat::Legacy => {
        let v = ((self.log_pos as u64) << 32) | self.actual_pos as u64;
        out.extend_from_slice(&v.to_le_bytes());
      }
      PosMapFormat::Full => {
        out.extend_from_slice(&self.log_pos.to_le_bytes());
        out.extend_from_slice(&self.actual_pos.to_le_bytes());
      }
    }
  }

  /// Encode a whole table / 编码整张表
  pub fn encode_all(maps: &[PosMap], format: PosMapFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(maps.len() * format.size());
    for m in maps {
      m.write(format, &mut out);
    }
    out
  }
}

/// Sampled pos map entry / 采样的映射项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Midpoint {
  pub index: usize,
  pub log_pos: i64,
}

/// Sample `2^depth` evenly spaced entries, always ending with the last one
/// 均匀采样 2^depth 项，最后一项总是包含
pub fn build_midpoints(
  table: &[u8],
  count: usize,
  format: PosMapFormat,
  depth: u32,
) -> Result<Vec<Midpoint>> {
  if depth > 31 {
    return Err(Error::MidpointsDepth(depth));
  }
  if count == 0 {
    return Ok(Vec::new());
  }

  let wanted = 1usize << depth;
  let segment = if count < wanted { 1 } else { count / wanted };

  let mut midpoints = Vec::with_capacity(count / segment + 2);
  let mut x = 0;
  while x < count - 1 {
    midpoints.push(Midpoint {
      index: x,
      log_pos: format.read(table, x).log_pos,
    });
    x += segment;
  }
  midpoints.push(Midpoint {
    index: count - 1,
    log_pos: format.read(table, count - 1).log_pos,
  });
  Ok(midpoints)
}

/// Index range of the pos map that may hold `pos`
/// 可能包含 pos 的映射项下标范围
pub fn locate_range(midpoints: &[Midpoint], pos: i64) -> (usize, usize) {
  let lower = lower_bound(midpoints, pos);
  let upper = upper_bound(midpoints, pos);
  (midpoints[lower].index, midpoints[upper].index)
}

/// Last midpoint with log_pos <= pos / 最后一个 <= pos 的中点
fn lower_bound(midpoints: &[Midpoint], pos: i64) -> usize {
  let (mut l, mut r) = (0, midpoints.len() - 1);
  while l < r {
    let m = l + (r - l).div_ceil(2);
    if midpoints[m].log_pos <= pos {
      l = m;
    } else {
      r = m - 1;
    }
  }
  l
}

/// First midpoint with log_pos >= pos / 第一个 >= pos 的中点
fn upper_bound(midpoints: &[Midpoint], pos: i64) -> usize {
  let (mut l, mut r) = (0, midpoints.len() - 1);
  while l < r {
    let m = l + (r - l) / 2;
    if midpoints[m].log_pos >= pos {
      r = m;
    } else {
      l = m + 1;
    }
  }
  l
}

/// Binary search for an exact logical position / 精确查找
pub fn find_exact(table: &[u8], count: usize, format: PosMapFormat, pos: i64) -> Option<u32> {
  let (mut low, mut high) = (0isize, count as isize - 1);
  while low <= high {
    let mid = low + (high - low) / 2;
    let v = format.read(table, mid as usize);
    if v.log_pos == pos {
      return Some(v.actual_pos);
    }
    if v.log_pos < pos {
      low = mid + 1;
    } else {
      high = mid - 1;
    }
  }
  None
}

/// Physical position of the first entry with log_pos >= pos, None when pos is past the last entry
/// 第一个 log_pos >= pos 的物理位置，超出末项返回 None
pub fn find_closest_forward(
  table: &[u8],
  count: usize,
  format: PosMapFormat,
  pos: i64,
) -> Option<u32> {
  if count == 0 {
    return None;
  }
  let mut res = format.read(table, count - 1);
  if pos > res.log_pos {
    return None;
  }
  let (mut low, mut high) = (0, count - 1);
  while low < high {
    let mid = low + (high - low) / 2;
    let v = format.read(table, mid);
    if v.log_pos < pos {
      low = mid + 1;
    } else {
      high = mid;
      res = v;
    }
  }
  Some(res.actual_pos)
}
