//! Chunk constants / 块常量

use std::time::Duration;

/// Header size / 头大小
pub const HEADER_SIZE: usize = 128;
/// Footer size / 尾大小
pub const FOOTER_SIZE: usize = 128;
/// MD5 checksum size / 校验和大小
pub const CHECKSUM_SIZE: usize = 16;

/// Chunk files are padded to this boundary / 块文件对齐边界
pub const ALIGN: u64 = 4096;

pub const VERSION_UNALIGNED: u8 = 2;
pub const VERSION_ALIGNED: u8 = 3;
pub const CURRENT_VERSION: u8 = VERSION_ALIGNED;
pub const MIN_COMPAT_VERSION: u8 = VERSION_UNALIGNED;

/// Position map entry sizes / 位置映射项大小
pub const POS_MAP_FULL: usize = 12;
pub const POS_MAP_LEGACY: usize = 8;

/// Length prefix + suffix / 长度前缀 + 后缀
pub const FRAME_OVERHEAD: u64 = 8;
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

pub const DEFAULT_READER_COUNT: usize = 2;
pub const DEFAULT_MAX_READER_COUNT: usize = 16;
pub const DEFAULT_MIDPOINTS_DEPTH: u32 = 10;
pub const DEFAULT_RETRY_COUNT: usize = 64;
/// Wait between reader acquire attempts / 获取读取器的重试间隔
pub const ACQUIRE_WAIT: Duration = Duration::from_millis(1);

/// Sequential read block for hashing and caching / 顺序读块大小
pub const READ_BLOCK: usize = 64 * 1024;

/// Round up to `ALIGN` / 向上对齐
#[inline]
pub const fn aligned_size(size: u64) -> u64 {
  size.div_ceil(ALIGN) * ALIGN
}
