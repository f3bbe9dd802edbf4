/// Default logical chunk size (256MB) / 默认块大小
pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024 * 1024;
/// Completed chunks kept in memory / 内存中保留的已完成块数
pub const DEFAULT_CACHED_CHUNKS: usize = 2;

pub const WRITER_CHK: &str = "writer.chk";
pub const CHASER_CHK: &str = "chaser.chk";
pub const EPOCH_CHK: &str = "epoch.chk";
pub const LOCK_FILE: &str = "db.lock";

pub const CHUNK_PREFIX: &str = "chunk-";
pub const TMP_EXT: &str = "tmp";
pub const SCAVENGE_TMP: &str = ".scavenge.tmp";

/// Wait for a replaced chunk's readers / 等待被替换块读取器归还
pub const DESTROY_WAIT_MS: u64 = 10_000;
