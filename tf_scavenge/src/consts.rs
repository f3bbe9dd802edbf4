//! Scavenge constants / 清理常量

/// Chunk executor workers upper bound / 块执行并发上限
pub const MAX_THREADS: usize = 4;
pub const MIN_THREADS: usize = 1;

pub const DEFAULT_CANCELLATION_CHECK_PERIOD: u32 = 1024;
/// Streams per calculator commit / 计算器每次提交的流数
pub const DEFAULT_CHECKPOINT_PERIOD: u32 = 32_768;
/// Index entries between throttle rests / 索引执行休息间隔
pub const DEFAULT_INDEX_REST_PERIOD: u32 = 8192;
pub const DEFAULT_THROTTLE_PERCENT: f64 = 100.0;
pub const DEFAULT_THRESHOLD: i32 = 0;

/// Events read from the index per slice / 每次从索引读取的事件数
pub const EVENT_SLICE: usize = 8192;
/// Metadata events checked for ordering / 元数据顺序检查的事件数
pub const METADATA_LOOKAHEAD: usize = 100;

/// Weight added per definitely discarded event / 确定丢弃事件增加的权重
pub const DISCARD_WEIGHT: f64 = 2.0;
/// Weight added per maybe discarded event / 可能丢弃事件增加的权重
pub const MAYBE_DISCARD_WEIGHT: f64 = 1.0;

/// Longest single throttle sleep, cancellation is checked between / 单次节流休眠上限
pub const THROTTLE_SLICE_MS: u64 = 50;

pub const SCAVENGE_POINTS_STREAM: &str = "$scavengePoints";
pub const SCAVENGE_POINT_EVENT_TYPE: &str = "$scavengePoint";

pub const METASTREAM_PREFIX: &str = "$$";

/// SQLite state file / 清理状态库文件名
pub const STATE_FILE: &str = "scavenging.db";
/// Busy timeout for worker connections / 工作连接忙等待
pub const BUSY_TIMEOUT_MS: u64 = 5000;
/// Streams cached per state worker before it starts over / 状态工作者缓存的流数上限
pub const WORKER_CACHE_MAX: usize = 65_536;
