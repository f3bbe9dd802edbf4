//! Scavenge configuration / 清理配置

use std::time::Duration;

use log::warn;

use crate::consts::{
  DEFAULT_CANCELLATION_CHECK_PERIOD, DEFAULT_CHECKPOINT_PERIOD, DEFAULT_INDEX_REST_PERIOD,
  DEFAULT_THRESHOLD, DEFAULT_THROTTLE_PERCENT, MAX_THREADS, MIN_THREADS,
};

#[derive(Debug, Clone, Copy)]
pub enum Conf {
  /// Chunk executor concurrency, clamped to 1..=4 / 块执行并发数
  Threads(usize),
  /// Records or streams between cancellation checks / 取消检查间隔
  CancellationCheckPeriod(u32),
  /// Streams per calculator batch / 计算器批大小
  CheckpointPeriod(u32),
  /// Index entries between rests / 索引执行休息间隔
  IndexRestPeriod(u32),
  /// Active percent in (0, 100] / 活跃百分比
  ThrottlePercent(f64),
  /// Discard tombstoned streams entirely / 完全丢弃已硬删除的流
  UnsafeIgnoreHardDeletes(bool),
  MergeChunks(bool),
  /// Threshold of newly created scavenge points / 新清理点的阈值
  Threshold(i32),
  /// Only follow existing scavenge points / 仅同步已有清理点
  SyncOnly(bool),
  /// Chunks wholly older than this are removed / 早于此期限的块整体移除
  RetainPeriod(Duration),
}

#[derive(Debug, Clone)]
pub struct ScavengeConf {
  pub threads: usize,
  pub cancellation_check_period: u32,
  pub checkpoint_period: u32,
  pub index_rest_period: u32,
  pub throttle_percent: f64,
  pub unsafe_ignore_hard_deletes: bool,
  pub merge_chunks: bool,
  pub threshold: i32,
  pub sync_only: bool,
  pub retain_period: Option<Duration>,
}

impl Default for ScavengeConf {
  fn default() -> Self {
    Self {
      threads: MIN_THREADS,
      cancellation_check_period: DEFAULT_CANCELLATION_CHECK_PERIOD,
      checkpoint_period: DEFAULT_CHECKPOINT_PERIOD,
      index_rest_period: DEFAULT_INDEX_REST_PERIOD,
      throttle_percent: DEFAULT_THROTTLE_PERCENT,
      unsafe_ignore_hard_deletes: false,
      merge_chunks: false,
      threshold: DEFAULT_THRESHOLD,
      sync_only: false,
      retain_period: None,
    }
  }
}

impl ScavengeConf {
  pub fn parse(conf: &[Conf]) -> Self {
    let mut c = Self::default();
    for i in conf {
      match *i {
        Conf::Threads(v) => {
          c.threads = v.clamp(MIN_THREADS, MAX_THREADS);
          if c.threads != v {
            warn!("SCAVENGING: threads {v} out of range, clamped to {}", c.threads);
          }
        }
        Conf::CancellationCheckPeriod(v) => c.cancellation_check_period = v.max(1),
        Conf::CheckpointPeriod(v) => c.checkpoint_period = v.max(1),
        Conf::IndexRestPeriod(v) => c.index_rest_period = v.max(1),
        Conf::ThrottlePercent(v) => {
          c.throttle_percent = if v > 0.0 && v <= 100.0 {
            v
          } else {
            warn!("SCAVENGING: throttle percent {v} out of (0, 100], using 100");
            100.0
          }
        }
        Conf::UnsafeIgnoreHardDeletes(v) => c.unsafe_ignore_hard_deletes = v,
        Conf::MergeChunks(v) => c.merge_chunks = v,
        Conf::Threshold(v) => c.threshold = v,
        Conf::SyncOnly(v) => c.sync_only = v,
        Conf::RetainPeriod(v) => c.retain_period = Some(v),
      }
    }
    c
  }
}
