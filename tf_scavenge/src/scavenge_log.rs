//! Scavenge telemetry port / 清理遥测接口

use std::{
  sync::atomic::{AtomicI64, AtomicU64, Ordering},
  time::Duration,
};

use log::{error, info};
use parking_lot::Mutex;

use crate::checkpoint::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScavengeResult {
  Success,
  /// Cancelled, resumable from the last checkpoint / 已取消，可从检查点恢复
  Stopped,
  Errored,
}

/// Events raised by the pipeline. Every method has a no-op default.
/// 流水线事件，默认实现为空
pub trait ScavengeLog {
  fn scavenge_started(&self, _id: &str) {}

  fn phase_completed(&self, _phase: Phase, _elapsed: Duration) {}

  fn chunk_scavenged(&self, _start: u32, _end: u32, _elapsed: Duration, _space_saved: i64) {}

  fn chunk_skipped(&self, _start: u32, _end: u32, _weight: f64) {}

  fn chunk_removed(&self, _start: u32, _end: u32) {}

  fn chunk_merged(&self, _start: u32, _end: u32, _elapsed: Duration, _space_saved: i64) {}

  fn index_scavenged(&self, _removed: u64, _kept: u64, _elapsed: Duration) {}

  fn scavenge_completed(&self, _result: ScavengeResult, _error: Option<&str>, _elapsed: Duration) {}
}

/// Writes events through `log` and counts them / 通过 log 输出并计数
#[derive(Default)]
pub struct LogScavengeLog {
  scavenged: AtomicU64,
  skipped: AtomicU64,
  removed: AtomicU64,
  merged: AtomicU64,
  index_removed: AtomicU64,
  space_saved: AtomicI64,
  result: Mutex<Option<(ScavengeResult, Option<String>)>>,
}

impl LogScavengeLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn chunks_scavenged(&self) -> u64 {
    self.scavenged.load(Ordering::Relaxed)
  }

  pub fn chunks_skipped(&self) -> u64 {
    self.skipped.load(Ordering::Relaxed)
  }

  pub fn chunks_removed(&self) -> u64 {
    self.removed.load(Ordering::Relaxed)
  }

  pub fn chunks_merged(&self) -> u64 {
    self.merged.load(Ordering::Relaxed)
  }

  pub fn index_entries_removed(&self) -> u64 {
    self.index_removed.load(Ordering::Relaxed)
  }

  pub fn space_saved(&self) -> i64 {
    self.space_saved.load(Ordering::Relaxed)
  }

  /// Result and error message of the last completed run / 最近一次运行的结果
  pub fn result(&self) -> Option<(ScavengeResult, Option<String>)> {
    self.result.lock().clone()
  }
}

impl ScavengeLog for LogScavengeLog {
  fn scavenge_started(&self, id: &str) {
    info!("SCAVENGING: scavenge {id} started");
  }

  fn phase_completed(&self, phase: Phase, elapsed: Duration) {
    info!("SCAVENGING: {phase} phase completed in {elapsed:?}");
  }

  fn chunk_scavenged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64) {
    self.scavenged.fetch_add(1, Ordering::Relaxed);
    self.space_saved.fetch_add(space_saved, Ordering::Relaxed);
    info!("SCAVENGING: chunk #{start}-{end} scavenged in {elapsed:?}, saved {space_saved} bytes");
  }

  fn chunk_skipped(&self, start: u32, end: u32, weight: f64) {
    self.skipped.fetch_add(1, Ordering::Relaxed);
    log::debug!("SCAVENGING: chunk #{start}-{end} skipped with weight {weight}");
  }

  fn chunk_removed(&self, start: u32, end: u32) {
    self.removed.fetch_add(1, Ordering::Relaxed);
    info!("SCAVENGING: chunk #{start}-{end} removed");
  }

  fn chunk_merged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64) {
    self.merged.fetch_add(1, Ordering::Relaxed);
    self.space_saved.fetch_add(space_saved, Ordering::Relaxed);
    info!("SCAVENGING: chunks #{start}-{end} merged in {elapsed:?}, saved {space_saved} bytes");
  }

  fn index_scavenged(&self, removed: u64, kept: u64, elapsed: Duration) {
    self.index_removed.fetch_add(removed, Ordering::Relaxed);
    info!("SCAVENGING: index scavenged in {elapsed:?}, removed {removed}, kept {kept}");
  }

  fn scavenge_completed(&self, result: ScavengeResult, err: Option<&str>, elapsed: Duration) {
    match err {
      Some(e) => error!("SCAVENGING: scavenge {result:?} after {elapsed:?}: {e}"),
      None => info!(
        "SCAVENGING: scavenge {result:?} after {elapsed:?}, space saved {}",
        self.space_saved()
      ),
    }
    *self.result.lock() = Some((result, err.map(str::to_owned)));
  }
}
