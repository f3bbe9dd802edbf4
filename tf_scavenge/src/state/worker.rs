//! Per-worker view of the state for chunk execution / 块执行线程的状态视图

use std::{collections::HashMap, collections::HashSet, path::Path, sync::Arc};

use rusqlite::Connection;

use super::{
  data::{self, ChunkExecutionInfo, ChunkTimeRange},
  handle_of, sqlite,
};
use crate::{
  consts::WORKER_CACHE_MAX, error::Result, hasher::StreamHasher, lookup::MetastreamLookup,
};

/// Own connection and prepared statements, collisions frozen at creation
/// 独立连接与预编译语句，冲突集在创建时固定
pub struct StateWorker {
  conn: Connection,
  hasher: Arc<dyn StreamHasher>,
  lookup: Arc<dyn MetastreamLookup>,
  collisions: HashSet<String>,
  cache: HashMap<String, ChunkExecutionInfo>,
  cache_max: usize,
}

impl StateWorker {
  pub(super) fn open(
    path: &Path,
    hasher: Arc<dyn StreamHasher>,
    lookup: Arc<dyn MetastreamLookup>,
    collisions: HashSet<String>,
  ) -> Result<Self> {
    Ok(Self {
      conn: sqlite::open(path)?,
      hasher,
      lookup,
      collisions,
      cache: HashMap::new(),
      cache_max: WORKER_CACHE_MAX,
    })
  }

  /// Stream data nothing is known about keeps everything / 未知流全部保留
  pub fn execution_info(&mut self, stream: &str) -> Result<ChunkExecutionInfo> {
    if let Some(info) = self.cache.get(stream) {
      return Ok(*info);
    }
    let key = handle_of(&*self.hasher, self.collisions.contains(stream), stream).key();
    let info = if self.lookup.is_metastream(stream) {
      let m = data::read_meta(&self.conn, &key)?.unwrap_or_default();
      ChunkExecutionInfo {
        is_tombstoned: m.is_tombstoned,
        discard_point: m.discard_point,
        ..Default::default()
      }
    } else {
      let o = data::read_original(&self.conn, &key)?.unwrap_or_default();
      ChunkExecutionInfo {
        is_tombstoned: o.is_tombstoned,
        discard_point: o.discard_point,
        maybe_discard_point: o.maybe_discard_point,
        max_age: o.metadata.max_age_ms(),
      }
    };
    if self.cache.len() >= self.cache_max {
      self.cache.clear();
    }
    self.cache.insert(stream.to_owned(), info);
    Ok(info)
  }

  pub fn sum_chunk_weights(&self, start: u32, end: u32) -> Result<f64> {
    data::sum_weights(&self.conn, start, end)
  }

  pub fn reset_chunk_weights(&self, start: u32, end: u32) -> Result<()> {
    data::reset_weights(&self.conn, start, end)
  }

  /// Combined time range of logical chunks `start..=end` / 逻辑块范围的合并时间
  pub fn chunk_time(&self, start: u32, end: u32) -> Result<Option<ChunkTimeRange>> {
    let mut range = ChunkTimeRange::EMPTY;
    for n in start..=end {
      if let Some(t) = data::read_chunk_time(&self.conn, n)? {
        range.add(t.min);
        range.add(t.max);
      }
    }
    Ok((!range.is_empty()).then_some(range))
  }
}

#[cfg(test)]
mod tests {
  use super::super::ScavengeState;
  use super::*;
  use crate::{hasher::Crc32Hasher, lookup::NameLookup, meta::StreamMetadata};

  #[test]
  fn cache_stays_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let s = ScavengeState::open(
      dir.path().join("s.db"),
      Arc::new(Crc32Hasher),
      Arc::new(NameLookup),
    )
    .unwrap();
    s.detect_collisions("keep").unwrap();
    s.set_original_metadata("keep", &StreamMetadata {
      max_age: Some(60),
      ..Default::default()
    })
    .unwrap();

    let mut w = s.worker().unwrap();
    w.cache_max = 3;
    for i in 0..10 {
      w.execution_info(&format!("s{i}")).unwrap();
      assert!(w.cache.len() <= 3);
    }
    // values survive the reset
    assert_eq!(w.execution_info("keep").unwrap().max_age, Some(60_000));
    assert_eq!(w.execution_info("keep").unwrap().max_age, Some(60_000));
  }
}
