//! Durable scavenge state in SQLite / SQLite 中的持久清理状态
//!
//! Every phase writes through one connection inside explicit transactions, each
//! committed together with the checkpoint. Chunk workers open their own connections.
//! 各阶段在显式事务内通过单连接写入，事务与检查点一同提交；块执行线程各开连接。

mod collision;
pub mod data;
mod sqlite;
mod tx;
mod worker;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

pub use data::{
  CalculationStatus, ChunkExecutionInfo, ChunkTimeRange, IndexExecutionInfo, MetastreamData,
  OriginalStreamData,
};
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, params};
pub use tx::Tx;
pub use worker::StateWorker;

use self::collision::Collisions;
use crate::{
  checkpoint::Checkpoint,
  discard::DiscardPoint,
  error::Result,
  handle::StreamHandle,
  hasher::StreamHasher,
  lookup::MetastreamLookup,
  meta::StreamMetadata,
};

pub(crate) fn handle_of(hasher: &dyn StreamHasher, colliding: bool, stream: &str) -> StreamHandle {
  if colliding {
    StreamHandle::ById(stream.to_owned())
  } else {
    StreamHandle::ByHash(hasher.hash(stream))
  }
}

pub struct ScavengeState {
  conn: Connection,
  path: PathBuf,
  hasher: Arc<dyn StreamHasher>,
  lookup: Arc<dyn MetastreamLookup>,
  collisions: Collisions,
}

impl ScavengeState {
  pub fn open(
    path: impl AsRef<Path>,
    hasher: Arc<dyn StreamHasher>,
    lookup: Arc<dyn MetastreamLookup>,
  ) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let conn = sqlite::open(&path)?;
    let collisions = Collisions::load(&conn, hasher.clone())?;
    Ok(Self {
      conn,
      path,
      hasher,
      lookup,
      collisions,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn hasher(&self) -> &dyn StreamHasher {
    &*self.hasher
  }

  pub fn lookup(&self) -> &dyn MetastreamLookup {
    &*self.lookup
  }

  pub fn begin(&self) -> Result<Tx<'_>> {
    Tx::begin(self)
  }

  fn rollback(&self) -> Result<()> {
    self.conn.execute_batch("ROLLBACK")?;
    // collisions found inside the transaction are gone with it
    self.collisions.reload(&self.conn)
  }

  pub fn checkpoint(&self) -> Result<Option<Checkpoint>> {
    let data: Option<String> = self
      .conn
      .prepare_cached("SELECT data FROM checkpoint WHERE id = 0")?
      .query_row([], |row| row.get(0))
      .optional()?;
    match data {
      Some(s) => Ok(Some(serde_json::from_str(&s)?)),
      None => Ok(None),
    }
  }

  /// Store a checkpoint outside any phase transaction / 在阶段事务之外写检查点
  pub fn set_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
    self.write_checkpoint(checkpoint)
  }

  fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
    let data = serde_json::to_string(checkpoint)?;
    self
      .conn
      .prepare_cached(
        "INSERT INTO checkpoint (id, data) VALUES (0, ?1) \
         ON CONFLICT(id) DO UPDATE SET data = excluded.data",
      )?
      .execute(params![data])?;
    Ok(())
  }

  // Collisions / 冲突

  /// Must run for every stream name before its handle is used / 使用句柄前须先登记
  pub fn detect_collisions(&self, stream: &str) -> Result<()> {
    let Some(user) = self.collisions.detect(&self.conn, stream)? else {
      return Ok(());
    };
    warn!("SCAVENGING: hash collision between \"{stream}\" and \"{user}\"");
    let from = StreamHandle::ByHash(self.hasher.hash(&user)).key();
    let to = StreamHandle::ById(user).key();
    for table in ["original_streams", "meta_streams"] {
      let n = self
        .conn
        .prepare_cached(&format!("UPDATE {table} SET key = ?2 WHERE key = ?1"))?
        .execute(params![from, to])?;
      if n > 0 {
        info!("SCAVENGING: moved {table} {from} to {to}");
      }
    }
    Ok(())
  }

  pub fn handle(&self, stream: &str) -> StreamHandle {
    handle_of(&*self.hasher, self.collisions.contains(stream), stream)
  }

  pub fn is_collision_hash(&self, hash: u64) -> bool {
    self.collisions.contains_hash(hash)
  }

  /// Every stream known to collide, sorted / 所有冲突流
  pub fn collisions(&self) -> Vec<String> {
    self.collisions.all()
  }

  /// The stream behind a non-colliding hash / 非冲突哈希对应的流名
  pub fn unique_user(&self, hash: u64) -> Result<Option<String>> {
    self.collisions.unique_user(&self.conn, hash)
  }

  // Accumulation / 累积

  pub fn set_original_metadata(&self, stream: &str, metadata: &StreamMetadata) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "INSERT INTO original_streams (key, max_age, max_count, truncate_before, status) \
         VALUES (?1, ?2, ?3, ?4, 0) ON CONFLICT(key) DO UPDATE SET \
         max_age = excluded.max_age, max_count = excluded.max_count, \
         truncate_before = excluded.truncate_before, status = 0",
      )?
      .execute(params![
        self.handle(stream).key(),
        metadata.max_age,
        metadata.max_count,
        metadata.truncate_before
      ])?;
    Ok(())
  }

  pub fn set_original_tombstone(&self, stream: &str) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "INSERT INTO original_streams (key, is_tombstoned, status) VALUES (?1, 1, 0) \
         ON CONFLICT(key) DO UPDATE SET is_tombstoned = 1, status = 0",
      )?
      .execute(params![self.handle(stream).key()])?;
    Ok(())
  }

  /// Never moves the point backward / 丢弃点不会后退
  pub fn set_metastream_discard_point(&self, metastream: &str, point: DiscardPoint) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "INSERT INTO meta_streams (key, discard_point) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET discard_point = MAX(discard_point, excluded.discard_point)",
      )?
      .execute(params![self.handle(metastream).key(), point.first_to_keep()])?;
    Ok(())
  }

  pub fn set_metastream_tombstone(&self, metastream: &str) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "INSERT INTO meta_streams (key, is_tombstoned) VALUES (?1, 1) \
         ON CONFLICT(key) DO UPDATE SET is_tombstoned = 1",
      )?
      .execute(params![self.handle(metastream).key()])?;
    Ok(())
  }

  pub fn set_chunk_time(&self, logical_chunk: u32, range: ChunkTimeRange) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "INSERT INTO chunk_times (num, min, max) VALUES (?1, ?2, ?3) \
         ON CONFLICT(num) DO UPDATE SET min = excluded.min, max = excluded.max",
      )?
      .execute(params![logical_chunk, range.min, range.max])?;
    Ok(())
  }

  pub fn chunk_time(&self, logical_chunk: u32) -> Result<Option<ChunkTimeRange>> {
    data::read_chunk_time(&self.conn, logical_chunk)
  }

  pub fn increase_chunk_weight(&self, logical_chunk: u32, weight: f64) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "INSERT INTO chunk_weights (num, weight) VALUES (?1, ?2) \
         ON CONFLICT(num) DO UPDATE SET weight = weight + excluded.weight",
      )?
      .execute(params![logical_chunk, weight])?;
    Ok(())
  }

  // Calculation / 计算

  pub fn original(&self, handle: &StreamHandle) -> Result<Option<OriginalStreamData>> {
    data::read_original(&self.conn, &handle.key())
  }

  pub fn metastream(&self, handle: &StreamHandle) -> Result<Option<MetastreamData>> {
    data::read_meta(&self.conn, &handle.key())
  }

  /// Next batch of streams needing calculation, keyed after `after`
  /// 下一批待计算的流
  pub fn active_originals(
    &self,
    after: Option<&str>,
    limit: usize,
  ) -> Result<Vec<(StreamHandle, OriginalStreamData)>> {
    data::read_active(&self.conn, after, limit)?
      .into_iter()
      .map(|(key, d)| Ok((StreamHandle::from_key(&key)?, d)))
      .collect()
  }

  pub fn set_discard_points(
    &self,
    handle: &StreamHandle,
    status: CalculationStatus,
    discard_point: DiscardPoint,
    maybe_discard_point: DiscardPoint,
  ) -> Result<()> {
    self
      .conn
      .prepare_cached(
        "UPDATE original_streams SET status = ?2, discard_point = ?3, maybe_discard_point = ?4 \
         WHERE key = ?1",
      )?
      .execute(params![
        handle.key(),
        status.to_i64(),
        discard_point.first_to_keep(),
        maybe_discard_point.first_to_keep()
      ])?;
    Ok(())
  }

  // Chunk execution / 块执行

  pub fn sum_chunk_weights(&self, start: u32, end: u32) -> Result<f64> {
    data::sum_weights(&self.conn, start, end)
  }

  pub fn reset_chunk_weights(&self, start: u32, end: u32) -> Result<()> {
    data::reset_weights(&self.conn, start, end)
  }

  /// Worker with its own connection, sharing this state's collisions
  /// 独立连接的执行者，共享当前冲突集
  pub fn worker(&self) -> Result<StateWorker> {
    StateWorker::open(
      &self.path,
      self.hasher.clone(),
      self.lookup.clone(),
      self.collisions.snapshot(),
    )
  }

  // Index execution / 索引执行

  /// A hash handle may be an original or a metastream, both maps are checked
  /// 哈希句柄无法区分原始流与元数据流，两表都查
  pub fn index_info(&self, handle: &StreamHandle) -> Result<Option<IndexExecutionInfo>> {
    let key = handle.key();
    let meta_first = match handle {
      StreamHandle::ByHash(_) => false,
      StreamHandle::ById(id) => self.lookup.is_metastream(id),
    };
    let original = |k: &str| -> Result<Option<IndexExecutionInfo>> {
      Ok(data::read_original(&self.conn, k)?.map(|d| IndexExecutionInfo {
        is_metastream: false,
        is_tombstoned: d.is_tombstoned,
        discard_point: d.discard_point,
      }))
    };
    let meta = |k: &str| -> Result<Option<IndexExecutionInfo>> {
      Ok(data::read_meta(&self.conn, k)?.map(|d| IndexExecutionInfo {
        is_metastream: true,
        is_tombstoned: d.is_tombstoned,
        discard_point: d.discard_point,
      }))
    };
    if meta_first {
      return meta(&key);
    }
    if let Some(info) = original(&key)? {
      return Ok(Some(info));
    }
    if matches!(handle, StreamHandle::ByHash(_)) {
      return meta(&key);
    }
    Ok(None)
  }

  // Cleaning / 清除

  pub fn all_weights_zero(&self) -> Result<bool> {
    let n: i64 = self
      .conn
      .prepare_cached("SELECT COUNT(*) FROM chunk_weights WHERE weight > 0")?
      .query_row([], |row| row.get(0))?;
    Ok(n == 0)
  }

  /// Drop spent streams, and archived ones too when asked / 删除已耗尽流，按需删除归档流
  pub fn delete_originals(&self, delete_archived: bool) -> Result<usize> {
    let spent = CalculationStatus::Spent.to_i64();
    let archived = if delete_archived {
      CalculationStatus::Archived.to_i64()
    } else {
      spent
    };
    Ok(
      self
        .conn
        .prepare_cached("DELETE FROM original_streams WHERE status IN (?1, ?2)")?
        .execute(params![spent, archived])?,
    )
  }

  pub fn delete_metastreams(&self) -> Result<usize> {
    Ok(self.conn.prepare_cached("DELETE FROM meta_streams")?.execute([])?)
  }

  /// Row counts for logging / 行数统计
  pub fn stats(&self) -> Result<StateStats> {
    let count = |table: &str| -> Result<u64> {
      let n: i64 = self
        .conn
        .prepare_cached(&format!("SELECT COUNT(*) FROM {table}"))?
        .query_row([], |row| row.get(0))?;
      Ok(n as u64)
    };
    Ok(StateStats {
      originals: count("original_streams")?,
      metastreams: count("meta_streams")?,
      weighted_chunks: count("chunk_weights")?,
      collisions: count("collisions")?,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateStats {
  pub originals: u64,
  pub metastreams: u64,
  pub weighted_chunks: u64,
  pub collisions: u64,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lookup::NameLookup;

  struct LenHasher;

  impl StreamHasher for LenHasher {
    fn hash(&self, stream: &str) -> u64 {
      stream.len() as u64
    }
  }

  fn open(dir: &Path) -> ScavengeState {
    ScavengeState::open(dir.join("s.db"), Arc::new(LenHasher), Arc::new(NameLookup)).unwrap()
  }

  #[test]
  fn collision_moves_data_to_id_keys() {
    let dir = tempfile::tempdir().unwrap();
    let s = open(dir.path());
    s.detect_collisions("ab").unwrap();
    s.set_original_metadata("ab", &StreamMetadata {
      max_count: Some(1),
      ..Default::default()
    })
    .unwrap();
    assert_eq!(s.handle("ab"), StreamHandle::ByHash(2));

    s.detect_collisions("cd").unwrap();
    assert_eq!(s.handle("ab"), StreamHandle::ById("ab".into()));
    assert!(s.is_collision_hash(2));
    assert_eq!(s.collisions(), ["ab", "cd"]);
    let d = s.original(&s.handle("ab")).unwrap().unwrap();
    assert_eq!(d.metadata.max_count, Some(1));
    assert!(s.original(&StreamHandle::ByHash(2)).unwrap().is_none());
    assert_eq!(s.unique_user(2).unwrap(), None);
  }

  #[test]
  fn rollback_forgets_collisions() {
    let dir = tempfile::tempdir().unwrap();
    let s = open(dir.path());
    let tx = s.begin().unwrap();
    s.detect_collisions("ab").unwrap();
    tx.commit(&Checkpoint::Done {
      sp: crate::point::ScavengePoint {
        position: 0,
        event_number: 0,
        effective_now: 0,
        threshold: 0,
      },
    })
    .unwrap();

    let tx = s.begin().unwrap();
    s.detect_collisions("cd").unwrap();
    assert!(s.is_collision_hash(2));
    drop(tx);
    assert!(!s.is_collision_hash(2));
    assert_eq!(s.unique_user(2).unwrap().as_deref(), Some("ab"));
    assert!(matches!(s.checkpoint().unwrap(), Some(Checkpoint::Done { .. })));
  }

  #[test]
  fn weights_and_cleaning() {
    let dir = tempfile::tempdir().unwrap();
    let s = open(dir.path());
    s.increase_chunk_weight(0, 2.0).unwrap();
    s.increase_chunk_weight(0, 1.0).unwrap();
    s.increase_chunk_weight(3, 1.0).unwrap();
    assert_eq!(s.sum_chunk_weights(0, 1).unwrap(), 3.0);
    assert!(!s.all_weights_zero().unwrap());
    s.reset_chunk_weights(0, 3).unwrap();
    assert!(s.all_weights_zero().unwrap());

    s.detect_collisions("a").unwrap();
    s.set_original_tombstone("a").unwrap();
    let h = s.handle("a");
    s.set_discard_points(
      &h,
      CalculationStatus::Archived,
      DiscardPoint::discard_before(5),
      DiscardPoint::KEEP_ALL,
    )
    .unwrap();
    assert_eq!(s.delete_originals(false).unwrap(), 0);
    assert_eq!(s.delete_originals(true).unwrap(), 1);
  }
}
