//! Rows kept per stream and per chunk / 每流与每块的记录

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{discard::DiscardPoint, error::Result, meta::StreamMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalculationStatus {
  /// Needs (re)calculation / 需要计算
  #[default]
  Active,
  /// Nothing left to discard, removable once chunks are executed / 可清除
  Spent,
  /// Tombstoned, kept to remember the deletion / 已硬删除，保留以记住删除
  Archived,
}

impl CalculationStatus {
  pub fn to_i64(self) -> i64 {
    match self {
      Self::Active => 0,
      Self::Spent => 1,
      Self::Archived => 2,
    }
  }

  pub fn from_i64(v: i64) -> Self {
    match v {
      1 => Self::Spent,
      2 => Self::Archived,
      _ => Self::Active,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OriginalStreamData {
  pub is_tombstoned: bool,
  pub metadata: StreamMetadata,
  pub discard_point: DiscardPoint,
  pub maybe_discard_point: DiscardPoint,
  pub status: CalculationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetastreamData {
  pub is_tombstoned: bool,
  pub discard_point: DiscardPoint,
}

/// Min and max record timestamp of a logical chunk / 逻辑块记录时间戳范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTimeRange {
  pub min: i64,
  pub max: i64,
}

impl ChunkTimeRange {
  pub const EMPTY: Self = Self {
    min: i64::MAX,
    max: i64::MIN,
  };

  pub fn add(&mut self, ts: i64) {
    self.min = self.min.min(ts);
    self.max = self.max.max(ts);
  }

  pub fn is_empty(&self) -> bool {
    self.min > self.max
  }
}

/// What the chunk executor needs per stream / 块执行所需的流信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkExecutionInfo {
  pub is_tombstoned: bool,
  pub discard_point: DiscardPoint,
  pub maybe_discard_point: DiscardPoint,
  /// Milliseconds / 毫秒
  pub max_age: Option<i64>,
}

/// What the index executor needs per handle / 索引执行所需的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexExecutionInfo {
  pub is_metastream: bool,
  pub is_tombstoned: bool,
  pub discard_point: DiscardPoint,
}

fn original_row(row: &Row<'_>) -> rusqlite::Result<OriginalStreamData> {
  Ok(OriginalStreamData {
    is_tombstoned: row.get::<_, i64>(0)? != 0,
    metadata: StreamMetadata {
      max_age: row.get(1)?,
      max_count: row.get(2)?,
      truncate_before: row.get(3)?,
    },
    discard_point: DiscardPoint::discard_before(row.get(4)?),
    maybe_discard_point: DiscardPoint::discard_before(row.get(5)?),
    status: CalculationStatus::from_i64(row.get(6)?),
  })
}

const ORIGINAL_COLUMNS: &str =
  "is_tombstoned, max_age, max_count, truncate_before, discard_point, maybe_discard_point, status";

pub(crate) fn read_original(conn: &Connection, key: &str) -> Result<Option<OriginalStreamData>> {
  let sql = format!("SELECT {ORIGINAL_COLUMNS} FROM original_streams WHERE key = ?1");
  let mut stmt = conn.prepare_cached(&sql)?;
  Ok(stmt.query_row(params![key], original_row).optional()?)
}

/// Active streams after `after`, ordered by key / after 之后待计算的流
pub(crate) fn read_active(
  conn: &Connection,
  after: Option<&str>,
  limit: usize,
) -> Result<Vec<(String, OriginalStreamData)>> {
  let sql = format!(
    "SELECT key, {ORIGINAL_COLUMNS} FROM original_streams \
     WHERE status = 0 AND key > ?1 ORDER BY key LIMIT ?2"
  );
  let mut stmt = conn.prepare_cached(&sql)?;
  let rows = stmt.query_map(params![after.unwrap_or(""), limit as i64], |row| {
    let key: String = row.get(0)?;
    let data = OriginalStreamData {
      is_tombstoned: row.get::<_, i64>(1)? != 0,
      metadata: StreamMetadata {
        max_age: row.get(2)?,
        max_count: row.get(3)?,
        truncate_before: row.get(4)?,
      },
      discard_point: DiscardPoint::discard_before(row.get(5)?),
      maybe_discard_point: DiscardPoint::discard_before(row.get(6)?),
      status: CalculationStatus::from_i64(row.get(7)?),
    };
    Ok((key, data))
  })?;
  Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<MetastreamData>> {
  let mut stmt =
    conn.prepare_cached("SELECT is_tombstoned, discard_point FROM meta_streams WHERE key = ?1")?;
  Ok(
    stmt
      .query_row(params![key], |row| {
        Ok(MetastreamData {
          is_tombstoned: row.get::<_, i64>(0)? != 0,
          discard_point: DiscardPoint::discard_before(row.get(1)?),
        })
      })
      .optional()?,
  )
}

pub(crate) fn read_chunk_time(conn: &Connection, num: u32) -> Result<Option<ChunkTimeRange>> {
  let mut stmt = conn.prepare_cached("SELECT min, max FROM chunk_times WHERE num = ?1")?;
  Ok(
    stmt
      .query_row(params![num], |row| {
        Ok(ChunkTimeRange {
          min: row.get(0)?,
          max: row.get(1)?,
        })
      })
      .optional()?,
  )
}

pub(crate) fn sum_weights(conn: &Connection, start: u32, end: u32) -> Result<f64> {
  let mut stmt = conn.prepare_cached(
    "SELECT COALESCE(SUM(weight), 0.0) FROM chunk_weights WHERE num BETWEEN ?1 AND ?2",
  )?;
  Ok(stmt.query_row(params![start, end], |row| row.get(0))?)
}

pub(crate) fn reset_weights(conn: &Connection, start: u32, end: u32) -> Result<()> {
  conn
    .prepare_cached("DELETE FROM chunk_weights WHERE num BETWEEN ?1 AND ?2")?
    .execute(params![start, end])?;
  Ok(())
}
