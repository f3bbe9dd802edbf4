//! Scavenge points and where they come from / 清理点及其来源

use std::{
  fmt,
  time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use log::info;
use serde::{Deserialize, Serialize};
use tf_chunk::{LogRecord, Prepare};
use tf_db::ChunkDb;

use crate::{
  consts::{SCAVENGE_POINT_EVENT_TYPE, SCAVENGE_POINTS_STREAM},
  error::{Error, Result},
  handle::StreamHandle,
  index::{IndexReader, MemIndex},
};

/// Upper boundary and time reference of one run / 一次清理的上界与时间基准
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScavengePoint {
  /// Log position of the scavenge point record / 清理点记录的日志位置
  pub position: i64,
  pub event_number: i64,
  /// Unix milliseconds / 毫秒时间戳
  pub effective_now: i64,
  pub threshold: i32,
}

impl ScavengePoint {
  pub fn name(&self) -> String {
    format!("SP-{}", self.event_number)
  }
}

impl fmt::Display for ScavengePoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} at {} (threshold {})",
      self.name(),
      self.position,
      self.threshold
    )
  }
}

#[derive(Serialize, Deserialize)]
struct Payload {
  threshold: i32,
}

#[expect(async_fn_in_trait, reason = "compio single-threaded runtime")]
pub trait ScavengePointSource {
  async fn latest(&self) -> Result<Option<ScavengePoint>>;

  /// Append a new point, `expected` is the event number of the latest one
  /// 追加新清理点，expected 为当前最新清理点的事件号
  async fn add(&self, expected: Option<i64>, threshold: i32) -> Result<ScavengePoint>;
}

pub fn now_ms() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map_or(0, |d| d.as_millis() as i64)
}

/// Points stored as events of the `$scavengePoints` stream / 以事件形式存于日志
pub struct LogScavengePointSource<'a> {
  db: &'a ChunkDb,
  index: &'a MemIndex,
}

impl<'a> LogScavengePointSource<'a> {
  pub fn new(db: &'a ChunkDb, index: &'a MemIndex) -> Self {
    Self { db, index }
  }

  fn parse(record: &LogRecord) -> Result<ScavengePoint> {
    let Some(p) = record.as_prepare() else {
      return Err(Error::InvalidOperation(format!(
        "scavenge point at {} is not an event",
        record.log_position()
      )));
    };
    let payload: Payload = serde_json::from_slice(&p.data)?;
    Ok(ScavengePoint {
      position: p.log_position,
      event_number: p.event_number,
      effective_now: p.timestamp,
      threshold: payload.threshold,
    })
  }
}

impl ScavengePointSource for LogScavengePointSource<'_> {
  async fn latest(&self) -> Result<Option<ScavengePoint>> {
    let handle = StreamHandle::ById(SCAVENGE_POINTS_STREAM.to_owned());
    let slice = self.index.read_backward(&handle, -1, 1, i64::MAX);
    let Some(last) = slice.events.first() else {
      return Ok(None);
    };
    let Some(record) = self.db.read_record_at(last.position).await? else {
      return Err(Error::InvalidOperation(format!(
        "scavenge point record missing at {}",
        last.position
      )));
    };
    Self::parse(&record).map(Some)
  }

  async fn add(&self, expected: Option<i64>, threshold: i32) -> Result<ScavengePoint> {
    let current = self.latest().await?.map(|sp| sp.event_number);
    if current != expected {
      return Err(Error::InvalidOperation(format!(
        "wrong expected scavenge point version {expected:?}, current {current:?}"
      )));
    }
    let event_number = expected.map_or(0, |n| n + 1);
    let data = serde_json::to_vec(&Payload { threshold })?;
    let mut record: LogRecord = Prepare::event(
      SCAVENGE_POINTS_STREAM,
      event_number,
      SCAVENGE_POINT_EVENT_TYPE,
      Bytes::from(data),
      now_ms(),
    )
    .into();
    self.db.append(&mut record).await?;
    self.index.add_record(&record);
    // chunks up to the point must be complete before execution
    self.db.complete_chunk().await?;
    let sp = Self::parse(&record)?;
    info!("SCAVENGING: added scavenge point {sp}");
    Ok(sp)
  }
}
