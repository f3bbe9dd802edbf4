use std::sync::Arc;

use log::warn;

use super::Chunk;
use crate::{
  consts::{FRAME_OVERHEAD, HEADER_SIZE, MAX_RECORD_SIZE},
  error::{Error, Result},
  footer::ChunkFooter,
  handle::Handle,
  pos_map::{self, Midpoint},
  read_side::{ReadSide, Scavenged},
  record::LogRecord,
};

/// A record read together with where to continue / 读出的记录及续读位置
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRead {
  pub record: LogRecord,
  /// Payload length without framing / 不含帧的载荷长度
  pub length: u32,
  /// Local logical position to continue from / 续读的块内逻辑位置
  pub next: i64,
}

/// Map lookup mode / 映射查找方式
#[derive(Clone, Copy)]
enum Lookup {
  Exact,
  Forward,
}

impl Chunk {
  /// Whether a record starts at local position `pos` / 块内 pos 处是否有记录
  pub async fn exists_at(&self, pos: i64) -> Result<bool> {
    match &self.read_side {
      ReadSide::Unscavenged => Ok(pos >= 0 && (pos as u64) < self.logical_data_size()),
      ReadSide::Scavenged(sc) => {
        let reader = self.reader().await?;
        let actual = self.translate(sc, &reader, pos, Lookup::Exact).await?;
        Ok(actual.is_some_and(|a| a < self.physical_data_size()))
      }
    }
  }

  /// Physical offset of the record at local position `pos` / 记录的物理偏移
  pub async fn actual_position(&self, pos: i64) -> Result<Option<u64>> {
    match &self.read_side {
      ReadSide::Unscavenged => Ok((pos >= 0 && (pos as u64) < self.logical_data_size()).then_some(pos as u64)),
      ReadSide::Scavenged(sc) => {
        let reader = self.reader().await?;
        self.translate(sc, &reader, pos, Lookup::Exact).await
      }
    }
  }

  /// Read the record starting exactly at `pos` / 精确读取 pos 处记录
  pub async fn try_read_at(&self, pos: i64, could_be_scavenged: bool) -> Result<Option<RecordRead>> {
    let reader = self.reader().await?;
    let actual = match &self.read_side {
      ReadSide::Unscavenged => {
        if pos < 0 || pos as u64 >= self.logical_data_size() {
          warn!("read at {pos} past logical size {} of {self}", self.logical_data_size());
          return Ok(None);
        }
        pos as u64
      }
      ReadSide::Scavenged(sc) => {
        match self.translate(sc, &reader, pos, Lookup::Exact).await? {
          Some(a) if a < self.physical_data_size() => a,
          _ => {
            if !could_be_scavenged {
              warn!("record at {pos} not found in scavenged {self}");
            }
            return Ok(None);
          }
        }
      }
    };
    Ok(
      self
        .read_forward(&reader, actual)
        .await?
        .map(|(record, length)| self.forward_result(pos, record, length)),
    )
  }

  pub async fn try_read_first(&self) -> Result<Option<RecordRead>> {
    self.try_read_closest_forward(0).await
  }

  /// First record at or after `pos` / pos 处或之后的第一条记录
  pub async fn try_read_closest_forward(&self, pos: i64) -> Result<Option<RecordRead>> {
    let reader = self.reader().await?;
    let actual = match &self.read_side {
      ReadSide::Unscavenged => {
        if pos < 0 || pos as u64 >= self.logical_data_size() {
          return Ok(None);
        }
        pos as u64
      }
      ReadSide::Scavenged(sc) => {
        let physical = self.physical_data_size();
        let a = self
          .translate(sc, &reader, pos, Lookup::Forward)
          .await?
          .unwrap_or(physical);
        if a >= physical {
          return Ok(None);
        }
        a
      }
    };
    Ok(
      self
        .read_forward(&reader, actual)
        .await?
        .map(|(record, length)| self.forward_result(pos, record, length)),
    )
  }

  /// Last record of the chunk / 块内最后一条记录
  pub async fn try_read_last(&self) -> Result<Option<RecordRead>> {
    self
      .try_read_closest_backward(self.logical_data_size() as i64)
      .await
  }

  /// Last record ending at or before `pos` / 在 pos 处或之前结束的最后一条记录
  pub async fn try_read_closest_backward(&self, pos: i64) -> Result<Option<RecordRead>> {
    let reader = self.reader().await?;
    match &self.read_side {
      ReadSide::Unscavenged => {
        if pos < 0 || pos as u64 > self.logical_data_size() {
          return Ok(None);
        }
        Ok(
          self
            .read_backward(&reader, pos as u64)
            .await?
            .map(|(record, length)| RecordRead {
              record,
              length,
              next: pos - length as i64 - FRAME_OVERHEAD as i64,
            }),
        )
      }
      ReadSide::Scavenged(sc) => {
        let footer = self.completed_footer().ok();
        if footer.is_some_and(|f| f.map_count() == 0) {
          return Ok(None);
        }
        let physical = self.physical_data_size();
        let a = self
          .translate(sc, &reader, pos, Lookup::Forward)
          .await?
          .unwrap_or(physical);
        if a > physical {
          return Ok(None);
        }
        Ok(
          self
            .read_backward(&reader, a)
            .await?
            .map(|(record, length)| RecordRead {
              next: self.header.local_position(record.log_position()),
              record,
              length,
            }),
        )
      }
    }
  }

  fn forward_result(&self, pos: i64, record: LogRecord, length: u32) -> RecordRead {
    let next = if self.is_scavenged() {
      self
        .header
        .local_position(record.next_log_position(length))
    } else {
      pos + length as i64 + FRAME_OVERHEAD as i64
    };
    RecordRead {
      record,
      length,
      next,
    }
  }

  /// Logical to physical through the position map / 经位置映射转换
  async fn translate(
    &self,
    sc: &Scavenged,
    handle: &Handle,
    pos: i64,
    lookup: Lookup,
  ) -> Result<Option<u64>> {
    // ongoing scavenged chunks have no map yet
    let Some(footer) = self.footer() else {
      return Ok(None);
    };
    let count = footer.map_count();
    if count == 0 {
      return Ok(None);
    }

    let (lo, hi) = match self.midpoints(sc, handle, &footer).await? {
      Some(mp) => {
        let last = mp[mp.len() - 1].log_pos;
        if pos > last {
          return Ok(None);
        }
        if pos < mp[0].log_pos {
          match lookup {
            Lookup::Exact => return Ok(None),
            Lookup::Forward => (0, 0),
          }
        } else {
          pos_map::locate_range(&mp, pos)
        }
      }
      None => (0, count - 1),
    };

    let format = footer.format();
    let size = format.size();
    let n = hi - lo + 1;
    let table = handle
      .read(self.map_offset() + (lo * size) as u64, n * size)
      .await?;
    Ok(
      match lookup {
        Lookup::Exact => pos_map::find_exact(&table, n, format, pos),
        Lookup::Forward => pos_map::find_closest_forward(&table, n, format, pos),
      }
      .map(u64::from),
    )
  }

  /// Midpoints for file handles, built on first demand / 文件句柄按需构建中点
  async fn midpoints(
    &self,
    sc: &Scavenged,
    handle: &Handle,
    footer: &ChunkFooter,
  ) -> Result<Option<Arc<[Midpoint]>>> {
    if handle.is_mem() {
      return Ok(None);
    }
    if let Some(mp) = sc.get() {
      return Ok(Some(mp));
    }
    if !sc.wants() {
      return Ok(None);
    }

    let _g = sc.populate.lock().await;
    if let Some(mp) = sc.get() {
      return Ok(Some(mp));
    }
    if !sc.wants() {
      return Ok(None);
    }
    let count = footer.map_count();
    let format = footer.format();
    let table = handle.read(self.map_offset(), count * format.size()).await?;
    let mp: Arc<[Midpoint]> =
      pos_map::build_midpoints(&table, count, format, self.conf.midpoints_depth)?.into();
    if mp.is_empty() {
      return Ok(None);
    }
    sc.set(mp.clone());
    Ok(Some(mp))
  }

  fn frame_len(&self, raw: &[u8], actual: u64, dir: &str) -> Result<u64> {
    let len = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    if len <= 0 {
      return Err(Error::InvalidRead(format!(
        "log record {dir} at actual position {actual} has non-positive length {len} in {self}"
      )));
    }
    if len as usize > MAX_RECORD_SIZE {
      return Err(Error::InvalidRead(format!(
        "log record {dir} at actual position {actual} has length {len} above {MAX_RECORD_SIZE} in {self}"
      )));
    }
    Ok(len as u64)
  }

  async fn read_forward(&self, handle: &Handle, actual: u64) -> Result<Option<(LogRecord, u32)>> {
    let physical = self.physical_data_size();
    if actual + FRAME_OVERHEAD > physical {
      warn!("no room for a record at {actual} in {self}, physical size {physical}");
      return Ok(None);
    }
    let base = HEADER_SIZE as u64 + actual;
    let prefix = handle.read(base, 4).await?;
    let len = self.frame_len(&prefix, actual, "forward")?;
    if actual + len + FRAME_OVERHEAD > physical {
      return Err(Error::ReadPastEnd(format!(
        "record of length {len} at {actual} past physical size {physical} in {self}"
      )));
    }

    let body = handle.read(base + 4, len as usize + 4).await?;
    let (data, suffix) = body.split_at(len as usize);
    if prefix[..] != suffix[..] {
      return Err(Error::InvalidRead(format!(
        "prefix/suffix length mismatch at actual position {actual} in {self}"
      )));
    }
    let record = LogRecord::decode(data).map_err(|e| {
      Error::InvalidRead(format!("decode forward at actual position {actual} in {self}: {e}"))
    })?;
    Ok(Some((record, len as u32)))
  }

  async fn read_backward(&self, handle: &Handle, actual: u64) -> Result<Option<(LogRecord, u32)>> {
    if actual < FRAME_OVERHEAD {
      return Ok(None);
    }
    let physical = self.physical_data_size();
    if actual > physical {
      return Err(Error::ReadPastEnd(format!(
        "backward read from {actual} past physical size {physical} in {self}"
      )));
    }
    let end = HEADER_SIZE as u64 + actual;
    let suffix = handle.read(end - 4, 4).await?;
    let len = self.frame_len(&suffix, actual, "backward")?;
    if actual < len + FRAME_OVERHEAD {
      return Err(Error::ReadPastEnd(format!(
        "record of length {len} ending at {actual} starts before data in {self}"
      )));
    }

    let frame = handle
      .read(end - len - FRAME_OVERHEAD, len as usize + 4)
      .await?;
    let (prefix, data) = frame.split_at(4);
    if prefix[..] != suffix[..] {
      return Err(Error::InvalidRead(format!(
        "prefix/suffix length mismatch ending at actual position {actual} in {self}"
      )));
    }
    let record = LogRecord::decode(data).map_err(|e| {
      Error::InvalidRead(format!("decode backward at actual position {actual} in {self}: {e}"))
    })?;
    Ok(Some((record, len as u32)))
  }
}
