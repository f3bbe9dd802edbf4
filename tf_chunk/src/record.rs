//! Log records and their framing
//! 日志记录及其帧格式
//!
//! Frame: `[len:u32][record][len:u32]`, prefix must equal suffix.
//! 帧：前缀长度必须等于后缀长度。
//!
//! Record: `[kind:u8][version:u8][log_position:i64][body]`, little endian.

use bytes::{Buf, BufMut, Bytes};
use uuid::Uuid;

use crate::{
  consts::{FRAME_OVERHEAD, MAX_RECORD_SIZE},
  error::{Error, Result},
};

pub const KIND_PREPARE: u8 = 0;
pub const KIND_COMMIT: u8 = 1;
pub const KIND_SYSTEM: u8 = 2;

pub const RECORD_VERSION: u8 = 1;

/// Event type of a stream metadata event / 流元数据事件类型
pub const METADATA_EVENT_TYPE: &str = "$metadata";
/// Event type of a tombstone / 墓碑事件类型
pub const TOMBSTONE_EVENT_TYPE: &str = "$streamDeleted";
/// Event number carried by tombstones / 墓碑事件号
pub const TOMBSTONE_EVENT_NUMBER: i64 = i64::MAX;

/// Prepare flags / 预写标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrepareFlags(pub u16);

impl PrepareFlags {
  pub const DATA: u16 = 0x0001;
  pub const TRANSACTION_BEGIN: u16 = 0x0002;
  pub const TRANSACTION_END: u16 = 0x0004;
  pub const STREAM_DELETE: u16 = 0x0008;
  pub const IS_COMMITTED: u16 = 0x0020;
  pub const IS_JSON: u16 = 0x0100;

  /// Single self-committed event / 自提交单事件
  pub const SINGLE: u16 =
    Self::DATA | Self::TRANSACTION_BEGIN | Self::TRANSACTION_END | Self::IS_COMMITTED;

  #[inline]
  pub const fn has(self, flag: u16) -> bool {
    self.0 & flag == flag
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepare {
  pub log_position: i64,
  pub transaction_position: i64,
  pub transaction_offset: i32,
  pub flags: PrepareFlags,
  pub event_number: i64,
  pub stream: String,
  pub event_id: Uuid,
  /// Unix milliseconds / 毫秒时间戳
  pub timestamp: i64,
  pub event_type: String,
  pub data: Bytes,
  pub metadata: Bytes,
}

impl Prepare {
  /// Self-committed event, position assigned on append / 自提交事件，位置在追加时分配
  pub fn event(
    stream: impl Into<String>,
    event_number: i64,
    event_type: impl Into<String>,
    data: impl Into<Bytes>,
    timestamp: i64,
  ) -> Self {
    Self {
      log_position: 0,
      transaction_position: 0,
      transaction_offset: 0,
      flags: PrepareFlags(PrepareFlags::SINGLE),
      event_number,
      stream: stream.into(),
      event_id: Uuid::new_v4(),
      timestamp,
      event_type: event_type.into(),
      data: data.into(),
      metadata: Bytes::new(),
    }
  }

  /// Metadata event written to a metastream / 写入元数据流的元数据事件
  pub fn metadata(
    metastream: impl Into<String>,
    event_number: i64,
    json: impl Into<Bytes>,
    timestamp: i64,
  ) -> Self {
    let mut p = Self::event(metastream, event_number, METADATA_EVENT_TYPE, json, timestamp);
    p.flags.0 |= PrepareFlags::IS_JSON;
    p
  }

  pub fn tombstone(stream: impl Into<String>, timestamp: i64) -> Self {
    let mut p = Self::event(
      stream,
      TOMBSTONE_EVENT_NUMBER,
      TOMBSTONE_EVENT_TYPE,
      Bytes::new(),
      timestamp,
    );
    p.flags.0 |= PrepareFlags::STREAM_DELETE;
    p
  }

  #[inline]
  pub fn is_self_committed(&self) -> bool {
    self.flags.has(PrepareFlags::IS_COMMITTED)
  }

  #[inline]
  pub fn is_tombstone(&self) -> bool {
    self.flags.has(PrepareFlags::STREAM_DELETE)
  }

  #[inline]
  pub fn is_transaction_begin(&self) -> bool {
    self.flags.has(PrepareFlags::TRANSACTION_BEGIN)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
  pub log_position: i64,
  pub transaction_position: i64,
  pub first_event_number: i64,
  pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct System {
  pub log_position: i64,
  pub timestamp: i64,
  pub kind: u8,
  pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
  Prepare(Prepare),
  Commit(Commit),
  System(System),
}

impl From<Prepare> for LogRecord {
  fn from(p: Prepare) -> Self {
    Self::Prepare(p)
  }
}

impl From<Commit> for LogRecord {
  fn from(c: Commit) -> Self {
    Self::Commit(c)
  }
}

impl From<System> for LogRecord {
  fn from(s: System) -> Self {
    Self::System(s)
  }
}

impl LogRecord {
  #[inline]
  pub fn kind(&self) -> u8 {
    match self {
      Self::Prepare(_) => KIND_PREPARE,
      Self::Commit(_) => KIND_COMMIT,
      Self::System(_) => KIND_SYSTEM,
    }
  }

  #[inline]
  pub fn log_position(&self) -> i64 {
    match self {
      Self::Prepare(p) => p.log_position,
      Self::Commit(c) => c.log_position,
      Self::System(s) => s.log_position,
    }
  }

  #[inline]
  pub fn timestamp(&self) -> i64 {
    match self {
      Self::Prepare(p) => p.timestamp,
      Self::Commit(c) => c.timestamp,
      Self::System(s) => s.timestamp,
    }
  }

  /// Assign the position the writer is about to use
  /// 设置写入位置，自提交事件的事务位置同步更新
  pub fn set_position(&mut self, pos: i64) {
    match self {
      Self::Prepare(p) => {
        if p.is_self_committed() || p.transaction_position == p.log_position {
          p.transaction_position = pos;
        }
        p.log_position = pos;
      }
      Self::Commit(c) => c.log_position = pos,
      Self::System(s) => s.log_position = pos,
    }
  }

  #[inline]
  pub fn as_prepare(&self) -> Option<&Prepare> {
    match self {
      Self::Prepare(p) => Some(p),
      _ => None,
    }
  }

  /// Global position after this record / 此记录之后的全局位置
  #[inline]
  pub fn next_log_position(&self, length: u32) -> i64 {
    self.log_position() + length as i64 + FRAME_OVERHEAD as i64
  }

  /// Fails on fields too long for their length prefix / 字段超出长度前缀时失败
  pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
    out.put_u8(self.kind());
    out.put_u8(RECORD_VERSION);
    out.put_i64_le(self.log_position());
    match self {
      Self::Prepare(p) => {
        out.put_u16_le(p.flags.0);
        out.put_i64_le(p.transaction_position);
        out.put_i32_le(p.transaction_offset);
        out.put_i64_le(p.event_number);
        put_str(out, &p.stream)?;
        out.put_slice(p.event_id.as_bytes());
        out.put_i64_le(p.timestamp);
        put_str(out, &p.event_type)?;
        put_bytes(out, &p.data)?;
        put_bytes(out, &p.metadata)?;
      }
      Self::Commit(c) => {
        out.put_i64_le(c.transaction_position);
        out.put_i64_le(c.first_event_number);
        out.put_i64_le(c.timestamp);
      }
      Self::System(s) => {
        out.put_i64_le(s.timestamp);
        out.put_u8(s.kind);
        put_bytes(out, &s.data)?;
      }
    }
    Ok(())
  }

  pub fn decode(mut buf: &[u8]) -> Result<Self> {
    need(buf, 10)?;
    let kind = buf.get_u8();
    let version = buf.get_u8();
    if version != RECORD_VERSION {
      return Err(Error::InvalidRecord(format!("unknown record version {version}")));
    }
    let log_position = buf.get_i64_le();
    let record = match kind {
      KIND_PREPARE => {
        need(buf, 22)?;
        let flags = PrepareFlags(buf.get_u16_le());
        let transaction_position = buf.get_i64_le();
        let transaction_offset = buf.get_i32_le();
        let event_number = buf.get_i64_le();
        let stream = get_str(&mut buf)?;
        need(buf, 24)?;
        let mut id = [0u8; 16];
        buf.copy_to_slice(&mut id);
        let timestamp = buf.get_i64_le();
        let event_type = get_str(&mut buf)?;
        let data = get_bytes(&mut buf)?;
        let metadata = get_bytes(&mut buf)?;
        Self::Prepare(Prepare {
          log_position,
          transaction_position,
          transaction_offset,
          flags,
          event_number,
          stream,
          event_id: Uuid::from_bytes(id),
          timestamp,
          event_type,
          data,
          metadata,
        })
      }
      KIND_COMMIT => {
        need(buf, 24)?;
        Self::Commit(Commit {
          log_position,
          transaction_position: buf.get_i64_le(),
          first_event_number: buf.get_i64_le(),
          timestamp: buf.get_i64_le(),
        })
      }
      KIND_SYSTEM => {
        need(buf, 9)?;
        let timestamp = buf.get_i64_le();
        let kind = buf.get_u8();
        let data = get_bytes(&mut buf)?;
        Self::System(System {
          log_position,
          timestamp,
          kind,
          data,
        })
      }
      k => return Err(Error::InvalidRecord(format!("unknown record kind {k}"))),
    };
    if buf.has_remaining() {
      return Err(Error::InvalidRecord(format!(
        "{} trailing bytes",
        buf.remaining()
      )));
    }
    Ok(record)
  }

  /// Encode with length prefix and suffix into `out` (cleared first)
  /// 带长度前后缀编码
  pub fn frame_into(&self, out: &mut Vec<u8>) -> Result<u32> {
    out.clear();
    out.put_u32_le(0);
    self.encode(out)?;
    let len = out.len() - 4;
    if len > MAX_RECORD_SIZE {
      return Err(Error::RecordTooLarge(len));
    }
    out.put_u32_le(len as u32);
    out[..4].copy_from_slice(&(len as u32).to_le_bytes());
    Ok(len as u32)
  }
}

#[inline]
fn need(buf: &[u8], n: usize) -> Result<()> {
  if buf.len() < n {
    return Err(Error::InvalidRecord(format!(
      "truncated: need {n} bytes, have {}",
      buf.len()
    )));
  }
  Ok(())
}

fn put_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
  let len = u16::try_from(s.len())
    .map_err(|_| Error::InvalidRecord(format!("string of {} bytes exceeds u16 prefix", s.len())))?;
  out.put_u16_le(len);
  out.put_slice(s.as_bytes());
  Ok(())
}

fn put_bytes(out: &mut Vec<u8>, b: &[u8]) -> Result<()> {
  let len = u32::try_from(b.len()).map_err(|_| Error::RecordTooLarge(b.len()))?;
  out.put_u32_le(len);
  out.put_slice(b);
  Ok(())
}

fn get_str(buf: &mut &[u8]) -> Result<String> {
  need(buf, 2)?;
  let len = buf.get_u16_le() as usize;
  need(buf, len)?;
  let s = std::str::from_utf8(&buf[..len])
    .map_err(|e| Error::InvalidRecord(e.to_string()))?
    .to_owned();
  buf.advance(len);
  Ok(s)
}

fn get_bytes(buf: &mut &[u8]) -> Result<Bytes> {
  need(buf, 4)?;
  let len = buf.get_u32_le() as usize;
  need(buf, len)?;
  let b = Bytes::copy_from_slice(&buf[..len]);
  buf.advance(len);
  Ok(b)
}
