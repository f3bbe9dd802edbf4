use tf_chunk::LogRecord;

use super::ChunkDb;
use crate::error::{Error, Result};

/// Chunks switched away under a reader are retried this often / 读取时块被替换的重试次数
const SWITCH_RETRY: usize = 3;

fn switched(e: &Error) -> bool {
  matches!(e, Error::Chunk(tf_chunk::Error::FileBeingDeleted))
}

impl ChunkDb {
  /// Record starting exactly at global `pos` / 全局位置 pos 处的记录
  pub async fn read_record_at(&self, pos: i64) -> Result<Option<LogRecord>> {
    let mut retry = 0;
    loop {
      let Some(chunk) = self.get_chunk_for(pos) else {
        return Ok(None);
      };
      let local = chunk.header().local_position(pos);
      match chunk.try_read_at(local, true).await {
        Ok(r) => return Ok(r.map(|r| r.record)),
        Err(e) => {
          let e = Error::from(e);
          if !switched(&e) || retry == SWITCH_RETRY {
            return Err(e);
          }
          retry += 1;
        }
      }
    }
  }

  pub async fn exists_at(&self, pos: i64) -> Result<bool> {
    let mut retry = 0;
    loop {
      let Some(chunk) = self.get_chunk_for(pos) else {
        return Ok(false);
      };
      match chunk.exists_at(chunk.header().local_position(pos)).await {
        Ok(b) => return Ok(b),
        Err(e) => {
          let e = Error::from(e);
          if !switched(&e) || retry == SWITCH_RETRY {
            return Err(e);
          }
          retry += 1;
        }
      }
    }
  }

  /// First record at or after global `pos`, with the position after it
  /// pos 处或之后的第一条记录及其后位置
  pub async fn read_forward(&self, mut pos: i64) -> Result<Option<(LogRecord, i64)>> {
    let mut retry = 0;
    while pos < self.writer.read() {
      let Some(chunk) = self.get_chunk_for(pos) else {
        return Ok(None);
      };
      let local = chunk.header().local_position(pos);
      match chunk.try_read_closest_forward(local).await {
        Ok(Some(r)) => {
          return Ok(Some((r.record, chunk.header().start_position() + r.next)));
        }
        Ok(None) => pos = chunk.header().end_position(),
        Err(e) => {
          let e = Error::from(e);
          if !switched(&e) || retry == SWITCH_RETRY {
            return Err(e);
          }
          retry += 1;
        }
      }
    }
    Ok(None)
  }

  /// Every record from `pos` up to the writer / 从 pos 到写入位置的全部记录
  pub async fn read_all_from(&self, mut pos: i64) -> Result<Vec<LogRecord>> {
    let mut out = Vec::new();
    while let Some((rec, next)) = self.read_forward(pos).await? {
      out.push(rec);
      pos = next;
    }
    Ok(out)
  }
}
