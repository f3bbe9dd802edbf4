use std::sync::Arc;

use log::debug;
use tf_chunk::{Append, Chunk, LogRecord};

use super::ChunkDb;
use crate::error::{Error, Result};

impl ChunkDb {
  /// Append a record at the writer position, rolling to a new chunk when full.
  /// Returns the record's log position.
  /// 在写入位置追加记录，块满时换块，返回记录位置
  pub async fn append(&self, record: &mut LogRecord) -> Result<i64> {
    if self.conf.read_only {
      return Err(Error::ReadOnly);
    }
    let _g = self.write.lock().await;
    loop {
      let chunk = self.writable().await?;
      let pos = self.writer.read();
      record.set_position(pos);
      match chunk.append(record).await? {
        Append::Written { next, .. } => {
          self.writer.write(chunk.header().start_position() + next as i64);
          return Ok(pos);
        }
        Append::Full(at) => {
          if at == 0 {
            let mut buf = Vec::new();
            let len = record.frame_into(&mut buf)?;
            return Err(Error::RecordTooLarge(len as u64));
          }
          self.roll(&chunk).await?;
        }
      }
    }
  }

  /// fsync the open chunk, then persist the writer checkpoint
  /// 同步当前块后持久化写入检查点
  pub async fn flush(&self) -> Result<()> {
    if self.conf.read_only {
      return Ok(());
    }
    if let Some(c) = self.manager.last()
      && !c.is_read_only()
    {
      c.flush().await?;
    }
    self.writer.flush().await
  }

  /// Seal the open chunk and start the next one / 封存当前块并开启下一块
  pub async fn complete_chunk(&self) -> Result<()> {
    if self.conf.read_only {
      return Err(Error::ReadOnly);
    }
    let _g = self.write.lock().await;
    let chunk = self.writable().await?;
    self.roll(&chunk).await?;
    Ok(())
  }

  async fn writable(&self) -> Result<Arc<Chunk>> {
    match self.manager.last() {
      Some(c) if !c.is_read_only() => Ok(c),
      _ => self.add_new_chunk().await,
    }
  }

  async fn roll(&self, chunk: &Chunk) -> Result<()> {
    chunk.complete().await?;
    self.writer.write(chunk.header().end_position());
    self.writer.flush().await?;
    debug!("rolled past {chunk}");
    self.add_new_chunk().await?;
    self.manager.refresh_cache(self.conf.cached_chunks).await;
    Ok(())
  }

  pub(crate) async fn add_new_chunk(&self) -> Result<Arc<Chunk>> {
    let num = self.manager.len();
    let path = self.naming.path(num, 0);
    let chunk = Arc::new(
      Chunk::create_new(&path, self.conf.chunk_size, num, num, false, self.conf.chunk).await?,
    );
    self.manager.add(chunk.clone());
    Ok(chunk)
  }
}
