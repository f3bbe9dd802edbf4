use std::sync::atomic::Ordering;

use compio::io::AsyncWriteAtExt;
use log::{debug, info};
use md5::Digest;
use zerocopy::IntoBytes;

use super::{Chunk, Writer};
use crate::{
  consts::{FOOTER_SIZE, HEADER_SIZE, VERSION_ALIGNED, aligned_size},
  error::{Error, Result},
  footer::ChunkFooter,
  pos_map::{PosMap, PosMapFormat},
  record::LogRecord,
};

/// Outcome of an append / 追加结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
  /// `pos` is where the record starts, `next` the next write position
  Written { pos: u64, next: u64 },
  /// Record does not fit, nothing written / 放不下，未写入
  Full(u64),
}

impl Append {
  #[inline]
  pub fn is_written(&self) -> bool {
    matches!(self, Self::Written { .. })
  }
}

async fn write_tracked(w: &mut Writer, data: Vec<u8>) -> Result<Vec<u8>> {
  let n = data.len() as u64;
  w.md5.update(&data);
  let res = w.file.write_all_at(data, w.pos).await;
  res.0?;
  w.pos += n;
  Ok(res.1)
}

impl Chunk {
  /// Append one framed record / 追加一条带帧记录
  pub async fn append(&self, record: &LogRecord) -> Result<Append> {
    let mut guard = self.writer.lock().await;
    let w = guard.as_mut().ok_or(Error::ReadOnly)?;
    if w.raw_len.is_some() {
      return Err(Error::ReadOnly);
    }

    let mut buf = std::mem::take(&mut w.buf);
    let length = match record.frame_into(&mut buf) {
      Ok(n) => n,
      Err(e) => {
        w.buf = buf;
        return Err(e);
      }
    };
    let start = w.pos - HEADER_SIZE as u64;
    if w.pos + buf.len() as u64 > HEADER_SIZE as u64 + self.header.chunk_size() as u64 {
      w.buf = buf;
      return Ok(Append::Full(start));
    }

    let n = buf.len() as u64;
    w.md5.update(&buf);
    let res = w.file.write_all_at(buf, w.pos).await;
    w.buf = res.1;
    res.0?;
    w.pos += n;

    let physical = w.pos - HEADER_SIZE as u64;
    let logical = if self.is_scavenged() {
      let end = self
        .header
        .local_position(record.next_log_position(length));
      if end < physical as i64 {
        return Err(Error::InvalidRecord(format!(
          "logical end {end} behind physical size {physical} in {self}"
        )));
      }
      end as u64
    } else {
      physical
    };
    self.set_sizes(physical, logical);
    self.file_size.store(w.pos, Ordering::Release);
    Ok(Append::Written {
      pos: start,
      next: physical,
    })
  }

  /// Append raw bytes to a raw copy, false if they overflow the target length
  /// 向原始复制块追加字节，超出目标长度返回 false
  pub async fn append_raw(&self, data: &[u8]) -> Result<bool> {
    let mut guard = self.writer.lock().await;
    let w = guard.as_mut().ok_or(Error::ReadOnly)?;
    let raw_len = w.raw_len.ok_or(Error::NotRaw)?;
    if w.pos + data.len() as u64 > raw_len {
      return Ok(false);
    }
    write_tracked(w, data.to_vec()).await?;
    self.file_size.store(w.pos, Ordering::Release);
    Ok(true)
  }

  /// fsync the writer / 同步写入
  pub async fn flush(&self) -> Result<()> {
    let guard = self.writer.lock().await;
    if let Some(w) = guard.as_ref() {
      w.file.sync_all().await?;
    }
    Ok(())
  }

  /// Seal an unscavenged chunk / 封存未清理块
  pub async fn complete(&self) -> Result<()> {
    if self.is_scavenged() {
      return Err(Error::ScavengedMismatch(
        "scavenged chunk must be completed with a position map",
      ));
    }
    self.seal(None).await
  }

  /// Seal a scavenged chunk with its position map / 带位置映射封存已清理块
  pub async fn complete_scavenged(&self, map: &[PosMap]) -> Result<()> {
    if !self.is_scavenged() {
      return Err(Error::ScavengedMismatch(
        "unscavenged chunk cannot carry a position map",
      ));
    }
    self.seal(Some(map)).await
  }

  async fn seal(&self, map: Option<&[PosMap]>) -> Result<()> {
    let mut guard = self.writer.lock().await;
    let Some(mut w) = guard.take() else {
      return Err(Error::ReadOnly);
    };
    if w.raw_len.is_some() {
      *guard = Some(w);
      return Err(Error::NotRaw);
    }
    match self.write_footer(&mut w, map).await {
      Ok(footer) => {
        self.file_size.store(w.pos, Ordering::Release);
        *self.footer.write() = Some(footer);
        self.read_only.store(true, Ordering::Release);
        info!(
          "completed {self}: physical {} logical {} map {}",
          footer.physical_data_size(),
          footer.logical_data_size(),
          footer.map_count()
        );
        Ok(())
      }
      Err(e) => {
        *guard = Some(w);
        Err(e)
      }
    }
  }

  async fn write_footer(&self, w: &mut Writer, map: Option<&[PosMap]>) -> Result<ChunkFooter> {
    let format = PosMapFormat::Full;
    let physical = w.pos - HEADER_SIZE as u64;
    let logical = self.logical_data_size();

    let mut map_size = 0;
    if let Some(map) = map
      && !map.is_empty()
    {
      let bytes = PosMap::encode_all(map, format);
      map_size = bytes.len() as u32;
      write_tracked(w, bytes).await?;
    }

    if self.header.version() >= VERSION_ALIGNED {
      let total = aligned_size(w.pos + FOOTER_SIZE as u64);
      let pad = total - FOOTER_SIZE as u64 - w.pos;
      if pad > 0 {
        write_tracked(w, vec![0u8; pad as usize]).await?;
      }
    }

    let footer = ChunkFooter::new(format, physical as u32, logical, map_size, [0; 16]);
    w.md5.update(footer.hashed_bytes());
    let checksum: [u8; 16] = std::mem::take(&mut w.md5).finalize().into();
    let footer = footer.with_checksum(checksum);

    let res = w.file.write_all_at(footer.as_bytes().to_vec(), w.pos).await;
    res.0?;
    w.pos += FOOTER_SIZE as u64;
    w.file.sync_all().await?;
    debug!("footer of {self} at {}", w.pos - FOOTER_SIZE as u64);
    Ok(footer)
  }

  /// Seal a raw copy once every byte has arrived / 原始复制写满后封存
  pub async fn complete_raw(&self) -> Result<()> {
    let mut guard = self.writer.lock().await;
    let Some(w) = guard.take() else {
      return Err(Error::ReadOnly);
    };
    let Some(raw_len) = w.raw_len else {
      *guard = Some(w);
      return Err(Error::NotRaw);
    };
    if w.pos != raw_len {
      let pos = w.pos;
      *guard = Some(w);
      return Err(Error::NotFullyWritten(pos, raw_len));
    }
    w.file.sync_all().await?;
    drop(w);

    let reader = self.reader().await?;
    let raw = reader
      .read(raw_len - FOOTER_SIZE as u64, FOOTER_SIZE)
      .await?;
    drop(reader);
    let footer = ChunkFooter::decode(&raw)
      .filter(|f| f.is_completed())
      .ok_or_else(|| crate::error::corrupt(&self.path, "raw copy without completed footer"))?;
    self.set_sizes(footer.physical_data_size(), footer.logical_data_size());
    self.file_size.store(raw_len, Ordering::Release);
    *self.footer.write() = Some(footer);
    self.read_only.store(true, Ordering::Release);
    Ok(())
  }
}
