use std::sync::atomic::Ordering;

use bytes::Bytes;
use compio::io::AsyncReadAtExt;
use compio_fs::File;
use log::{debug, info};
use md5::{Digest, Md5};

use super::Chunk;
use crate::{
  consts::{CHECKSUM_SIZE, READ_BLOCK},
  error::{Error, Result},
  handle::open_reader,
};

/// Sequential whole-file reader outside the pool / 池外的顺序整文件读取器
pub struct BulkReader<'a> {
  chunk: &'a Chunk,
  file: File,
  pos: u64,
}

impl BulkReader<'_> {
  #[inline]
  pub fn position(&self) -> u64 {
    self.pos
  }

  pub fn set_position(&mut self, pos: u64) {
    self.pos = pos;
  }

  /// Read up to `len` bytes, fewer at end of file / 读取至多 len 字节
  pub async fn read(&mut self, len: usize) -> Result<Bytes> {
    let size = self.chunk.file_size();
    let n = (size.saturating_sub(self.pos)).min(len as u64) as usize;
    if n == 0 {
      return Ok(Bytes::new());
    }
    let buf = vec![0u8; n];
    let res = self.file.read_exact_at(buf, self.pos).await;
    res.0?;
    self.pos += n as u64;
    Ok(Bytes::from(res.1))
  }
}

impl Drop for BulkReader<'_> {
  fn drop(&mut self) {
    self.chunk.pool.release_bulk(&self.chunk.path);
  }
}

impl Chunk {
  pub async fn acquire_bulk(&self) -> Result<BulkReader<'_>> {
    self.pool.reserve_bulk(&self.path)?;
    match open_reader(&self.path).await {
      Ok(file) => Ok(BulkReader {
        chunk: self,
        file,
        pos: 0,
      }),
      Err(e) => {
        self.pool.release_bulk(&self.path);
        Err(e)
      }
    }
  }

  /// Recompute MD5 over the whole file and compare with the footer
  /// 重算整文件 MD5 并与块尾比较
  pub async fn verify_file_hash(&self) -> Result<()> {
    if !self.is_read_only() {
      return Err(Error::NotReadOnly);
    }
    let footer = self.completed_footer()?;
    let mut bulk = self.acquire_bulk().await?;
    let end = self.file_size() - CHECKSUM_SIZE as u64;
    let mut md5 = Md5::new();
    while bulk.position() < end {
      let n = (end - bulk.position()).min(READ_BLOCK as u64) as usize;
      let block = bulk.read(n).await?;
      if block.is_empty() {
        break;
      }
      md5.update(&block);
    }
    let sum: [u8; CHECKSUM_SIZE] = md5.finalize().into();
    if &sum != footer.checksum() {
      return Err(Error::HashMismatch(self.path.clone()));
    }
    debug!("hash verified for {self}");
    Ok(())
  }

  /// Load a completed chunk into memory and serve reads from it
  /// 将已完成块载入内存并由内存读取
  pub async fn cache_in_memory(&self) -> Result<()> {
    if !self.is_read_only() || self.pool.is_draining() {
      return Ok(());
    }
    if self.cached.swap(true, Ordering::AcqRel) {
      return Ok(());
    }

    let data = {
      let mut bulk = match self.acquire_bulk().await {
        Ok(b) => b,
        Err(e) => {
          self.cached.store(false, Ordering::Release);
          return Err(e);
        }
      };
      let mut data = Vec::with_capacity(self.file_size() as usize);
      loop {
        let block = match bulk.read(READ_BLOCK).await {
          Ok(b) => b,
          Err(e) => {
            self.cached.store(false, Ordering::Release);
            return Err(e);
          }
        };
        if block.is_empty() {
          break;
        }
        data.extend_from_slice(&block);
      }
      Bytes::from(data)
    };

    let n = self.conf.max_reader_count;
    *self.cache.lock() = Some(data.clone());
    self.pool.add_mems(&data, n);
    if self.pool.is_draining() {
      self.pool.destruct_mems(&self.cache);
      return Ok(());
    }
    self.read_side.uncache();
    info!("cached {self} in memory ({} bytes)", data.len());
    Ok(())
  }

  /// Stop serving from memory; memory is freed as readers return
  /// 停止内存读取，读取器归还后释放内存
  pub fn uncache_from_memory(&self) {
    if !self.cached.swap(false, Ordering::AcqRel) {
      return;
    }
    self.read_side.request_caching();
    if self.pool.destruct_mems(&self.cache) {
      debug!("uncached {self}");
    }
  }
}
