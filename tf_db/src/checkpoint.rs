//! Durable position counters / 持久化位置计数
//!
//! File layout: `value:i64 LE | crc32:u32 LE`, replaced atomically
//! 文件格式：值 + crc32，原子替换

use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::atomic::{AtomicI64, Ordering},
};

use compio::io::AsyncWriteAtExt;
use compio_fs::OpenOptions;
use log::debug;

use crate::{
  consts::TMP_EXT,
  error::{Corruption, Result},
};

const LEN: usize = 12;

pub struct FileCheckpoint {
  name: &'static str,
  path: PathBuf,
  value: AtomicI64,
  flushed: AtomicI64,
  flush_lock: futures::lock::Mutex<()>,
}

fn encode(v: i64) -> Vec<u8> {
  let mut buf = Vec::with_capacity(LEN);
  buf.extend_from_slice(&v.to_le_bytes());
  buf.extend_from_slice(&crc32fast::hash(&buf).to_le_bytes());
  buf
}

fn decode(raw: &[u8]) -> Option<i64> {
  if raw.len() != LEN {
    return None;
  }
  let (v, crc) = raw.split_at(8);
  if crc32fast::hash(v).to_le_bytes() != crc {
    return None;
  }
  Some(i64::from_le_bytes(v.try_into().ok()?))
}

impl FileCheckpoint {
  /// Load `dir/name`, `init` when absent / 加载检查点，不存在时用 init
  pub fn open(dir: &Path, name: &'static str, init: i64) -> Result<Self> {
    let path = dir.join(name);
    let value = match std::fs::read(&path) {
      Ok(raw) => decode(&raw).ok_or_else(|| Corruption::BadCheckpoint(path.clone()))?,
      Err(e) if e.kind() == ErrorKind::NotFound => init,
      Err(e) => return Err(e.into()),
    };
    Ok(Self {
      name,
      path,
      value: AtomicI64::new(value),
      flushed: AtomicI64::new(value),
      flush_lock: futures::lock::Mutex::new(()),
    })
  }

  #[inline]
  pub fn name(&self) -> &'static str {
    self.name
  }

  #[inline]
  pub fn read(&self) -> i64 {
    self.value.load(Ordering::Acquire)
  }

  /// Last durable value / 最近持久化的值
  #[inline]
  pub fn read_flushed(&self) -> i64 {
    self.flushed.load(Ordering::Acquire)
  }

  #[inline]
  pub fn write(&self, v: i64) {
    self.value.store(v, Ordering::Release);
  }

  pub async fn flush(&self) -> Result<()> {
    let _g = self.flush_lock.lock().await;
    let v = self.read();
    if v == self.read_flushed() && self.path.exists() {
      return Ok(());
    }
    let tmp = self.path.with_extension(TMP_EXT);
    {
      let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)
        .await?;
      file.write_all_at(encode(v), 0).await.0?;
      file.sync_all().await?;
    }
    compio_fs::rename(&tmp, &self.path).await?;
    self.flushed.store(v, Ordering::Release);
    debug!("checkpoint {} flushed at {v}", self.name);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codec() {
    let raw = encode(-7);
    assert_eq!(decode(&raw), Some(-7));
    let mut bad = raw.clone();
    bad[0] ^= 1;
    assert_eq!(decode(&bad), None);
    assert_eq!(decode(&raw[..8]), None);
  }
}
