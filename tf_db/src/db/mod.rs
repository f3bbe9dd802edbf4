//! Chunk database / 块数据库

mod open;
mod read;
mod switch;
mod write;

use std::{
  fs::File,
  path::{Path, PathBuf},
  sync::Arc,
};

use log::info;
use tf_chunk::Chunk;

use crate::{
  checkpoint::FileCheckpoint, conf::DbConf, error::Result, manager::Manager, naming::Naming,
};

pub struct ChunkDb {
  conf: DbConf,
  naming: Naming,
  manager: Manager,
  writer: FileCheckpoint,
  chaser: FileCheckpoint,
  epoch: FileCheckpoint,
  /// Serializes appends and chunk rolls / 串行化追加与换块
  write: futures::lock::Mutex<()>,
  _lock: File,
}

impl ChunkDb {
  #[inline]
  pub fn dir(&self) -> &Path {
    self.naming.dir()
  }

  #[inline]
  pub fn conf(&self) -> &DbConf {
    &self.conf
  }

  #[inline]
  pub fn chunk_size(&self) -> u32 {
    self.conf.chunk_size
  }

  #[inline]
  pub fn naming(&self) -> &Naming {
    &self.naming
  }

  #[inline]
  pub fn manager(&self) -> &Manager {
    &self.manager
  }

  /// Global position of the next append / 下次追加的全局位置
  #[inline]
  pub fn writer_checkpoint(&self) -> i64 {
    self.writer.read()
  }

  #[inline]
  pub fn writer(&self) -> &FileCheckpoint {
    &self.writer
  }

  #[inline]
  pub fn chaser(&self) -> &FileCheckpoint {
    &self.chaser
  }

  #[inline]
  pub fn epoch(&self) -> &FileCheckpoint {
    &self.epoch
  }

  pub fn get_chunk(&self, num: u32) -> Option<Arc<Chunk>> {
    self.manager.get(num)
  }

  pub fn get_chunk_for(&self, pos: i64) -> Option<Arc<Chunk>> {
    if pos < 0 {
      return None;
    }
    self.manager.get((pos / self.conf.chunk_size as i64) as u32)
  }

  /// Distinct chunks in log order / 按日志顺序的块
  pub fn chunks(&self) -> Vec<Arc<Chunk>> {
    self.manager.physical()
  }

  pub fn chunk_path(&self, start: u32, version: u32) -> PathBuf {
    self.naming.path(start, version)
  }

  /// Flush everything and release the chunk files / 刷盘并释放块文件
  pub async fn close(&self) -> Result<()> {
    if !self.conf.read_only {
      self.flush().await?;
      self.chaser.flush().await?;
      self.epoch.flush().await?;
    }
    for c in self.manager.take_all() {
      c.dispose();
    }
    info!("closed chunk db {}", self.dir().display());
    Ok(())
  }
}
