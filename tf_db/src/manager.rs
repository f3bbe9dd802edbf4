//! Logical chunk number to chunk mapping / 逻辑块号到块的映射

use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;
use tf_chunk::Chunk;

use crate::error::{Error, Result};

/// A merged chunk occupies every slot in `start..=end` / 合并块占据 start..=end 的所有槽
#[derive(Default)]
pub struct Manager {
  slots: RwLock<Vec<Option<Arc<Chunk>>>>,
}

impl Manager {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, chunk: Arc<Chunk>) {
    let (start, end) = (chunk.header().start() as usize, chunk.header().end() as usize);
    let mut slots = self.slots.write();
    if slots.len() <= end {
      slots.resize(end + 1, None);
    }
    for slot in &mut slots[start..=end] {
      *slot = Some(chunk.clone());
    }
  }

  pub fn get(&self, num: u32) -> Option<Arc<Chunk>> {
    self.slots.read().get(num as usize).cloned().flatten()
  }

  /// Logical chunk count / 逻辑块数
  pub fn len(&self) -> u32 {
    self.slots.read().len() as u32
  }

  pub fn is_empty(&self) -> bool {
    self.slots.read().is_empty()
  }

  pub fn last(&self) -> Option<Arc<Chunk>> {
    self.slots.read().last().cloned().flatten()
  }

  /// Distinct chunks in log order / 按日志顺序的去重块列表
  pub fn physical(&self) -> Vec<Arc<Chunk>> {
    let slots = self.slots.read();
    let mut out = Vec::new();
    let mut num = 0;
    while num < slots.len() {
      match &slots[num] {
        Some(c) => {
          out.push(c.clone());
          num = c.header().end() as usize + 1;
        }
        None => num += 1,
      }
    }
    out
  }

  /// Install `chunk` over its range, returning the chunks it replaced
  /// 用新块覆盖其范围，返回被替换的块
  pub fn replace(&self, chunk: Arc<Chunk>) -> Result<Vec<Arc<Chunk>>> {
    let (start, end) = (chunk.header().start(), chunk.header().end());
    let mut slots = self.slots.write();
    if end as usize >= slots.len() {
      return Err(Error::InvalidSwitch(format!(
        "{chunk} reaches past the last chunk #{}",
        slots.len()
      )));
    }

    let mut old: Vec<Arc<Chunk>> = Vec::new();
    for num in start..=end {
      let Some(c) = &slots[num as usize] else {
        return Err(Error::InvalidSwitch(format!("slot #{num} is empty")));
      };
      let h = c.header();
      if h.start() < start || h.end() > end {
        return Err(Error::InvalidSwitch(format!(
          "{chunk} cuts through existing {c}"
        )));
      }
      if !c.is_read_only() {
        return Err(Error::InvalidSwitch(format!("{c} is still being written")));
      }
      if !old.iter().any(|o| Arc::ptr_eq(o, c)) {
        old.push(c.clone());
      }
    }
    for slot in &mut slots[start as usize..=end as usize] {
      *slot = Some(chunk.clone());
    }
    Ok(old)
  }

  /// Empty the map, returning every chunk / 清空并返回全部块
  pub fn take_all(&self) -> Vec<Arc<Chunk>> {
    let chunks = self.physical();
    self.slots.write().clear();
    chunks
  }

  pub async fn refresh_cache(&self, cached_chunks: usize) {
    let mut n = 0;
    for c in self.physical().iter().rev() {
      if !c.is_read_only() {
        continue;
      }
      if n < cached_chunks {
        n += 1;
        if let Err(e) = c.cache_in_memory().await {
          warn!("cache {c}: {e}");
        }
      } else {
        c.uncache_from_memory();
      }
    }
  }
}
