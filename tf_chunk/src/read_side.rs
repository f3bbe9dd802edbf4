//! Read strategy chosen once when a chunk is opened
//! 打开块时选定的读取策略

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;

use crate::pos_map::Midpoint;

pub enum ReadSide {
  /// Logical position equals physical position / 逻辑位置即物理位置
  Unscavenged,
  /// Translated through the position map / 通过位置映射转换
  Scavenged(Scavenged),
}

pub struct Scavenged {
  want: AtomicBool,
  midpoints: RwLock<Option<Arc<[Midpoint]>>>,
  /// Serializes midpoint population / 串行化中点构建
  pub(crate) populate: futures::lock::Mutex<()>,
}

impl ReadSide {
  pub(crate) fn new(scavenged: bool, want_midpoints: bool) -> Self {
    if scavenged {
      Self::Scavenged(Scavenged {
        want: AtomicBool::new(want_midpoints),
        midpoints: RwLock::new(None),
        populate: futures::lock::Mutex::new(()),
      })
    } else {
      Self::Unscavenged
    }
  }

  #[inline]
  pub fn is_scavenged(&self) -> bool {
    matches!(self, Self::Scavenged(_))
  }

  /// Build midpoints lazily on the next file read / 下次文件读取时构建中点
  pub fn request_caching(&self) {
    if let Self::Scavenged(s) = self {
      s.want.store(true, Ordering::Release);
    }
  }

  /// Drop midpoints / 丢弃中点
  pub fn uncache(&self) {
    if let Self::Scavenged(s) = self {
      s.want.store(false, Ordering::Release);
      s.midpoints.write().take();
    }
  }

  /// Cached midpoint count / 已缓存中点数
  pub fn midpoint_count(&self) -> Option<usize> {
    match self {
      Self::Scavenged(s) => s.get().map(|m| m.len()),
      Self::Unscavenged => None,
    }
  }
}

impl Scavenged {
  #[inline]
  pub(crate) fn wants(&self) -> bool {
    self.want.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn get(&self) -> Option<Arc<[Midpoint]>> {
    self.midpoints.read().clone()
  }

  pub(crate) fn set(&self, midpoints: Arc<[Midpoint]>) {
    *self.midpoints.write() = Some(midpoints);
  }
}
