//! Pooled reader handles and the self-destruct protocol
//! 读取句柄池与自毁协议

use std::{
  path::Path,
  sync::atomic::{AtomicBool, AtomicIsize, AtomicU8, AtomicUsize, Ordering},
};

use bytes::Bytes;
use compio::io::AsyncReadAtExt;
use compio_fs::{File, OpenOptions};
use log::info;
use parking_lot::Mutex;

use crate::{
  consts::ACQUIRE_WAIT,
  error::{Error, Result},
};

/// File-backed or memory-backed reader / 文件或内存读取器
pub(crate) enum Handle {
  File(File),
  Mem(Bytes),
}

impl Handle {
  #[inline]
  pub(crate) fn is_mem(&self) -> bool {
    matches!(self, Self::Mem(_))
  }

  /// Read exactly `len` bytes at raw file offset `pos` / 在 pos 读取 len 字节
  pub(crate) async fn read(&self, pos: u64, len: usize) -> Result<Bytes> {
    match self {
      Self::File(file) => {
        let buf = vec![0u8; len];
        let res = file.read_exact_at(buf, pos).await;
        res.0?;
        Ok(Bytes::from(res.1))
      }
      Self::Mem(data) => {
        let start = pos as usize;
        let end = start + len;
        if end > data.len() {
          return Err(Error::ReadPastEnd(format!(
            "memory read {start}..{end} of {} bytes",
            data.len()
          )));
        }
        Ok(data.slice(start..end))
      }
    }
  }
}

pub(crate) async fn open_reader(path: &Path) -> Result<File> {
  Ok(OpenOptions::new().read(true).open(path).await?)
}

/// Lifecycle of a chunk's files / 块文件生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Life {
  Open = 0,
  /// No new checkouts, waiting for handles to come back / 禁止借出，等待归还
  Draining = 1,
  Destroyed = 2,
}

impl Life {
  fn from_u8(v: u8) -> Self {
    match v {
      0 => Self::Open,
      1 => Self::Draining,
      _ => Self::Destroyed,
    }
  }
}

pub(crate) struct Pool {
  files: Mutex<Vec<File>>,
  mems: Mutex<Vec<Bytes>>,
  /// Live file handles, pooled plus checked out plus bulk readers
  /// 存活的文件句柄数（池内 + 借出 + 批量读取器）
  file_count: AtomicIsize,
  mem_count: AtomicIsize,
  /// Pooled file readers ever created / 已创建的池化文件读取器
  created: AtomicUsize,
  max: usize,
  life: AtomicU8,
  delete_file: AtomicBool,
}

impl Pool {
  pub(crate) fn new(max: usize) -> Self {
    Self {
      files: Mutex::new(Vec::new()),
      mems: Mutex::new(Vec::new()),
      file_count: AtomicIsize::new(0),
      mem_count: AtomicIsize::new(0),
      created: AtomicUsize::new(0),
      max,
      life: AtomicU8::new(Life::Open as u8),
      delete_file: AtomicBool::new(false),
    }
  }

  #[inline]
  pub(crate) fn life(&self) -> Life {
    Life::from_u8(self.life.load(Ordering::Acquire))
  }

  #[inline]
  pub(crate) fn is_draining(&self) -> bool {
    self.life() != Life::Open
  }

  pub(crate) async fn fill(&self, path: &Path, n: usize) -> Result<()> {
    for _ in 0..n {
      let file = open_reader(path).await?;
      self.created.fetch_add(1, Ordering::AcqRel);
      self.file_count.fetch_add(1, Ordering::AcqRel);
      self.files.lock().push(file);
    }
    Ok(())
  }

  /// Check out a reader, memory first / 借出读取器，优先内存
  pub(crate) async fn acquire(&self, path: &Path, retry: usize) -> Result<Handle> {
    for _ in 0..retry {
      if self.is_draining() {
        return Err(Error::FileBeingDeleted);
      }
      if let Some(data) = self.mems.lock().pop() {
        return Ok(Handle::Mem(data));
      }
      if let Some(file) = self.files.lock().pop() {
        return Ok(Handle::File(file));
      }
      if self.is_draining() {
        return Err(Error::FileBeingDeleted);
      }

      if self.created.fetch_add(1, Ordering::AcqRel) < self.max {
        self.file_count.fetch_add(1, Ordering::AcqRel);
        if self.is_draining() {
          self.created.fetch_sub(1, Ordering::AcqRel);
          self.release_file_count(path);
          return Err(Error::FileBeingDeleted);
        }
        return match open_reader(path).await {
          Ok(file) => Ok(Handle::File(file)),
          Err(e) => {
            self.created.fetch_sub(1, Ordering::AcqRel);
            self.release_file_count(path);
            Err(e)
          }
        };
      }
      self.created.fetch_sub(1, Ordering::AcqRel);
      // let the holder of a reader run and return it
      compio_runtime::time::sleep(ACQUIRE_WAIT).await;
    }
    Err(Error::ReaderPoolExhausted(path.to_path_buf()))
  }

  /// Return a reader; the last one back after deletion was requested cleans up
  /// 归还读取器；标记删除后最后归还者负责清理
  pub(crate) fn release(&self, handle: Handle, cached: bool, cache: &Mutex<Option<Bytes>>, path: &Path) {
    match handle {
      Handle::Mem(data) => {
        self.mems.lock().push(data);
        if !cached || self.is_draining() {
          self.destruct_mems(cache);
        }
      }
      Handle::File(file) => {
        self.files.lock().push(file);
        if self.is_draining() {
          self.destruct_files(path);
        }
      }
    }
  }

  /// Reserve a slot for a bulk reader / 为批量读取器预留计数
  pub(crate) fn reserve_bulk(&self, path: &Path) -> Result<()> {
    self.file_count.fetch_add(1, Ordering::AcqRel);
    if self.is_draining() {
      self.release_file_count(path);
      return Err(Error::FileBeingDeleted);
    }
    Ok(())
  }

  pub(crate) fn release_bulk(&self, path: &Path) {
    self.release_file_count(path);
  }

  fn release_file_count(&self, path: &Path) {
    let left = self.file_count.fetch_sub(1, Ordering::AcqRel) - 1;
    if left == 0 && self.is_draining() {
      self.clean_up_files(path);
    }
  }

  pub(crate) fn add_mems(&self, data: &Bytes, n: usize) {
    self.mem_count.fetch_add(n as isize, Ordering::AcqRel);
    let mut mems = self.mems.lock();
    for _ in 0..n {
      mems.push(data.clone());
    }
  }

  /// Drop pooled memory handles, freeing the buffer when none remain
  /// 丢弃池内内存句柄，无剩余时释放缓冲
  pub(crate) fn destruct_mems(&self, cache: &Mutex<Option<Bytes>>) -> bool {
    let drained = std::mem::take(&mut *self.mems.lock());
    if drained.is_empty() {
      return self.mem_count.load(Ordering::Acquire) == 0;
    }
    let n = drained.len() as isize;
    drop(drained);
    let left = self.mem_count.fetch_sub(n, Ordering::AcqRel) - n;
    if left == 0 {
      cache.lock().take();
      return true;
    }
    false
  }

  pub(crate) fn destruct_files(&self, path: &Path) {
    let drained = std::mem::take(&mut *self.files.lock());
    let n = drained.len() as isize;
    drop(drained);
    let left = self.file_count.fetch_sub(n, Ordering::AcqRel) - n;
    if left == 0 {
      self.clean_up_files(path);
    }
  }

  /// Flip to draining / 进入排空状态
  pub(crate) fn start_draining(&self, delete_file: bool) {
    if delete_file {
      self.delete_file.store(true, Ordering::Release);
    }
    let _ = self.life.compare_exchange(
      Life::Open as u8,
      Life::Draining as u8,
      Ordering::AcqRel,
      Ordering::Acquire,
    );
  }

  fn clean_up_files(&self, path: &Path) {
    if self
      .life
      .compare_exchange(
        Life::Draining as u8,
        Life::Destroyed as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_err()
    {
      return;
    }
    if self.delete_file.load(Ordering::Acquire) {
      info!("chunk {} marked for delete, deleting", path.display());
      if let Err(e) = std::fs::remove_file(path) {
        log::warn!("delete {}: {e}", path.display());
      }
    }
  }
}
