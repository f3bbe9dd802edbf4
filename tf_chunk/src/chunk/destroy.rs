use std::time::{Duration, Instant};

use log::info;

use super::Chunk;
use crate::{
  error::{Error, Result},
  handle::Life,
};

const POLL: Duration = Duration::from_millis(5);

impl Chunk {
  /// Close without deleting once readers return / 读取器归还后关闭，不删除
  pub fn dispose(&self) {
    self.destroy(false);
  }

  /// Delete once readers return / 读取器归还后删除
  pub fn mark_for_deletion(&self) {
    info!("marking {self} for deletion");
    self.destroy(true);
  }

  /// Abandon an ongoing chunk / 放弃写入中块
  pub fn abort(&self, delete: bool) {
    if self.is_read_only() {
      log::warn!("abort called on completed {self}");
    }
    self.destroy(delete);
  }

  fn destroy(&self, delete: bool) {
    self.pool.start_draining(delete);
    if let Some(mut w) = self.writer.try_lock() {
      w.take();
    }
    self.pool.destruct_files(&self.path);
    self.pool.destruct_mems(&self.cache);
  }

  /// Wait until every handle is back and the files are released
  /// 等待所有句柄归还且文件释放
  pub async fn wait_for_destroy(&self, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while self.life() != Life::Destroyed {
      if Instant::now() >= deadline {
        return Err(Error::Io(std::io::Error::new(
          std::io::ErrorKind::TimedOut,
          format!("{self} not destroyed within {timeout:?}"),
        )));
      }
      compio_runtime::time::sleep(POLL).await;
    }
    Ok(())
  }
}
