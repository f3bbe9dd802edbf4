use std::{sync::Arc, time::Duration};

use log::info;
use tf_chunk::Chunk;

use super::ChunkDb;
use crate::{
  consts::DESTROY_WAIT_MS,
  error::{Error, Result},
};

impl ChunkDb {
  /// Empty scavenged chunk covering `start..=end` under a temp name
  /// 以临时文件名新建覆盖 start..=end 的已清理块
  pub async fn new_scavenge_chunk(&self, start: u32, end: u32) -> Result<Chunk> {
    let path = self.naming.scavenge_temp();
    Ok(Chunk::create_new(&path, self.conf.chunk_size, start, end, true, self.conf.chunk).await?)
  }

  /// Install a completed scavenged chunk in place of the chunks it covers.
  /// The replaced chunks are deleted once their readers are done.
  /// 用已完成的清理块替换其覆盖的旧块，旧块在读取器归还后删除
  pub async fn switch_chunk(&self, chunk: Chunk) -> Result<Arc<Chunk>> {
    if !chunk.is_read_only() {
      return Err(Error::InvalidSwitch(format!("{chunk} is not completed")));
    }
    let (start, end) = (chunk.header().start(), chunk.header().end());
    if end >= self.manager.len() {
      return Err(Error::InvalidSwitch(format!(
        "{chunk} reaches past the last chunk #{}",
        self.manager.len()
      )));
    }

    let tmp = chunk.path().to_path_buf();
    chunk.dispose();
    chunk
      .wait_for_destroy(Duration::from_millis(DESTROY_WAIT_MS))
      .await?;
    drop(chunk);

    let version = self.naming.next_version(start)?;
    let path = self.naming.path(start, version);
    compio_fs::rename(&tmp, &path).await?;
    let new = Arc::new(Chunk::open_completed(&path, false, self.conf.chunk).await?);

    let old = match self.manager.replace(new.clone()) {
      Ok(old) => old,
      Err(e) => {
        new.mark_for_deletion();
        return Err(e);
      }
    };
    for o in &old {
      o.mark_for_deletion();
    }
    info!(
      "switched chunks #{start}-{end} to {new}, replacing {}",
      old.len()
    );
    self.manager.refresh_cache(self.conf.cached_chunks).await;
    Ok(new)
  }
}
