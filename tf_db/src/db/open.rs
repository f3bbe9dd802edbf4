use std::{path::Path, sync::Arc};

use fs4::fs_std::FileExt;
use log::{info, warn};
use tf_chunk::Chunk;

use super::ChunkDb;
use crate::{
  checkpoint::FileCheckpoint,
  conf::{Conf, DbConf},
  consts::{CHASER_CHK, EPOCH_CHK, LOCK_FILE, WRITER_CHK},
  error::{Corruption, Error, Result},
  manager::Manager,
  naming::Naming,
};

impl ChunkDb {
  /// Open the database, validating the chunk chain against the writer checkpoint
  /// 打开数据库，按写入检查点校验块链
  pub async fn open(dir: impl AsRef<Path>, conf: &[Conf]) -> Result<Self> {
    let dir = dir.as_ref();
    let conf = DbConf::parse(conf);
    std::fs::create_dir_all(dir)?;

    let lock = std::fs::OpenOptions::new()
      .create(true)
      .truncate(false)
      .write(true)
      .open(dir.join(LOCK_FILE))?;
    if !lock.try_lock_exclusive()? {
      return Err(Error::Locked(dir.to_path_buf()));
    }

    let db = Self {
      naming: Naming::new(dir),
      manager: Manager::new(),
      writer: FileCheckpoint::open(dir, WRITER_CHK, 0)?,
      chaser: FileCheckpoint::open(dir, CHASER_CHK, 0)?,
      epoch: FileCheckpoint::open(dir, EPOCH_CHK, -1)?,
      write: futures::lock::Mutex::new(()),
      _lock: lock,
      conf,
    };
    if let Err(e) = db.load().await {
      for c in db.manager.take_all() {
        c.dispose();
      }
      return Err(e);
    }
    Ok(db)
  }

  async fn load(&self) -> Result<()> {
    let writer = self.writer.read();
    for chk in [&self.chaser, &self.epoch] {
      if chk.read() > writer {
        return Err(
          Corruption::ReaderCheckpointHigherThanWriter {
            name: chk.name(),
            value: chk.read(),
            writer,
          }
          .into(),
        );
      }
    }

    let chunk_size = self.conf.chunk_size as i64;
    let last_num = (writer / chunk_size) as u32;
    let last_exists = self.naming.latest(last_num)?.is_some();
    let mut num = 0u32;
    while num < last_num {
      let Some(path) = self.naming.latest(num)? else {
        return Err(Corruption::ChunkNotFound(self.naming.path(num, 0)).into());
      };
      let (header, footer) = Chunk::peek(&path).await?;
      let chunk = if footer.is_none()
        && !last_exists
        && header.end() + 1 == last_num
        && header.end_position() == writer
      {
        // writer reached the end before the footer landed
        info!("completing {} left open at the chunk boundary", path.display());
        let c = Chunk::open_ongoing(&path, self.conf.chunk_size as u64, self.conf.chunk).await?;
        c.complete().await?;
        c
      } else {
        Chunk::open_completed(&path, false, self.conf.chunk).await?
      };
      num = chunk.header().end() + 1;
      self.manager.add(Arc::new(chunk));
    }

    let mut need_new = false;
    if num > last_num {
      // a scavenged chunk spans the writer position
      let Some(last) = self.manager.last() else {
        return Err(Corruption::ChunkNotFound(self.naming.path(last_num, 0)).into());
      };
      self.accept_scavenged_last(&last, writer)?;
      need_new = true;
    } else {
      match self.naming.latest(last_num)? {
        None => {
          if writer != last_num as i64 * chunk_size {
            return Err(Corruption::ChunkNotFound(self.naming.path(last_num, 0)).into());
          }
          need_new = self.conf.create_new_chunks;
        }
        Some(path) => {
          let (header, _) = Chunk::peek(&path).await?;
          let local = header.local_position(writer);
          if header.is_scavenged() {
            let chunk = Arc::new(Chunk::open_completed(&path, false, self.conf.chunk).await?);
            self.manager.add(chunk.clone());
            self.accept_scavenged_last(&chunk, writer)?;
            need_new = true;
          } else {
            let chunk = Chunk::open_ongoing(&path, local as u64, self.conf.chunk).await?;
            self.manager.add(Arc::new(chunk));
          }
        }
      }
    }

    self.ensure_no_excess()?;
    self.remove_stale()?;
    if self.conf.verify_hash {
      for c in self.manager.physical() {
        if c.is_read_only() {
          c.verify_file_hash().await?;
        }
      }
    }

    if need_new && !self.conf.read_only {
      if let Some(last) = self.manager.last()
        && last.is_read_only()
      {
        self.writer.write(last.header().end_position());
        self.writer.flush().await?;
      }
      self.add_new_chunk().await?;
    }
    self.manager.refresh_cache(self.conf.cached_chunks).await;
    info!(
      "opened chunk db {} with {} chunks, writer at {}",
      self.dir().display(),
      self.manager.len(),
      self.writer.read()
    );
    Ok(())
  }

  /// A scavenged last chunk must end exactly where the writer is
  /// 已清理的末块必须恰好结束于写入位置
  fn accept_scavenged_last(&self, chunk: &Chunk, writer: i64) -> Result<()> {
    let local = chunk.header().local_position(writer);
    let logical = chunk.logical_data_size() as i64;
    if logical != local {
      return Err(
        Corruption::BadChunk(format!(
          "chunk {chunk} is corrupted: expected local position {local}, but logical data size is {logical} (physical {}), writer checkpoint {writer}",
          chunk.physical_data_size()
        ))
        .into(),
      );
    }
    if !self.conf.read_only {
      warn!(
        "moving writer checkpoint from {writer} to {}, it points into scavenged {chunk}",
        chunk.header().end_position()
      );
    }
    Ok(())
  }

  /// Files past the chain: one fresh next chunk is dropped, anything else is corruption
  /// 链之后的文件：仅允许删除一个新建的下一块
  fn ensure_no_excess(&self) -> Result<()> {
    let next = self.manager.len();
    let extra: Vec<_> = self
      .naming
      .all()?
      .into_iter()
      .filter(|f| f.start >= next)
      .collect();
    match extra.as_slice() {
      [] => Ok(()),
      [f] if f.start == next && f.version == 0 => {
        warn!("removing excess chunk {}", f.path.display());
        std::fs::remove_file(&f.path)?;
        Ok(())
      }
      _ => Err(Corruption::ExtraneousFiles(extra.into_iter().map(|f| f.path).collect()).into()),
    }
  }

  /// Old versions, files covered by merged chunks and leftover temp files
  /// 删除旧版本、被合并覆盖的文件与临时文件
  fn remove_stale(&self) -> Result<()> {
    for f in self.naming.all()? {
      let Some(owner) = self.manager.get(f.start) else {
        continue;
      };
      if owner.path() != f.path {
        info!("removing stale chunk file {}", f.path.display());
        std::fs::remove_file(&f.path)?;
      }
    }
    for tmp in self.naming.temp_files()? {
      info!("removing temp file {}", tmp.display());
      std::fs::remove_file(&tmp)?;
    }
    Ok(())
  }
}
