//! Whole-chunk removal by retention period / 按保留期整块移除

use std::time::Duration;

use log::info;
use tf_chunk::Chunk;
use tf_db::ChunkDb;

use crate::{error::Result, point::ScavengePoint, state::StateWorker};

/// Removes chunks whose every record is older than the retention period.
/// Without a period every chunk is retained.
/// 移除所有记录都早于保留期的块，未设置保留期时全部保留
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkRemover {
  retain: Option<Duration>,
}

impl ChunkRemover {
  pub fn new(retain: Option<Duration>) -> Self {
    Self { retain }
  }

  pub fn retain(&self) -> Option<Duration> {
    self.retain
  }

  /// Swap in an empty scavenged chunk when nothing must be retained.
  /// The old chunk goes once its readers are done.
  /// 无需保留时换入空的已清理块，旧块在读取器归还后删除
  pub async fn start_removing_if_not_retained(
    &self,
    db: &ChunkDb,
    sp: &ScavengePoint,
    worker: &StateWorker,
    chunk: &Chunk,
  ) -> Result<bool> {
    let Some(retain) = self.retain else {
      return Ok(false);
    };
    let (start, end) = (chunk.header().start(), chunk.header().end());
    let Some(time) = worker.chunk_time(start, end)? else {
      return Ok(false);
    };
    let cutoff = sp.effective_now.saturating_sub(retain.as_millis() as i64);
    if time.max >= cutoff {
      return Ok(false);
    }

    let empty = db.new_scavenge_chunk(start, end).await?;
    if let Err(e) = empty.complete_scavenged(&[]).await {
      empty.abort(true);
      return Err(e.into());
    }
    db.switch_chunk(empty).await?;
    info!(
      "SCAVENGING: removing chunk #{start}-{end}, newest record {} older than {retain:?}",
      time.max
    );
    Ok(true)
  }
}
