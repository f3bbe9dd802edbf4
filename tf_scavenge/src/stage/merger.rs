//! Chunk merging: pack adjacent scavenged chunks into one file
//! 块合并：把相邻的已清理块打包为一个文件

use std::{sync::Arc, time::Instant};

use log::{debug, info};
use tf_chunk::{Append, Chunk, PosMap};

use super::{Ctx, packed_size};
use crate::{
  checkpoint::Checkpoint,
  error::{Error, Result},
  point::ScavengePoint,
};

pub fn first_checkpoint(sp: &ScavengePoint) -> Checkpoint {
  Checkpoint::MergingChunks { sp: sp.clone() }
}

/// Runs of adjacent scavenged chunks that fit one chunk together
/// 合起来放得进一个块的相邻已清理块
fn plan(chunks: Vec<Arc<Chunk>>, sp: &ScavengePoint, chunk_size: u64) -> Vec<Vec<Arc<Chunk>>> {
  let mut groups = Vec::new();
  let mut cur: Vec<Arc<Chunk>> = Vec::new();
  let mut cur_size = 0;
  for c in chunks {
    let mergeable =
      c.is_read_only() && c.is_scavenged() && c.header().end_position() <= sp.position;
    if !mergeable {
      groups.push(std::mem::take(&mut cur));
      cur_size = 0;
      continue;
    }
    let size = packed_size(&c);
    if !cur.is_empty() && cur_size + size > chunk_size {
      groups.push(std::mem::take(&mut cur));
      cur_size = 0;
    }
    cur_size += size;
    cur.push(c);
  }
  groups.push(cur);
  groups.retain(|g| g.len() > 1);
  groups
}

pub async fn merge<I>(ctx: &Ctx<'_, I>, sp: &ScavengePoint) -> Result<()> {
  debug!("SCAVENGING: merging chunks before {}", sp.name());
  let groups = plan(ctx.db.chunks(), sp, ctx.db.chunk_size() as u64);
  for group in groups {
    ctx.cancel.check()?;
    merge_group(ctx, &group).await?;
    ctx.throttle.rest(ctx.cancel).await?;
  }
  Ok(())
}

async fn merge_group<I>(ctx: &Ctx<'_, I>, group: &[Arc<Chunk>]) -> Result<()> {
  let (Some(first), Some(last)) = (group.first(), group.last()) else {
    return Ok(());
  };
  let begin = Instant::now();
  let (start, end) = (first.header().start(), last.header().end());
  let out = ctx.db.new_scavenge_chunk(start, end).await?;
  if let Err(e) = copy_all(ctx, group, &out).await {
    info!("SCAVENGING: merging chunks #{start}-{end} stopped: {e}");
    out.abort(!e.is_cancelled());
    return Err(e);
  }

  let old_size: u64 = group.iter().map(|c| c.file_size()).sum();
  let new = ctx.db.switch_chunk(out).await?;
  ctx.log.chunk_merged(
    start,
    end,
    begin.elapsed(),
    old_size as i64 - new.file_size() as i64,
  );
  Ok(())
}

async fn copy_all<I>(ctx: &Ctx<'_, I>, group: &[Arc<Chunk>], out: &Chunk) -> Result<()> {
  let mut map = Vec::new();
  for chunk in group {
    ctx.cancel.check()?;
    let mut local = 0;
    while let Some(r) = chunk.try_read_closest_forward(local).await? {
      local = r.next;
      let Append::Written { pos, .. } = out.append(&r.record).await? else {
        return Err(Error::InvalidOperation(format!(
          "merged chunk {out} overflowed at {chunk}"
        )));
      };
      map.push(PosMap::new(
        out.header().local_position(r.record.log_position()),
        pos as u32,
      ));
    }
  }
  out.complete_scavenged(&map).await?;
  Ok(())
}
