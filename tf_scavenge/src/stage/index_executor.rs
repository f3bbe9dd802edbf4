//! Index execution: drop entries whose records are gone or discardable
//! 索引执行：删除记录已不存在或可丢弃的条目

use std::time::Instant;

use log::debug;

use super::Ctx;
use crate::{
  cancel::Ticker,
  checkpoint::Checkpoint,
  consts::EVENT_SLICE,
  error::Result,
  handle::StreamHandle,
  index::{IndexEntry, IndexScavenger},
  point::ScavengePoint,
};

pub fn first_checkpoint(sp: &ScavengePoint) -> Checkpoint {
  Checkpoint::ExecutingIndex { sp: sp.clone() }
}

pub async fn execute<I: IndexScavenger>(ctx: &Ctx<'_, I>, sp: &ScavengePoint) -> Result<()> {
  debug!("SCAVENGING: executing index for {}", sp.name());
  let begin = Instant::now();
  let mut ticker = Ticker::new(ctx.conf.index_rest_period);
  let mut after: Option<IndexEntry> = None;
  let (mut removed, mut kept) = (0u64, 0u64);

  loop {
    ctx.cancel.check()?;
    let batch = ctx.index.entries_after(after, EVENT_SLICE);
    let Some(last) = batch.last() else {
      break;
    };
    after = Some(*last);

    let mut gone = Vec::new();
    for e in &batch {
      if ticker.tick() {
        ctx.throttle.rest(ctx.cancel).await?;
      }
      if should_discard(ctx, sp, e).await? {
        gone.push(*e);
      } else {
        kept += 1;
      }
    }
    removed += gone.len() as u64;
    ctx.index.remove(&gone);
  }

  ctx.log.index_scavenged(removed, kept, begin.elapsed());
  Ok(())
}

async fn should_discard<I>(ctx: &Ctx<'_, I>, sp: &ScavengePoint, e: &IndexEntry) -> Result<bool> {
  if e.position >= sp.position {
    return Ok(false);
  }
  let state = ctx.state;
  let handle = if state.is_collision_hash(e.hash) {
    // only the record can tell which colliding stream the entry belongs to
    let Some(record) = ctx.db.read_record_at(e.position).await? else {
      return Ok(true);
    };
    let Some(p) = record.as_prepare() else {
      return Ok(true);
    };
    StreamHandle::ById(p.stream.clone())
  } else {
    StreamHandle::ByHash(e.hash)
  };

  if let Some(info) = state.index_info(&handle)? {
    if info.is_tombstoned && (info.is_metastream || ctx.conf.unsafe_ignore_hard_deletes) {
      return Ok(true);
    }
    if info.discard_point.should_discard(e.event_number) {
      return Ok(true);
    }
  }

  // records removed by chunk execution, or by age, leave stale entries behind
  let scavenged = ctx
    .db
    .get_chunk_for(e.position)
    .is_none_or(|c| c.is_scavenged());
  Ok(scavenged && !ctx.db.exists_at(e.position).await?)
}
