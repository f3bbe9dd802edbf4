//! Chunk execution: rewrite weighted chunks without their discardable records
//! 块执行：重写有权重的块，去掉可丢弃记录

use std::{sync::Arc, time::Instant};

use futures::{StreamExt, stream};
use log::{debug, info};
use parking_lot::Mutex;
use tf_chunk::{Append, Chunk, PosMap, Prepare};

use super::{Ctx, packed_size};
use crate::{
  cancel::Ticker,
  checkpoint::Checkpoint,
  error::{Error, Result},
  point::ScavengePoint,
  state::StateWorker,
};

pub fn first_checkpoint(sp: &ScavengePoint) -> Checkpoint {
  Checkpoint::ExecutingChunks {
    sp: sp.clone(),
    done_logical_chunk: None,
  }
}

/// Completed chunks before the scavenge point from `done + 1` / 清理点之前的已完成块
fn physical_chunks<I>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  done_logical_chunk: Option<u32>,
) -> Result<Vec<Arc<Chunk>>> {
  let chunk_size = ctx.db.chunk_size() as i64;
  let mut pos = done_logical_chunk.map_or(0, |d| d as i64 + 1) * chunk_size;
  let mut chunks = Vec::new();
  while pos < sp.position {
    let Some(chunk) = ctx.db.get_chunk_for(pos) else {
      return Err(Error::InvalidOperation(format!(
        "no chunk for position {pos} before scavenge point {}",
        sp.position
      )));
    };
    if !chunk.is_read_only() {
      return Err(Error::InvalidOperation(format!(
        "reached open {chunk} before scavenge point {}",
        sp.position
      )));
    }
    pos = chunk.header().end_position();
    chunks.push(chunk);
  }
  Ok(chunks)
}

pub async fn execute<I>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  done_logical_chunk: Option<u32>,
) -> Result<()> {
  debug!(
    "SCAVENGING: executing chunks of {} after {:?}",
    sp.name(),
    done_logical_chunk
  );
  let chunks = physical_chunks(ctx, sp, done_logical_chunk)?;
  let threads = ctx.conf.threads;
  let pool = Mutex::new(
    (0..threads)
      .map(|_| ctx.state.worker())
      .collect::<Result<Vec<_>>>()?,
  );
  let pool = &pool;

  // chunks never overlap, so weights are summed and reset concurrently
  let mut done = stream::iter(chunks)
    .map(|chunk| async move {
      let mut worker = match pool.lock().pop() {
        Some(w) => w,
        None => ctx.state.worker()?,
      };
      let r = process(ctx, sp, &mut worker, &chunk).await;
      pool.lock().push(worker);
      r.map(|()| chunk.header().end())
    })
    .buffered(threads);

  // results arrive in chunk order, so the checkpoint trails every finished chunk
  while let Some(end) = done.next().await {
    ctx.state.set_checkpoint(&Checkpoint::ExecutingChunks {
      sp: sp.clone(),
      done_logical_chunk: Some(end?),
    })?;
    if threads == 1 {
      ctx.throttle.rest(ctx.cancel).await?;
    }
  }
  Ok(())
}

async fn process<I>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  worker: &mut StateWorker,
  chunk: &Chunk,
) -> Result<()> {
  let (start, end) = (chunk.header().start(), chunk.header().end());
  let weight = worker.sum_chunk_weights(start, end)?;
  if ctx
    .remover
    .start_removing_if_not_retained(ctx.db, sp, worker, chunk)
    .await?
  {
    // nothing is left to carry weight
    worker.reset_chunk_weights(start, end)?;
    ctx.log.chunk_removed(start, end);
  } else if weight > sp.threshold as f64 || ctx.conf.unsafe_ignore_hard_deletes {
    execute_chunk(ctx, sp, worker, chunk, weight).await?;
    worker.reset_chunk_weights(start, end)?;
  } else {
    debug!(
      "SCAVENGING: skipped {chunk} with weight {weight}, threshold {}",
      sp.threshold
    );
    ctx.log.chunk_skipped(start, end, weight);
  }
  ctx.cancel.check()
}

async fn execute_chunk<I>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  worker: &mut StateWorker,
  chunk: &Chunk,
  weight: f64,
) -> Result<()> {
  let begin = Instant::now();
  let (start, end) = (chunk.header().start(), chunk.header().end());
  debug!("SCAVENGING: scavenging {chunk} with weight {weight}");

  let out = ctx.db.new_scavenge_chunk(start, end).await?;
  let (kept, discarded) = match write_kept(ctx, sp, worker, chunk, &out).await {
    Ok(n) => n,
    Err(e) => {
      if e.is_cancelled() {
        info!("SCAVENGING: cancelled at {chunk}");
        out.abort(false);
      } else {
        if e.is_file_being_deleted() {
          info!("SCAVENGING: {chunk} was deleted under the scavenge, stopping");
        } else {
          info!("SCAVENGING: failed scavenging {chunk}: {e}");
        }
        out.abort(true);
      }
      return Err(e);
    }
  };

  // files are padded to the alignment, compare what they hold
  let old_size = packed_size(chunk);
  let new = ctx.db.switch_chunk(out).await?;
  let new_size = packed_size(&new);
  let elapsed = begin.elapsed();
  debug!(
    "SCAVENGING: {chunk} kept {kept} discarded {discarded}, now {new} in {elapsed:?}, size {old_size} -> {new_size}"
  );
  ctx
    .log
    .chunk_scavenged(start, end, elapsed, old_size as i64 - new_size as i64);
  Ok(())
}

async fn write_kept<I>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  worker: &mut StateWorker,
  chunk: &Chunk,
  out: &Chunk,
) -> Result<(u64, u64)> {
  let mut ticker = Ticker::new(ctx.conf.cancellation_check_period);
  let mut map = Vec::new();
  let (mut kept, mut discarded) = (0, 0);
  let mut local = 0;

  while let Some(r) = chunk.try_read_closest_forward(local).await? {
    local = r.next;
    if let Some(p) = r.record.as_prepare()
      && should_discard(ctx, sp, worker, p)?
    {
      discarded += 1;
    } else {
      let Append::Written { pos, .. } = out.append(&r.record).await? else {
        return Err(Error::InvalidOperation(format!(
          "scavenged copy of {chunk} overflowed"
        )));
      };
      let log_pos = out.header().local_position(r.record.log_position());
      map.push(PosMap::new(log_pos, pos as u32));
      kept += 1;
    }
    if ticker.tick() {
      ctx.cancel.check()?;
    }
  }

  out.complete_scavenged(&map).await?;
  Ok((kept, discarded))
}

fn should_discard<I>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  worker: &mut StateWorker,
  p: &Prepare,
) -> Result<bool> {
  if p.log_position >= sp.position {
    return Ok(false);
  }
  let unsafe_deletes = ctx.conf.unsafe_ignore_hard_deletes;
  let info = worker.execution_info(&p.stream)?;

  if !p.is_self_committed() {
    // explicit transactions: only tombstoned streams lose prepares, and the
    // tombstone and transaction begins stay unless deletes are unsafe
    if !info.is_tombstoned {
      return Ok(false);
    }
    return Ok(unsafe_deletes || !(p.is_tombstone() || p.is_transaction_begin()));
  }

  if info.is_tombstoned {
    if unsafe_deletes {
      debug!(
        "SCAVENGING: removing hard deleted {}:{} at {}",
        p.stream, p.event_number, p.log_position
      );
      return Ok(true);
    }
    if ctx.state.lookup().is_metastream(&p.stream) {
      return Ok(true);
    }
  }

  if info.discard_point.should_discard(p.event_number) {
    return Ok(true);
  }
  if !info.maybe_discard_point.should_discard(p.event_number) {
    return Ok(false);
  }
  let Some(max_age) = info.max_age else {
    return Ok(false);
  };
  Ok(p.timestamp < sp.effective_now.saturating_sub(max_age))
}
