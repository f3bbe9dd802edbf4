//! Accumulation: read the log up to the scavenge point, recording metadata,
//! tombstones, collisions and chunk time ranges.
//! 累积：读取日志直到清理点，记录元数据、墓碑、冲突与块时间范围

use std::time::Instant;

use log::{debug, info};
use tf_chunk::Prepare;

use super::{Ctx, WeightAccumulator};
use crate::{
  cancel::Ticker,
  checkpoint::Checkpoint,
  consts::METADATA_LOOKAHEAD,
  discard::DiscardPoint,
  error::{Error, Result},
  index::IndexReader,
  meta::StreamMetadata,
  point::ScavengePoint,
  state::ChunkTimeRange,
};

/// Fresh start: the chunk holding the previous point is already accumulated
/// 新一轮：上一清理点所在块已累积
pub fn first_checkpoint<I>(
  ctx: &Ctx<'_, I>,
  prev: Option<&ScavengePoint>,
  sp: &ScavengePoint,
) -> Checkpoint {
  Checkpoint::Accumulating {
    sp: sp.clone(),
    done_logical_chunk: prev.map(|p| ctx.logical_chunk_of(p.position)),
  }
}

pub async fn accumulate<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  done_logical_chunk: Option<u32>,
) -> Result<()> {
  debug!(
    "SCAVENGING: accumulating {} from chunk {:?}",
    sp.name(),
    done_logical_chunk
  );
  let chunk_size = ctx.db.chunk_size() as i64;
  let mut ticker = Ticker::new(ctx.conf.cancellation_check_period);
  let mut n = done_logical_chunk.map_or(0, |d| d + 1);

  while n as i64 * chunk_size <= sp.position {
    ctx.cancel.check()?;
    let start = Instant::now();
    let tx = ctx.state.begin()?;
    let mut weights = WeightAccumulator::new();
    let stats = accumulate_chunk(ctx, sp, n, &mut weights, &mut ticker).await?;
    if !stats.time.is_empty() {
      ctx.state.set_chunk_time(n, stats.time)?;
    }
    weights.flush(ctx.state)?;
    tx.commit(&Checkpoint::Accumulating {
      sp: sp.clone(),
      done_logical_chunk: Some(n),
    })?;
    info!(
      "SCAVENGING: accumulated {} records ({} original, {} metadata, {} tombstones) in chunk {n} in {:?}",
      stats.records,
      stats.originals,
      stats.metadata,
      stats.tombstones,
      start.elapsed()
    );
    if stats.reached_point {
      break;
    }
    n += 1;
  }
  Ok(())
}

struct ChunkStats {
  records: u64,
  originals: u64,
  metadata: u64,
  tombstones: u64,
  time: ChunkTimeRange,
  reached_point: bool,
}

/// Record timestamps need not be ascending / 时间戳未必递增
async fn accumulate_chunk<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  n: u32,
  weights: &mut WeightAccumulator,
  ticker: &mut Ticker,
) -> Result<ChunkStats> {
  let chunk_size = ctx.db.chunk_size() as i64;
  let end = (n as i64 + 1) * chunk_size;
  let mut pos = n as i64 * chunk_size;
  let mut stats = ChunkStats {
    records: 0,
    originals: 0,
    metadata: 0,
    tombstones: 0,
    time: ChunkTimeRange::EMPTY,
    reached_point: false,
  };

  while let Some((record, next)) = ctx.db.read_forward(pos).await? {
    let at = record.log_position();
    if at >= end {
      break;
    }
    pos = next;
    let Some(p) = record.as_prepare() else {
      continue;
    };

    if p.is_tombstone() {
      tombstone(ctx, sp, p, weights)?;
      stats.tombstones += 1;
    } else if ctx.state.lookup().is_metastream(&p.stream) {
      metastream_record(ctx, sp, p, weights)?;
      stats.metadata += 1;
    } else {
      ctx.state.detect_collisions(&p.stream)?;
      stats.originals += 1;
    }
    stats.time.add(p.timestamp);
    stats.records += 1;

    if at == sp.position {
      stats.reached_point = true;
      break;
    }
    if at > sp.position {
      return Err(Error::InvalidOperation(format!(
        "passed scavenge point {} at {at} without finding it",
        sp.name()
      )));
    }
    if ticker.tick() {
      ctx.throttle.rest(ctx.cancel).await?;
    }
  }
  Ok(stats)
}

/// Any record of a metastream sets the metadata, unparseable data clears it
/// 元数据流中的任何记录都设置元数据，无法解析则清空
fn metastream_record<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  p: &Prepare,
  weights: &mut WeightAccumulator,
) -> Result<()> {
  let state = ctx.state;
  let lookup = state.lookup();
  let original = lookup.original_of(&p.stream);
  state.detect_collisions(&original)?;
  state.detect_collisions(&p.stream)?;

  if p.event_number < 0 {
    return Err(Error::InvalidOperation(format!(
      "metadata in transaction in stream {}",
      p.stream
    )));
  }

  let (in_order, replaced) = metadata_ordering(ctx, sp, p);
  if let Some(pos) = replaced {
    weights.on_discard(ctx.logical_chunk_of(pos));
  }
  if !in_order {
    info!(
      "SCAVENGING: out of order metadata {}:{}",
      p.stream, p.event_number
    );
    return Ok(());
  }

  // metadata of a metastream does not apply to it, its own rule is keep last
  if !lookup.is_metastream(&original) {
    state.set_original_metadata(&original, &StreamMetadata::parse(&p.data))?;
  }

  let point = DiscardPoint::discard_before(p.event_number);
  if point != DiscardPoint::KEEP_ALL {
    state.set_metastream_discard_point(&p.stream, point)?;
  }
  Ok(())
}

/// Whether the record is in order, and which position it makes obsolete
/// 记录是否有序，以及它使哪个位置过时
fn metadata_ordering<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  p: &Prepare,
) -> (bool, Option<i64>) {
  let from = if p.event_number == 0 {
    0
  } else {
    p.event_number - 1
  };
  let handle = ctx.state.handle(&p.stream);
  let events = ctx
    .index
    .read_forward(&handle, from, METADATA_LOOKAHEAD, sp.position)
    .events;

  let in_order = !events
    .iter()
    .any(|e| e.position < p.log_position && e.event_number >= p.event_number);
  if !in_order {
    return (false, Some(p.log_position));
  }
  let replaced = events
    .first()
    .filter(|e| e.event_number < p.event_number && e.position < p.log_position)
    .map(|e| e.position);
  (true, replaced)
}

/// Takes effect even out of order, the index gives it the max event number
/// 即使乱序也生效
fn tombstone<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  p: &Prepare,
  weights: &mut WeightAccumulator,
) -> Result<()> {
  let state = ctx.state;
  state.detect_collisions(&p.stream)?;
  if state.lookup().is_metastream(&p.stream) {
    return Err(Error::InvalidOperation(format!(
      "tombstone in metadata stream {}",
      p.stream
    )));
  }
  if p.event_number < 0 {
    return Err(Error::InvalidOperation(format!(
      "tombstone in transaction in stream {}",
      p.stream
    )));
  }
  state.set_original_tombstone(&p.stream)?;

  let metastream = state.lookup().metastream_of(&p.stream);
  state.detect_collisions(&metastream)?;
  state.set_metastream_tombstone(&metastream)?;

  // no metadata can follow a tombstone, the last one is final
  let handle = state.handle(&metastream);
  for e in ctx.index.read_backward(&handle, -1, 1, sp.position).events {
    weights.on_discard(ctx.logical_chunk_of(e.position));
  }
  Ok(())
}
