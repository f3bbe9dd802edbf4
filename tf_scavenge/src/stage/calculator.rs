//! Calculation: turn stream metadata into discard points and chunk weights
//! 计算：把流元数据转为丢弃点与块权重

use std::time::Instant;

use log::debug;

use super::{Ctx, WeightAccumulator};
use crate::{
  cancel::Ticker,
  checkpoint::Checkpoint,
  consts::EVENT_SLICE,
  discard::DiscardPoint,
  error::{Error, Result},
  handle::StreamHandle,
  index::{EventInfo, IndexReader},
  point::ScavengePoint,
  state::{CalculationStatus, OriginalStreamData},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Keep,
  Discard,
  /// Depends on the exact record timestamp / 取决于记录的具体时间戳
  MaybeDiscard,
  /// Gone from the chunks, still in the index / 已从块中删除，索引仍在
  AlreadyDiscarded,
}

/// Rules of one stream evaluated at one scavenge point / 某流在某清理点的规则
pub struct StreamRules<'a> {
  pub data: &'a OriginalStreamData,
  pub last_event_number: i64,
  pub effective_now: i64,
}

impl StreamRules<'_> {
  /// Decide by metadata and the logical chunk's time range. `time` is `(min, max)`.
  /// 按元数据与逻辑块时间范围判定
  pub fn decide(&self, event_number: i64, time: Option<(i64, i64)>) -> Decision {
    let is_last = event_number == self.last_event_number;
    if self.data.is_tombstoned {
      return if is_last {
        Decision::Keep
      } else {
        Decision::Discard
      };
    }
    if is_last {
      return Decision::Keep;
    }
    let m = &self.data.metadata;
    if m.truncate_before.is_some_and(|tb| event_number < tb) {
      return Decision::Discard;
    }
    if m
      .max_count
      .is_some_and(|c| event_number <= self.last_event_number.saturating_sub(c))
    {
      return Decision::Discard;
    }
    if let Some(age) = m.max_age_ms() {
      let cutoff = self.effective_now.saturating_sub(age);
      return match time {
        Some((_, max)) if max < cutoff => Decision::Discard,
        Some((min, _)) if min >= cutoff => Decision::Keep,
        _ => Decision::MaybeDiscard,
      };
    }
    Decision::Keep
  }
}

/// Nothing left but a tombstone, or no rules at all / 仅剩墓碑或无规则
fn status_of(data: &OriginalStreamData) -> CalculationStatus {
  if data.is_tombstoned {
    CalculationStatus::Archived
  } else if data.metadata.is_empty() {
    CalculationStatus::Spent
  } else {
    CalculationStatus::Active
  }
}

pub async fn calculate<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  done_stream: Option<String>,
) -> Result<()> {
  debug!(
    "SCAVENGING: calculating {} after {:?}",
    sp.name(),
    done_stream
  );
  let start = Instant::now();
  let mut ticker = Ticker::new(ctx.conf.cancellation_check_period);
  let mut after = done_stream;
  let mut total = 0u64;

  loop {
    // the batch is read before writing so no read is open across the commit
    let batch = ctx
      .state
      .active_originals(after.as_deref(), ctx.conf.checkpoint_period as usize)?;
    let Some((last, _)) = batch.last() else {
      break;
    };
    let last = last.key();
    let period = Instant::now();

    let tx = ctx.state.begin()?;
    let mut weights = WeightAccumulator::new();
    for (handle, data) in &batch {
      if data.status != CalculationStatus::Active {
        return Err(Error::InvalidOperation(format!(
          "calculating {:?} stream {handle}",
          data.status
        )));
      }
      let status = status_of(data);
      let (discard, maybe) =
        discard_points(ctx, sp, handle, data, &mut weights, &mut ticker).await?;
      let discard = discard.max(data.discard_point);
      let maybe = maybe.max(data.maybe_discard_point);
      if status != data.status || discard != data.discard_point || maybe != data.maybe_discard_point
      {
        ctx.state.set_discard_points(handle, status, discard, maybe)?;
      }
    }
    weights.flush(ctx.state)?;
    tx.commit(&Checkpoint::Calculating {
      sp: sp.clone(),
      done_stream: Some(last.clone()),
    })?;

    total += batch.len() as u64;
    debug!(
      "SCAVENGING: calculated {} streams in {:?}, {total} in total",
      batch.len(),
      period.elapsed()
    );
    after = Some(last);
  }

  debug!("SCAVENGING: calculated {total} streams in {:?}", start.elapsed());
  ctx.throttle.rest(ctx.cancel).await
}

/// Discard points computed from scratch, weights added on the way
/// 从头计算丢弃点，同时累加权重
async fn discard_points<I: IndexReader>(
  ctx: &Ctx<'_, I>,
  sp: &ScavengePoint,
  handle: &StreamHandle,
  data: &OriginalStreamData,
  weights: &mut WeightAccumulator,
  ticker: &mut Ticker,
) -> Result<(DiscardPoint, DiscardPoint)> {
  let Some(last) = ctx
    .index
    .read_backward(handle, -1, 1, sp.position)
    .events
    .first()
    .copied()
  else {
    return Ok((DiscardPoint::KEEP_ALL, DiscardPoint::KEEP_ALL));
  };
  let rules = StreamRules {
    data,
    last_event_number: last.event_number,
    effective_now: sp.effective_now,
  };

  let mut discard = DiscardPoint::KEEP_ALL;
  let mut maybe = DiscardPoint::KEEP_ALL;
  let mut first = true;
  let mut all_discarded = true;
  let mut from = 0;

  loop {
    let slice = ctx.index.read_forward(handle, from, EVENT_SLICE, sp.position);
    for e in &slice.events {
      if ticker.tick() {
        ctx.throttle.rest(ctx.cancel).await?;
      }
      if first {
        // anything before the first indexed event is already gone
        discard = DiscardPoint::discard_before(e.event_number);
        maybe = discard;
        first = false;
      }
      let n = ctx.logical_chunk_of(e.position);
      match decide(ctx, &rules, e, n).await? {
        Decision::Discard => {
          weights.on_discard(n);
          discard = DiscardPoint::discard_including(e.event_number);
          all_discarded = true;
        }
        Decision::MaybeDiscard => {
          // weight may have been reset by an earlier run, add it again
          weights.on_maybe_discard(n);
          maybe = DiscardPoint::discard_including(e.event_number);
          all_discarded = false;
        }
        Decision::AlreadyDiscarded => {
          // skipping a gap would drop the events before it
          if all_discarded {
            discard = DiscardPoint::discard_including(e.event_number);
          }
        }
        Decision::Keep => {
          return Ok((discard, maybe.or(discard)));
        }
      }
    }
    if slice.is_end {
      break;
    }
    from = slice.next;
  }

  if first {
    return Ok((DiscardPoint::KEEP_ALL, DiscardPoint::KEEP_ALL));
  }
  Err(Error::InvalidOperation(format!(
    "every event of stream {handle} calculated as discarded"
  )))
}

async fn decide<I>(
  ctx: &Ctx<'_, I>,
  rules: &StreamRules<'_>,
  e: &EventInfo,
  logical_chunk: u32,
) -> Result<Decision> {
  if e.event_number != rules.last_event_number
    && ctx
      .db
      .get_chunk_for(e.position)
      .is_some_and(|c| c.is_scavenged())
    && !ctx.db.exists_at(e.position).await?
  {
    return Ok(Decision::AlreadyDiscarded);
  }
  let time = ctx
    .state
    .chunk_time(logical_chunk)?
    .map(|t| (t.min, t.max));
  Ok(rules.decide(e.event_number, time))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::meta::StreamMetadata;

  fn data(metadata: StreamMetadata, is_tombstoned: bool) -> OriginalStreamData {
    OriginalStreamData {
      is_tombstoned,
      metadata,
      ..Default::default()
    }
  }

  #[test]
  fn max_count_and_truncate_before() {
    let d = data(
      StreamMetadata {
        max_count: Some(3),
        truncate_before: Some(2),
        ..Default::default()
      },
      false,
    );
    let r = StreamRules {
      data: &d,
      last_event_number: 9,
      effective_now: 0,
    };
    assert_eq!(r.decide(1, None), Decision::Discard);
    assert_eq!(r.decide(6, None), Decision::Discard);
    assert_eq!(r.decide(7, None), Decision::Keep);
    assert_eq!(r.decide(9, None), Decision::Keep);
  }

  #[test]
  fn max_age_by_chunk_time() {
    let d = data(
      StreamMetadata {
        max_age: Some(10),
        ..Default::default()
      },
      false,
    );
    let r = StreamRules {
      data: &d,
      last_event_number: 5,
      effective_now: 100_000,
    };
    assert_eq!(r.decide(0, Some((1_000, 2_000))), Decision::Discard);
    assert_eq!(r.decide(0, Some((95_000, 99_000))), Decision::Keep);
    assert_eq!(r.decide(0, Some((80_000, 95_000))), Decision::MaybeDiscard);
    assert_eq!(r.decide(0, None), Decision::MaybeDiscard);
    assert_eq!(r.decide(5, Some((1_000, 2_000))), Decision::Keep);
  }

  #[test]
  fn tombstone_keeps_only_itself() {
    let d = data(StreamMetadata::default(), true);
    let r = StreamRules {
      data: &d,
      last_event_number: i64::MAX,
      effective_now: 0,
    };
    assert_eq!(r.decide(3, None), Decision::Discard);
    assert_eq!(r.decide(i64::MAX, None), Decision::Keep);
    assert_eq!(status_of(&d), CalculationStatus::Archived);
    assert_eq!(
      status_of(&data(StreamMetadata::default(), false)),
      CalculationStatus::Spent
    );
  }
}
