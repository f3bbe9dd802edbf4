//! Runs the phases in order, resuming from the stored checkpoint
//! 按顺序运行各阶段，从已存检查点恢复

use std::time::{Duration, Instant};

use log::{debug, error, info};
use tf_db::ChunkDb;

use crate::{
  cancel::Cancel,
  checkpoint::{Checkpoint, Phase},
  conf::{Conf, ScavengeConf},
  error::{Error, Result},
  index::{IndexReader, IndexScavenger},
  point::{ScavengePoint, ScavengePointSource, now_ms},
  remover::ChunkRemover,
  scavenge_log::{ScavengeLog, ScavengeResult},
  stage::{
    Ctx, accumulator, calculator, chunk_executor, cleaner, index_executor, merger,
  },
  state::ScavengeState,
  throttle::Throttle,
};

pub struct Scavenger<'a, I, P> {
  db: &'a ChunkDb,
  index: &'a I,
  points: &'a P,
  state: ScavengeState,
  conf: ScavengeConf,
  remover: ChunkRemover,
  throttle: Throttle,
  log: &'a dyn ScavengeLog,
}

impl<'a, I, P> Scavenger<'a, I, P>
where
  I: IndexReader + IndexScavenger,
  P: ScavengePointSource,
{
  pub fn new(
    db: &'a ChunkDb,
    index: &'a I,
    points: &'a P,
    state: ScavengeState,
    log: &'a dyn ScavengeLog,
    conf: &[Conf],
  ) -> Self {
    let conf = ScavengeConf::parse(conf);
    Self {
      db,
      index,
      points,
      state,
      remover: ChunkRemover::new(conf.retain_period),
      throttle: Throttle::new(conf.throttle_percent),
      conf,
      log,
    }
  }

  pub fn state(&self) -> &ScavengeState {
    &self.state
  }

  pub fn conf(&self) -> &ScavengeConf {
    &self.conf
  }

  /// Adjustable while a scavenge runs / 运行中可调
  pub fn throttle(&self) -> &Throttle {
    &self.throttle
  }

  pub fn into_state(self) -> ScavengeState {
    self.state
  }

  /// Run until done, stopped or failed. Never returns an error: the outcome goes
  /// to the log sink and is returned.
  /// 运行至完成、停止或失败；结果写入日志接口并返回
  ///
  /// A run works towards the point it started with. Publishing a newer point
  /// does not interrupt it: the caller cancels through `cancel`, then the next
  /// run resumes the stored checkpoint and moves on to the newer point.
  /// 运行只针对开始时的清理点；发布新清理点不会打断它，调用方通过 `cancel`
  /// 取消，下次运行从检查点恢复后再处理新清理点
  pub async fn scavenge(&self, cancel: &Cancel) -> ScavengeResult {
    let begin = Instant::now();
    let id = format!("scavenge-{}", now_ms());
    debug!("SCAVENGING: {id} initializing, {}", self.stats());
    self.log_collisions();
    self.log.scavenge_started(&id);

    let mut times = Vec::new();
    let (result, err) = match self.run(cancel, &mut times).await {
      Ok(()) => {
        info!("SCAVENGING: {id} completed in {:?}", begin.elapsed());
        (ScavengeResult::Success, None)
      }
      Err(e) if e.is_cancelled() => {
        info!("SCAVENGING: {id} stopped after {:?}", begin.elapsed());
        (ScavengeResult::Stopped, None)
      }
      Err(e) => {
        error!("SCAVENGING: {id} failed after {:?}: {e}", begin.elapsed());
        (
          ScavengeResult::Errored,
          Some(format!("Error while scavenging DB: {e}")),
        )
      }
    };

    self
      .log
      .scavenge_completed(result, err.as_deref(), begin.elapsed());
    self.log_collisions();
    for (phase, elapsed) in times {
      debug!("SCAVENGING: {phase} took {elapsed:?}");
    }
    result
  }

  fn stats(&self) -> String {
    match self.state.stats() {
      Ok(s) => format!(
        "{} originals, {} metastreams, {} weighted chunks, {} collisions",
        s.originals, s.metastreams, s.weighted_chunks, s.collisions
      ),
      Err(e) => format!("stats unavailable: {e}"),
    }
  }

  fn log_collisions(&self) {
    let all = self.state.collisions();
    debug!("SCAVENGING: {} known collisions", all.len());
    for c in all {
      debug!("SCAVENGING: known collision \"{c}\"");
    }
  }

  async fn run(&self, cancel: &Cancel, times: &mut Vec<(Phase, Duration)>) -> Result<()> {
    if self.conf.threads > 1 && self.throttle.percent() < 100.0 {
      return Err(Error::InvalidOperation(
        "throttling is only supported with a single thread".into(),
      ));
    }
    let ctx = Ctx {
      db: self.db,
      index: self.index,
      state: &self.state,
      conf: &self.conf,
      remover: &self.remover,
      cancel,
      throttle: &self.throttle,
      log: self.log,
    };

    // a stored checkpoint resumes its phase, later phases start fresh
    let resume = match self.state.checkpoint()? {
      None => {
        debug!("SCAVENGING: new scavenge with no checkpoint");
        self.start_new(&ctx, None).await?
      }
      Some(Checkpoint::Done { sp }) => {
        debug!("SCAVENGING: new scavenge after {}", sp.name());
        self.start_new(&ctx, Some(&sp)).await?
      }
      Some(ckp) => {
        debug!("SCAVENGING: continuing from {ckp}");
        Some(ckp)
      }
    };
    let Some(resume) = resume else {
      return Ok(());
    };
    let Some(from) = resume.phase() else {
      return Ok(());
    };
    let sp = resume.scavenge_point().clone();

    let mut next = Some(resume);
    for phase in Phase::ALL.into_iter().filter(|p| *p >= from) {
      if phase == Phase::ChunkMerging && !self.conf.merge_chunks {
        next = None;
        continue;
      }
      cancel.check()?;
      let ckp = match next.take() {
        Some(c) => c,
        None => fresh(phase, &sp),
      };
      self.state.set_checkpoint(&ckp)?;

      debug!("SCAVENGING: {phase} phase started");
      let start = Instant::now();
      run_phase(&ctx, &ckp).await.map_err(|e| e.in_phase(phase))?;
      let elapsed = start.elapsed();
      debug!("SCAVENGING: {}, {}", self.stats(), self.throttle.stats());
      self.log.phase_completed(phase, elapsed);
      times.push((phase, elapsed));
      if phase == Phase::Accumulation {
        self.log_collisions();
      }
    }
    Ok(())
  }

  /// Pick or create the point to scavenge up to / 选择或创建本轮清理点
  async fn start_new(
    &self,
    ctx: &Ctx<'_, I>,
    prev: Option<&ScavengePoint>,
  ) -> Result<Option<Checkpoint>> {
    let latest = self.points.latest().await?;
    let sp = match (latest, prev) {
      (Some(latest), None) => {
        debug!("SCAVENGING: using existing scavenge point {}", latest.name());
        latest
      }
      (Some(latest), Some(prev)) if prev.event_number < latest.event_number => {
        debug!("SCAVENGING: using existing scavenge point {}", latest.name());
        latest
      }
      _ if self.conf.sync_only => {
        debug!("SCAVENGING: no new scavenge point to sync with, nothing to do");
        return Ok(None);
      }
      _ => {
        let expected = prev.map(|p| p.event_number);
        debug!("SCAVENGING: creating scavenge point after {expected:?}");
        self.points.add(expected, self.conf.threshold).await?
      }
    };
    Ok(Some(accumulator::first_checkpoint(ctx, prev, &sp)))
  }
}

fn fresh(phase: Phase, sp: &ScavengePoint) -> Checkpoint {
  match phase {
    Phase::Accumulation => Checkpoint::Accumulating {
      sp: sp.clone(),
      done_logical_chunk: None,
    },
    Phase::Calculation => Checkpoint::Calculating {
      sp: sp.clone(),
      done_stream: None,
    },
    Phase::ChunkExecution => chunk_executor::first_checkpoint(sp),
    Phase::ChunkMerging => merger::first_checkpoint(sp),
    Phase::IndexExecution => index_executor::first_checkpoint(sp),
    Phase::Cleaning => cleaner::first_checkpoint(sp),
  }
}

async fn run_phase<I: IndexReader + IndexScavenger>(
  ctx: &Ctx<'_, I>,
  ckp: &Checkpoint,
) -> Result<()> {
  match ckp {
    Checkpoint::Accumulating {
      sp,
      done_logical_chunk,
    } => accumulator::accumulate(ctx, sp, *done_logical_chunk).await,
    Checkpoint::Calculating { sp, done_stream } => {
      calculator::calculate(ctx, sp, done_stream.clone()).await
    }
    Checkpoint::ExecutingChunks {
      sp,
      done_logical_chunk,
    } => chunk_executor::execute(ctx, sp, *done_logical_chunk).await,
    Checkpoint::MergingChunks { sp } => merger::merge(ctx, sp).await,
    Checkpoint::ExecutingIndex { sp } => index_executor::execute(ctx, sp).await,
    Checkpoint::Cleaning { sp } => cleaner::clean(ctx, sp),
    Checkpoint::Done { .. } => Ok(()),
  }
}
