//! Scavenge pipeline tests / 清理流水线测试

use std::{sync::Arc, time::Duration};

use aok::{OK, Void};
use tempfile::TempDir;
use tf_chunk::{LogRecord, Prepare};
use tf_db::{ChunkDb, Conf as DbConf};
use tf_scavenge::{
  Cancel, Checkpoint, Conf, Crc32Hasher, LogScavengeLog, LogScavengePointSource, MemIndex,
  NameLookup, Phase, ScavengeLog, ScavengePointSource, ScavengeResult, ScavengeState, Scavenger,
  StreamHasher, StreamMetadata,
  consts::{SCAVENGE_POINTS_STREAM, STATE_FILE},
  point::now_ms,
};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

const CHUNK_SIZE: u32 = 512;
const OLD: i64 = 1_000;

/// Same-length names collide / 等长名称冲突
struct LenHasher;

impl StreamHasher for LenHasher {
  fn hash(&self, stream: &str) -> u64 {
    stream.len() as u64
  }
}

struct Env {
  _db_dir: TempDir,
  state_dir: TempDir,
  hasher: Arc<dyn StreamHasher>,
  db: ChunkDb,
  index: MemIndex,
}

impl Env {
  async fn new() -> tf_scavenge::Result<Self> {
    Self::with_hasher(Arc::new(Crc32Hasher)).await
  }

  async fn with_hasher(hasher: Arc<dyn StreamHasher>) -> tf_scavenge::Result<Self> {
    let db_dir = tempfile::tempdir()?;
    let state_dir = tempfile::tempdir()?;
    let db = ChunkDb::open(db_dir.path(), &[DbConf::ChunkSize(CHUNK_SIZE)]).await?;
    Ok(Self {
      _db_dir: db_dir,
      state_dir,
      index: MemIndex::new(hasher.clone()),
      hasher,
      db,
    })
  }

  async fn write(&self, p: Prepare) -> tf_scavenge::Result<i64> {
    let mut record: LogRecord = p.into();
    let pos = self.db.append(&mut record).await?;
    self.index.add_record(&record);
    Ok(pos)
  }

  async fn events(&self, stream: &str, from: i64, to: i64, ts: i64) -> tf_scavenge::Result<()> {
    for n in from..to {
      self.write(Prepare::event(stream, n, "e", vec![0u8; 16], ts)).await?;
    }
    Ok(())
  }

  async fn metadata(&self, stream: &str, n: i64, meta: StreamMetadata) -> tf_scavenge::Result<i64> {
    self
      .write(Prepare::metadata(format!("$${stream}"), n, meta.to_json(), now_ms()))
      .await
  }

  fn state(&self) -> tf_scavenge::Result<ScavengeState> {
    ScavengeState::open(
      self.state_dir.path().join(STATE_FILE),
      self.hasher.clone(),
      Arc::new(NameLookup),
    )
  }

  async fn scavenge(&self, conf: &[Conf]) -> tf_scavenge::Result<(ScavengeResult, LogScavengeLog)> {
    let log = LogScavengeLog::new();
    let r = self.scavenge_with(&log, &Cancel::new(), conf).await?;
    Ok((r, log))
  }

  async fn scavenge_with(
    &self,
    log: &dyn ScavengeLog,
    cancel: &Cancel,
    conf: &[Conf],
  ) -> tf_scavenge::Result<ScavengeResult> {
    let points = LogScavengePointSource::new(&self.db, &self.index);
    let scavenger = Scavenger::new(&self.db, &self.index, &points, self.state()?, log, conf);
    Ok(scavenger.scavenge(cancel).await)
  }

  /// Event numbers of `stream` still in the log / 日志中仍存在的事件号
  async fn in_log(&self, stream: &str) -> tf_scavenge::Result<Vec<i64>> {
    Ok(
      self
        .db
        .read_all_from(0)
        .await?
        .iter()
        .filter_map(|r| r.as_prepare())
        .filter(|p| p.stream == stream)
        .map(|p| p.event_number)
        .collect(),
    )
  }
}

/// Cancels once a phase or the first chunk is done / 某阶段或首个块完成后取消
struct CancelOn {
  inner: LogScavengeLog,
  cancel: Cancel,
  phase: Option<Phase>,
  on_chunk: bool,
}

impl CancelOn {
  fn phase(phase: Phase) -> Self {
    Self {
      inner: LogScavengeLog::new(),
      cancel: Cancel::new(),
      phase: Some(phase),
      on_chunk: false,
    }
  }

  fn chunk() -> Self {
    Self {
      inner: LogScavengeLog::new(),
      cancel: Cancel::new(),
      phase: None,
      on_chunk: true,
    }
  }
}

impl ScavengeLog for CancelOn {
  fn phase_completed(&self, phase: Phase, elapsed: Duration) {
    self.inner.phase_completed(phase, elapsed);
    if self.phase == Some(phase) {
      self.cancel.cancel();
    }
  }

  fn chunk_scavenged(&self, start: u32, end: u32, elapsed: Duration, space_saved: i64) {
    self.inner.chunk_scavenged(start, end, elapsed, space_saved);
    if self.on_chunk {
      self.cancel.cancel();
    }
  }
}

fn max_count(n: i64) -> StreamMetadata {
  StreamMetadata {
    max_count: Some(n),
    ..Default::default()
  }
}

#[compio::test]
async fn max_count_keeps_latest() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 10, now_ms()).await?;
  env.metadata("a", 0, max_count(3)).await?;
  env.events("b", 0, 4, now_ms()).await?;

  let (r, log) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [7, 8, 9]);
  assert_eq!(env.in_log("b").await?, [0, 1, 2, 3]);
  assert_eq!(env.in_log("$$a").await?, [0]);
  assert_eq!(env.index.event_numbers("a"), [7, 8, 9]);
  assert!(log.chunks_scavenged() > 0);
  assert!(log.space_saved() > 0);
  assert!(log.index_entries_removed() >= 7);

  let state = env.state()?;
  assert!(matches!(state.checkpoint()?, Some(Checkpoint::Done { .. })));
  OK
}

#[compio::test]
async fn truncate_before_and_replaced_metadata() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 10, now_ms()).await?;
  env.metadata("a", 0, max_count(1)).await?;
  env
    .metadata(
      "a",
      1,
      StreamMetadata {
        truncate_before: Some(6),
        ..Default::default()
      },
    )
    .await?;

  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  // the later metadata replaces the earlier one entirely
  assert_eq!(env.in_log("a").await?, [6, 7, 8, 9]);
  assert_eq!(env.in_log("$$a").await?, [1]);
  OK
}

#[compio::test]
async fn tombstone_keeps_only_itself() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 5, now_ms()).await?;
  env.metadata("a", 0, max_count(100)).await?;
  env.write(Prepare::tombstone("a", now_ms())).await?;
  env.events("b", 0, 3, now_ms()).await?;

  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [i64::MAX]);
  assert!(env.in_log("$$a").await?.is_empty());
  assert_eq!(env.in_log("b").await?, [0, 1, 2]);
  assert_eq!(env.index.event_numbers("a"), [i64::MAX]);
  assert!(env.index.event_numbers("$$a").is_empty());
  OK
}

#[compio::test]
async fn unsafe_hard_deletes_remove_everything() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 5, now_ms()).await?;
  env.write(Prepare::tombstone("a", now_ms())).await?;
  env.events("b", 0, 3, now_ms()).await?;

  let (r, _) = env.scavenge(&[Conf::UnsafeIgnoreHardDeletes(true)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert!(env.in_log("a").await?.is_empty());
  assert!(env.index.event_numbers("a").is_empty());
  assert_eq!(env.in_log("b").await?, [0, 1, 2]);

  // archived stream data is gone as well
  let state = env.state()?;
  let h = state.handle("a");
  assert!(state.original(&h)?.is_none());
  OK
}

#[compio::test]
async fn max_age_uses_record_time() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 5, OLD).await?;
  env.events("a", 5, 10, now_ms()).await?;
  env
    .metadata(
      "a",
      0,
      StreamMetadata {
        max_age: Some(3600),
        ..Default::default()
      },
    )
    .await?;

  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [5, 6, 7, 8, 9]);
  assert_eq!(env.index.event_numbers("a"), [5, 6, 7, 8, 9]);

  // age rules keep the stream active for the next run
  let state = env.state()?;
  let h = state.handle("a");
  assert!(state.original(&h)?.is_some());
  OK
}

#[compio::test]
async fn colliding_streams_are_kept_apart() -> Void {
  let env = Env::with_hasher(Arc::new(LenHasher)).await?;
  env.events("ab", 0, 6, now_ms()).await?;
  env.metadata("ab", 0, max_count(2)).await?;
  env.events("cd", 0, 6, now_ms()).await?;

  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("ab").await?, [4, 5]);
  assert_eq!(env.in_log("cd").await?, [0, 1, 2, 3, 4, 5]);
  assert_eq!(env.index.event_numbers("ab"), [4, 5]);
  assert_eq!(env.index.event_numbers("cd"), [0, 1, 2, 3, 4, 5]);

  let state = env.state()?;
  let collisions = state.collisions();
  assert!(collisions.contains(&"ab".to_owned()));
  assert!(collisions.contains(&"cd".to_owned()));
  OK
}

async fn resumes_after_cancel(log: CancelOn, conf: &[Conf]) -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 10, now_ms()).await?;
  env.metadata("a", 0, max_count(3)).await?;
  env.events("b", 0, 12, now_ms()).await?;

  let r = env.scavenge_with(&log, &log.cancel, conf).await?;
  assert_eq!(r, ScavengeResult::Stopped);
  assert!(!matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Done { .. }) | None
  ));

  let (r, _) = env.scavenge(conf).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [7, 8, 9]);
  assert_eq!(env.in_log("b").await?, (0..12).collect::<Vec<_>>());
  assert_eq!(env.index.event_numbers("a"), [7, 8, 9]);
  assert!(matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Done { sp }) if sp.event_number == 0
  ));
  OK
}

#[compio::test]
async fn resume_after_accumulation() -> Void {
  resumes_after_cancel(CancelOn::phase(Phase::Accumulation), &[]).await
}

#[compio::test]
async fn resume_after_calculation() -> Void {
  resumes_after_cancel(CancelOn::phase(Phase::Calculation), &[]).await
}

#[compio::test]
async fn resume_after_chunk_execution() -> Void {
  resumes_after_cancel(CancelOn::phase(Phase::ChunkExecution), &[]).await
}

#[compio::test]
async fn resume_after_index_execution() -> Void {
  resumes_after_cancel(CancelOn::phase(Phase::IndexExecution), &[]).await
}

#[compio::test]
async fn resume_inside_chunk_execution() -> Void {
  resumes_after_cancel(CancelOn::chunk(), &[]).await
}

#[compio::test]
async fn resume_after_chunk_merging() -> Void {
  resumes_after_cancel(
    CancelOn::phase(Phase::ChunkMerging),
    &[Conf::MergeChunks(true)],
  )
  .await
}

/// Several streams with every kind of rule / 覆盖各类规则的多个流
async fn fill(env: &Env) -> tf_scavenge::Result<()> {
  env.events("a", 0, 10, now_ms()).await?;
  env.metadata("a", 0, max_count(3)).await?;
  env.events("b", 0, 6, now_ms()).await?;
  env.events("c", 0, 4, now_ms()).await?;
  env.write(Prepare::tombstone("c", now_ms())).await?;
  env.events("d", 0, 6, OLD).await?;
  env
    .metadata(
      "d",
      0,
      StreamMetadata {
        max_age: Some(3600),
        ..Default::default()
      },
    )
    .await?;
  env.events("b", 6, 12, now_ms()).await?;
  Ok(())
}

impl Env {
  /// Stream and event number of every record in log order / 按日志顺序的流与事件号
  async fn layout(&self) -> tf_scavenge::Result<Vec<(String, i64)>> {
    Ok(
      self
        .db
        .read_all_from(0)
        .await?
        .iter()
        .filter_map(|r| r.as_prepare())
        .map(|p| (p.stream.clone(), p.event_number))
        .collect(),
    )
  }
}

#[compio::test]
async fn interrupted_run_matches_straight_run() -> Void {
  let conf = [Conf::MergeChunks(true)];
  let straight = Env::new().await?;
  fill(&straight).await?;
  let (r, _) = straight.scavenge(&conf).await?;
  assert_eq!(r, ScavengeResult::Success);

  // stop after every phase but the last, each run resuming the previous one
  let resumed = Env::new().await?;
  fill(&resumed).await?;
  for phase in Phase::ALL.into_iter().filter(|p| *p != Phase::Cleaning) {
    let log = CancelOn::phase(phase);
    let r = resumed.scavenge_with(&log, &log.cancel, &conf).await?;
    assert_eq!(r, ScavengeResult::Stopped, "{phase}");
  }
  let (r, _) = resumed.scavenge(&conf).await?;
  assert_eq!(r, ScavengeResult::Success);

  assert_eq!(resumed.layout().await?, straight.layout().await?);
  assert_eq!(resumed.in_log("a").await?, [7, 8, 9]);
  assert_eq!(resumed.in_log("c").await?, [i64::MAX]);
  for stream in ["a", "b", "c", "d", "$$a", "$$d"] {
    assert_eq!(
      resumed.index.event_numbers(stream),
      straight.index.event_numbers(stream),
      "{stream}"
    );
  }
  for env in [&straight, &resumed] {
    assert!(matches!(
      env.state()?.checkpoint()?,
      Some(Checkpoint::Done { sp }) if sp.event_number == 0
    ));
  }
  OK
}

#[compio::test]
async fn cancel_after_cleaning_completes() -> Void {
  let env = Env::new().await?;
  fill(&env).await?;

  // the point is already done when the last phase reports
  let log = CancelOn::phase(Phase::Cleaning);
  let r = env.scavenge_with(&log, &log.cancel, &[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert!(matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Done { sp }) if sp.event_number == 0
  ));
  let layout = env.layout().await?;

  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert!(matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Done { sp }) if sp.event_number == 1
  ));
  let mut expected = layout;
  expected.push((SCAVENGE_POINTS_STREAM.to_owned(), 1));
  assert_eq!(env.layout().await?, expected);
  OK
}

#[compio::test]
async fn newer_point_waits_for_cancelled_run() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 10, now_ms()).await?;
  env.metadata("a", 0, max_count(3)).await?;

  let log = CancelOn::phase(Phase::Accumulation);
  let r = env.scavenge_with(&log, &log.cancel, &[]).await?;
  assert_eq!(r, ScavengeResult::Stopped);

  env.events("a", 10, 14, now_ms()).await?;
  let points = LogScavengePointSource::new(&env.db, &env.index);
  points.add(Some(0), 0).await?;

  // the stopped run finishes its own point first
  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert!(matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Done { sp }) if sp.event_number == 0
  ));

  let (r, _) = env.scavenge(&[Conf::SyncOnly(true)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert!(matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Done { sp }) if sp.event_number == 1
  ));
  assert_eq!(env.in_log("a").await?, [11, 12, 13]);
  assert_eq!(env.index.event_numbers("a"), [11, 12, 13]);
  OK
}

#[compio::test]
async fn two_threads() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 40, now_ms()).await?;
  env.metadata("a", 0, max_count(1)).await?;

  let (r, log) = env.scavenge(&[Conf::Threads(2)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [39]);
  assert!(log.chunks_scavenged() > 1);
  OK
}

#[compio::test]
async fn merges_scavenged_chunks() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 40, now_ms()).await?;
  env.metadata("a", 0, max_count(1)).await?;
  let before = env.db.chunks().len();

  let (r, log) = env.scavenge(&[Conf::MergeChunks(true)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert!(log.chunks_merged() > 0);
  assert!(env.db.chunks().len() < before);
  assert_eq!(env.in_log("a").await?, [39]);
  assert_eq!(env.in_log("$$a").await?, [0]);
  OK
}

#[compio::test]
async fn next_run_is_incremental() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 5, now_ms()).await?;
  env.metadata("a", 0, max_count(2)).await?;
  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [3, 4]);

  env.events("a", 5, 9, now_ms()).await?;
  let (r, _) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [7, 8]);

  let points = LogScavengePointSource::new(&env.db, &env.index);
  assert_eq!(points.latest().await?.map(|sp| sp.event_number), Some(1));
  OK
}

#[compio::test]
async fn sync_only_needs_a_point() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 5, now_ms()).await?;
  env.metadata("a", 0, max_count(1)).await?;

  let (r, _) = env.scavenge(&[Conf::SyncOnly(true)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [0, 1, 2, 3, 4]);
  assert!(env.state()?.checkpoint()?.is_none());

  let points = LogScavengePointSource::new(&env.db, &env.index);
  points.add(None, 0).await?;
  let (r, _) = env.scavenge(&[Conf::SyncOnly(true)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(env.in_log("a").await?, [4]);
  OK
}

#[compio::test]
async fn retention_removes_old_chunks() -> Void {
  let env = Env::new().await?;
  env.events("old", 0, 4, OLD).await?;
  env.db.complete_chunk().await?;
  env.events("new", 0, 4, now_ms()).await?;

  let (r, log) = env
    .scavenge(&[Conf::RetainPeriod(Duration::from_secs(3600))])
    .await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(log.chunks_removed(), 1);
  assert!(env.in_log("old").await?.is_empty());
  assert!(env.index.event_numbers("old").is_empty());
  assert_eq!(env.in_log("new").await?, [0, 1, 2, 3]);
  OK
}

#[compio::test]
async fn tombstone_in_metastream_errors() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 2, now_ms()).await?;
  env.write(Prepare::tombstone("$$a", now_ms())).await?;

  let (r, log) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Errored);
  let (_, err) = log.result().unwrap();
  assert!(err.unwrap().contains("tombstone in metadata stream"));
  assert!(matches!(
    env.state()?.checkpoint()?,
    Some(Checkpoint::Accumulating { .. })
  ));
  OK
}

#[compio::test]
async fn metadata_in_transaction_errors() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 2, now_ms()).await?;
  env
    .write(Prepare::metadata("$$a", -1, max_count(1).to_json(), now_ms()))
    .await?;

  let (r, log) = env.scavenge(&[]).await?;
  assert_eq!(r, ScavengeResult::Errored);
  let (_, err) = log.result().unwrap();
  assert!(err.unwrap().contains("Accumulation"));
  assert_eq!(env.in_log("a").await?, [0, 1]);
  OK
}

#[compio::test]
async fn threshold_skips_light_chunks() -> Void {
  let env = Env::new().await?;
  env.events("a", 0, 10, now_ms()).await?;
  env.metadata("a", 0, max_count(9)).await?;

  let (r, log) = env.scavenge(&[Conf::Threshold(1000)]).await?;
  assert_eq!(r, ScavengeResult::Success);
  assert_eq!(log.chunks_scavenged(), 0);
  assert!(log.chunks_skipped() > 0);
  assert_eq!(env.in_log("a").await?.len(), 10);
  OK
}
