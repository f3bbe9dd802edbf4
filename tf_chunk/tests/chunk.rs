//! Chunk engine tests / 块引擎测试

use std::{path::Path, time::Duration};

use aok::{OK, Void};
use bytes::Bytes;
use md5::{Digest, Md5};
use tf_chunk::{
  Append, Chunk, ChunkConf, ChunkFooter, Conf, Error, Life, LogRecord, PosMap, PosMapFormat, Prepare,
  consts::{ALIGN, CHECKSUM_SIZE, FOOTER_SIZE, HEADER_SIZE, aligned_size},
};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

const SIZE: u32 = 64 * 1024;

fn event(stream: &str, n: i64) -> LogRecord {
  Prepare::event(stream, n, "e", Bytes::from(vec![n as u8; 40]), 1_000 + n).into()
}

/// Append events, returning (local position, record) / 追加事件
async fn fill(chunk: &Chunk, start: i64, count: i64) -> tf_chunk::Result<Vec<(i64, LogRecord)>> {
  let mut out = Vec::new();
  for n in 0..count {
    let mut rec = event("s", n);
    let pos = chunk.write_position() as i64;
    rec.set_position(start + pos);
    match chunk.append(&rec).await? {
      Append::Written { pos: p, .. } => assert_eq!(p as i64, pos),
      Append::Full(_) => panic!("unexpected full chunk"),
    }
    out.push((pos, rec));
  }
  Ok(out)
}

async fn new_chunk(path: &Path, scavenged: bool) -> tf_chunk::Result<Chunk> {
  Chunk::create_new(path, SIZE, 0, 0, scavenged, ChunkConf::default()).await
}

#[compio::test]
async fn write_complete_reopen() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("chunk-000000.000000");
  let chunk = new_chunk(&path, false).await?;
  let written = fill(&chunk, 0, 20).await?;
  chunk.complete().await?;
  assert!(chunk.is_read_only());
  assert_eq!(chunk.file_size() % ALIGN, 0);
  assert!(matches!(chunk.append(&event("s", 99)).await, Err(Error::ReadOnly)));
  chunk.dispose();

  let chunk = Chunk::open_completed(&path, true, ChunkConf::default()).await?;
  let footer = chunk.footer().unwrap();
  assert_eq!(footer.map_count(), 0);
  assert_eq!(footer.physical_data_size(), footer.logical_data_size());

  let mut pos = 0;
  for (p, rec) in &written {
    let r = chunk.try_read_closest_forward(pos).await?.unwrap();
    assert_eq!(pos, *p);
    assert_eq!(&r.record, rec);
    pos = r.next;
  }
  assert!(chunk.try_read_closest_forward(pos).await?.is_none());

  let mut pos = chunk.logical_data_size() as i64;
  for (_, rec) in written.iter().rev() {
    let r = chunk.try_read_closest_backward(pos).await?.unwrap();
    assert_eq!(&r.record, rec);
    pos = r.next;
  }
  assert_eq!(pos, 0);
  assert!(chunk.try_read_closest_backward(pos).await?.is_none());

  let last = chunk.try_read_last().await?.unwrap();
  assert_eq!(&last.record, &written[19].1);
  assert!(chunk.exists_at(written[3].0).await?);
  assert!(!chunk.exists_at(chunk.logical_data_size() as i64).await?);
  OK
}

#[compio::test]
async fn full_chunk_reports_full() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("small");
  let chunk = Chunk::create_new(&path, 200, 0, 0, false, ChunkConf::default()).await?;
  let mut rec = event("s", 0);
  rec.set_position(0);
  assert!(chunk.append(&rec).await?.is_written());
  let mut rec = event("s", 1);
  rec.set_position(chunk.write_position() as i64);
  let before = chunk.write_position();
  assert_eq!(chunk.append(&rec).await?, Append::Full(before));
  assert_eq!(chunk.write_position(), before);
  OK
}

#[compio::test]
async fn checksum_detects_corruption() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("c");
  let chunk = new_chunk(&path, false).await?;
  fill(&chunk, 0, 5).await?;
  chunk.complete().await?;
  chunk.dispose();

  let mut raw = std::fs::read(&path)?;
  raw[HEADER_SIZE + 30] ^= 0xFF;
  std::fs::write(&path, &raw)?;

  assert!(matches!(
    Chunk::open_completed(&path, true, ChunkConf::default()).await,
    Err(Error::HashMismatch(_))
  ));
  let chunk = Chunk::open_completed(&path, false, ChunkConf::default()).await?;
  assert!(matches!(chunk.verify_file_hash().await, Err(Error::HashMismatch(_))));
  OK
}

#[compio::test]
async fn ongoing_reopen_truncates_tail() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("o");
  let chunk = new_chunk(&path, false).await?;
  let written = fill(&chunk, 0, 3).await?;
  let keep = chunk.write_position();
  fill(&chunk, keep as i64, 1).await?;
  chunk.flush().await?;
  chunk.dispose();

  let chunk = Chunk::open_ongoing(&path, keep, ChunkConf::default()).await?;
  assert_eq!(std::fs::metadata(&path)?.len(), HEADER_SIZE as u64 + keep);
  assert_eq!(chunk.write_position(), keep);
  assert_eq!(
    chunk.try_read_last().await?.unwrap().record,
    written[2].1
  );
  fill(&chunk, keep as i64, 2).await?;
  chunk.complete().await?;
  chunk.verify_file_hash().await?;
  OK
}

#[compio::test]
async fn missing_or_unfinished_file_is_corrupt() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("x");
  assert!(matches!(
    Chunk::open_completed(&path, false, ChunkConf::default()).await,
    Err(Error::CorruptChunk { .. })
  ));
  let chunk = new_chunk(&path, false).await?;
  fill(&chunk, 0, 1).await?;
  chunk.flush().await?;
  chunk.dispose();
  assert!(matches!(
    Chunk::open_completed(&path, false, ChunkConf::default()).await,
    Err(Error::CorruptChunk { .. })
  ));
  OK
}

/// Scavenged chunk with gaps in logical positions / 逻辑位置有空洞的已清理块
async fn scavenged(path: &Path, conf: ChunkConf) -> tf_chunk::Result<(Chunk, Vec<(i64, LogRecord)>)> {
  let chunk = Chunk::create_new(path, SIZE, 0, 0, true, conf).await?;
  let mut kept = Vec::new();
  let mut map = Vec::new();
  let mut logical = 0i64;
  for n in 0..200 {
    let rec = {
      let mut r = event("s", n);
      r.set_position(logical);
      r
    };
    let mut buf = Vec::new();
    let len = rec.frame_into(&mut buf)?;
    if n % 3 != 0 {
      let actual = chunk.write_position() as u32;
      assert!(chunk.append(&rec).await?.is_written());
      map.push(PosMap::new(logical, actual));
      kept.push((logical, rec.clone()));
    }
    logical = rec.next_log_position(len);
  }
  chunk.complete_scavenged(&map).await?;
  Ok((chunk, kept))
}

async fn check_scavenged(chunk: &Chunk, kept: &[(i64, LogRecord)]) -> Void {
  for (pos, rec) in kept {
    let r = chunk.try_read_at(*pos, false).await?.unwrap();
    assert_eq!(&r.record, rec);
    assert!(chunk.exists_at(*pos).await?);
    // a discarded position just before a kept one reads forward into it
    assert_eq!(
      chunk.try_read_closest_forward(pos - 1).await?.unwrap().record,
      *rec
    );
  }
  assert!(chunk.try_read_at(0, true).await?.is_none());
  assert!(!chunk.exists_at(0).await?);

  let mut pos = 0;
  let mut n = 0;
  while let Some(r) = chunk.try_read_closest_forward(pos).await? {
    assert_eq!(r.record, kept[n].1);
    pos = r.next;
    n += 1;
  }
  assert_eq!(n, kept.len());

  let mut pos = chunk.logical_data_size() as i64;
  let mut n = kept.len();
  while let Some(r) = chunk.try_read_closest_backward(pos).await? {
    n -= 1;
    assert_eq!(r.record, kept[n].1);
    pos = r.next;
  }
  assert_eq!(n, 0);
  OK
}

#[compio::test]
async fn scavenged_reads_with_and_without_midpoints() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("s");
  let conf = ChunkConf::parse(&[Conf::MidpointsDepth(2)]);
  let (chunk, kept) = scavenged(&path, conf).await?;
  check_scavenged(&chunk, &kept).await?;
  chunk.dispose();

  let chunk = Chunk::open_completed(&path, true, conf).await?;
  assert!(chunk.is_scavenged());
  check_scavenged(&chunk, &kept).await?;
  assert!(chunk.read_side().midpoint_count().is_some_and(|n| n > 1));

  chunk.read_side().uncache();
  assert_eq!(chunk.read_side().midpoint_count(), None);
  check_scavenged(&chunk, &kept).await?;
  assert_eq!(chunk.read_side().midpoint_count(), None);

  let footer = chunk.footer().unwrap();
  let expect = HEADER_SIZE as u64 + footer.physical_data_size() + footer.map_size() + FOOTER_SIZE as u64;
  assert!(chunk.file_size() >= expect);
  OK
}

/// Rewrite a completed scavenged chunk file with 8-byte map entries
/// 以 8 字节映射项重写已清理块文件
fn to_legacy_map(raw: &[u8]) -> Vec<u8> {
  let footer = ChunkFooter::decode(&raw[raw.len() - FOOTER_SIZE..]).unwrap();
  let data_end = HEADER_SIZE + footer.physical_data_size() as usize;
  let table = &raw[data_end..data_end + footer.map_size() as usize];
  let maps: Vec<PosMap> = (0..footer.map_count())
    .map(|i| PosMapFormat::Full.read(table, i))
    .collect();
  let legacy = PosMap::encode_all(&maps, PosMapFormat::Legacy);

  let mut out = raw[..data_end].to_vec();
  out.extend_from_slice(&legacy);
  let total = aligned_size((out.len() + FOOTER_SIZE) as u64) as usize;
  out.resize(total - FOOTER_SIZE, 0);

  let new = ChunkFooter::new(
    PosMapFormat::Legacy,
    footer.physical_data_size() as u32,
    footer.logical_data_size(),
    legacy.len() as u32,
    [0; CHECKSUM_SIZE],
  );
  let mut md5 = Md5::new();
  md5.update(&out);
  md5.update(new.hashed_bytes());
  let checksum: [u8; CHECKSUM_SIZE] = md5.finalize().into();
  out.extend_from_slice(new.hashed_bytes());
  out.extend_from_slice(&checksum);
  assert_eq!(out.len() % ALIGN as usize, 0);
  out
}

#[compio::test]
async fn legacy_map_chunk_opens_and_reads() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("s");
  let conf = ChunkConf::parse(&[Conf::MidpointsDepth(2)]);
  let (chunk, kept) = scavenged(&path, conf).await?;
  chunk.dispose();
  chunk.wait_for_destroy(Duration::from_secs(5)).await?;
  drop(chunk);

  let legacy_path = dir.path().join("legacy");
  std::fs::write(&legacy_path, to_legacy_map(&std::fs::read(&path)?))?;

  let chunk = Chunk::open_completed(&legacy_path, true, conf).await?;
  let footer = chunk.footer().unwrap();
  assert_eq!(footer.format(), PosMapFormat::Legacy);
  assert_eq!(footer.map_count(), kept.len());
  check_scavenged(&chunk, &kept).await?;

  chunk.read_side().uncache();
  check_scavenged(&chunk, &kept).await?;
  OK
}

#[compio::test]
async fn overlong_stream_name_is_rejected_before_write() -> Void {
  let dir = tempfile::tempdir()?;
  let chunk = Chunk::create_new(dir.path().join("c"), 4 * SIZE, 0, 0, false, ChunkConf::default()).await?;
  let before = chunk.write_position();

  let mut rec: LogRecord =
    Prepare::event("x".repeat(u16::MAX as usize + 1), 0, "e", Bytes::new(), 1).into();
  rec.set_position(0);
  assert!(matches!(chunk.append(&rec).await, Err(Error::InvalidRecord(_))));
  assert_eq!(chunk.write_position(), before);

  // the longest name that fits still round trips
  let mut rec: LogRecord =
    Prepare::event("y".repeat(u16::MAX as usize), 0, "e", Bytes::new(), 1).into();
  rec.set_position(0);
  assert!(chunk.append(&rec).await?.is_written());
  assert_eq!(chunk.try_read_at(0, false).await?.unwrap().record, rec);
  OK
}

#[compio::test]
async fn scavenged_chunk_rejects_plain_complete() -> Void {
  let dir = tempfile::tempdir()?;
  let plain = new_chunk(&dir.path().join("p"), false).await?;
  assert!(matches!(
    plain.complete_scavenged(&[]).await,
    Err(Error::ScavengedMismatch(_))
  ));
  let sc = new_chunk(&dir.path().join("q"), true).await?;
  assert!(matches!(sc.complete().await, Err(Error::ScavengedMismatch(_))));
  OK
}

#[compio::test]
async fn memory_cache_serves_reads() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("m");
  let (chunk, kept) = scavenged(&path, ChunkConf::default()).await?;
  chunk.cache_in_memory().await?;
  assert!(chunk.is_cached());
  assert_eq!(chunk.read_side().midpoint_count(), None);
  check_scavenged(&chunk, &kept).await?;

  // memory reads survive the file disappearing
  let moved = dir.path().join("moved");
  std::fs::rename(&path, &moved)?;
  assert_eq!(
    chunk.try_read_at(kept[5].0, false).await?.unwrap().record,
    kept[5].1
  );
  std::fs::rename(&moved, &path)?;

  chunk.uncache_from_memory();
  assert!(!chunk.is_cached());
  check_scavenged(&chunk, &kept).await?;
  OK
}

#[compio::test]
async fn ongoing_chunk_is_not_cached() -> Void {
  let dir = tempfile::tempdir()?;
  let chunk = new_chunk(&dir.path().join("n"), false).await?;
  chunk.cache_in_memory().await?;
  assert!(!chunk.is_cached());
  OK
}

#[compio::test]
async fn marked_chunk_deletes_after_last_reader() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("d");
  let chunk = new_chunk(&path, false).await?;
  fill(&chunk, 0, 4).await?;
  chunk.complete().await?;

  let bulk = chunk.acquire_bulk().await?;
  chunk.mark_for_deletion();
  assert_eq!(chunk.life(), Life::Draining);
  assert!(path.exists());
  assert!(matches!(
    chunk.try_read_first().await,
    Err(Error::FileBeingDeleted)
  ));
  assert!(matches!(chunk.acquire_bulk().await, Err(Error::FileBeingDeleted)));

  drop(bulk);
  chunk.wait_for_destroy(Duration::from_secs(5)).await?;
  assert_eq!(chunk.life(), Life::Destroyed);
  assert!(!path.exists());
  OK
}

#[compio::test]
async fn readers_wait_for_a_free_handle() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("w");
  let chunk = new_chunk(&path, false).await?;
  let written = fill(&chunk, 0, 8).await?;
  chunk.complete().await?;
  chunk.dispose();

  let conf = ChunkConf::parse(&[Conf::ReaderCount(1), Conf::MaxReaderCount(1)]);
  let chunk = Chunk::open_completed(&path, false, conf).await?;
  let reads = futures::future::join_all(
    written
      .iter()
      .map(|(p, _)| chunk.try_read_closest_forward(*p)),
  )
  .await;
  for (r, (_, rec)) in reads.into_iter().zip(&written) {
    assert_eq!(&r?.unwrap().record, rec);
  }
  OK
}

#[compio::test]
async fn disposed_chunk_keeps_file() -> Void {
  let dir = tempfile::tempdir()?;
  let path = dir.path().join("k");
  let chunk = new_chunk(&path, false).await?;
  fill(&chunk, 0, 2).await?;
  chunk.complete().await?;
  chunk.cache_in_memory().await?;
  chunk.dispose();
  chunk.wait_for_destroy(Duration::from_secs(5)).await?;
  assert!(path.exists());
  OK
}

#[compio::test]
async fn raw_copy_round_trip() -> Void {
  let dir = tempfile::tempdir()?;
  let src_path = dir.path().join("src");
  let src = new_chunk(&src_path, false).await?;
  let written = fill(&src, 0, 10).await?;
  src.complete().await?;

  let raw = std::fs::read(&src_path)?;
  let dst = Chunk::create_with_header(
    dir.path().join("dst"),
    *src.header(),
    raw.len() as u64,
    ChunkConf::default(),
  )
  .await?;
  assert!(matches!(dst.complete_raw().await, Err(Error::NotFullyWritten(..))));
  for block in raw[HEADER_SIZE..].chunks(1000) {
    assert!(dst.append_raw(block).await?);
  }
  assert!(!dst.append_raw(&[0]).await?);
  dst.complete_raw().await?;
  dst.verify_file_hash().await?;
  assert_eq!(
    dst.try_read_last().await?.unwrap().record,
    written[9].1
  );
  OK
}
