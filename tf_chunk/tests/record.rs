//! Record codec tests / 记录编解码测试

use bytes::Bytes;
use proptest::prelude::*;
use tf_chunk::{Commit, LogRecord, Prepare, PrepareFlags, System, record::KIND_SYSTEM};

#[static_init::constructor(0)]
extern "C" fn _log_init() {
  log_init::init();
}

fn framed(record: &LogRecord) -> Vec<u8> {
  let mut buf = Vec::new();
  record.frame_into(&mut buf).unwrap();
  buf
}

#[test]
fn frame_has_matching_prefix_and_suffix() {
  let mut p = Prepare::event("orders-1", 3, "placed", Bytes::from_static(b"{}"), 1_000);
  p.log_position = 4096;
  let rec = LogRecord::from(p);
  let buf = framed(&rec);
  let len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
  assert_eq!(buf.len(), len + 8);
  assert_eq!(buf[..4], buf[buf.len() - 4..]);
  assert_eq!(LogRecord::decode(&buf[4..4 + len]).unwrap(), rec);
  assert_eq!(rec.next_log_position(len as u32), 4096 + len as i64 + 8);
}

#[test]
fn tombstone_and_metadata_flags() {
  let t = Prepare::tombstone("s", 1);
  assert!(t.is_tombstone());
  assert!(t.is_self_committed());
  assert_eq!(t.event_number, i64::MAX);

  let m = Prepare::metadata("$$s", 0, Bytes::from_static(br#"{"$maxCount":1}"#), 1);
  assert!(m.flags.has(PrepareFlags::IS_JSON));
  assert_eq!(m.event_type, "$metadata");
  assert!(!m.is_tombstone());
}

#[test]
fn set_position_moves_self_committed_transaction() {
  let mut rec = LogRecord::from(Prepare::event("s", 0, "e", Bytes::new(), 1));
  rec.set_position(777);
  let p = rec.as_prepare().unwrap();
  assert_eq!(p.log_position, 777);
  assert_eq!(p.transaction_position, 777);
}

#[test]
fn commit_and_system_decode() {
  let c = LogRecord::from(Commit {
    log_position: 10,
    transaction_position: 2,
    first_event_number: 5,
    timestamp: 9,
  });
  let s = LogRecord::from(System {
    log_position: 20,
    timestamp: 9,
    kind: 1,
    data: Bytes::from_static(b"epoch"),
  });
  for rec in [c, s.clone()] {
    let buf = framed(&rec);
    assert_eq!(LogRecord::decode(&buf[4..buf.len() - 4]).unwrap(), rec);
  }
  assert_eq!(s.kind(), KIND_SYSTEM);
}

#[test]
fn trailing_bytes_rejected() {
  let rec = LogRecord::from(Prepare::event("s", 0, "e", Bytes::new(), 1));
  let buf = framed(&rec);
  let mut body = buf[4..buf.len() - 4].to_vec();
  body.push(0);
  assert!(LogRecord::decode(&body).is_err());
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(200))]

  /// Garbage never panics the decoder / 任意字节不会使解码崩溃
  #[test]
  fn decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..256)) {
    let _ = LogRecord::decode(&data);
  }

  #[test]
  fn truncated_prepare_is_error(
    stream in "[a-z]{1,12}",
    n in 0i64..1000,
    payload in prop::collection::vec(any::<u8>(), 0..64),
    cut in 1usize..16,
  ) {
    let rec = LogRecord::from(Prepare::event(stream, n, "t", payload, 5));
    let buf = framed(&rec);
    let body = &buf[4..buf.len() - 4];
    let cut = cut.min(body.len());
    prop_assert!(LogRecord::decode(&body[..body.len() - cut]).is_err());
  }
}
