//! Secondary hash index seen by the pipeline / 流水线使用的二级哈希索引
//!
//! Entries are `(stream hash, event number, log position)`. Reads by hash see every
//! stream sharing the hash; reads by id see only the named stream.
//! 按哈希读取会看到同哈希的所有流，按名称只看到该流。

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use parking_lot::RwLock;
use tf_chunk::LogRecord;

use crate::{handle::StreamHandle, hasher::StreamHasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
  pub hash: u64,
  pub event_number: i64,
  pub position: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInfo {
  pub event_number: i64,
  pub position: i64,
}

/// One page of a stream read / 一页流读取结果
#[derive(Debug, Clone, Default)]
pub struct EventSlice {
  pub events: Vec<EventInfo>,
  /// Event number to continue from / 续读事件号
  pub next: i64,
  pub is_end: bool,
}

pub trait IndexReader {
  /// Events numbered `from` and up, positioned before `before`, ascending
  /// 事件号不小于 from、位置早于 before 的事件，升序
  fn read_forward(&self, handle: &StreamHandle, from: i64, max: usize, before: i64) -> EventSlice;

  /// Events numbered `from` and down, descending. Negative `from` starts at the last.
  /// 事件号不大于 from 的事件，降序；from 为负时从最后一个开始
  fn read_backward(&self, handle: &StreamHandle, from: i64, max: usize, before: i64) -> EventSlice;
}

pub trait IndexScavenger {
  /// Next entries in index order after `after` / after 之后按索引顺序的条目
  fn entries_after(&self, after: Option<IndexEntry>, max: usize) -> Vec<IndexEntry>;

  fn remove(&self, entries: &[IndexEntry]);
}

/// In-memory index keeping the stream name of each entry / 内存索引，保存每条目的流名
pub struct MemIndex {
  hasher: Arc<dyn StreamHasher>,
  entries: RwLock<BTreeMap<IndexEntry, String>>,
}

impl MemIndex {
  pub fn new(hasher: Arc<dyn StreamHasher>) -> Self {
    Self {
      hasher,
      entries: RwLock::new(BTreeMap::new()),
    }
  }

  pub fn add(&self, stream: &str, event_number: i64, position: i64) {
    let e = IndexEntry {
      hash: self.hasher.hash(stream),
      event_number,
      position,
    };
    self.entries.write().insert(e, stream.to_owned());
  }

  /// Index a prepare, other records are ignored / 索引预写记录
  pub fn add_record(&self, record: &LogRecord) -> bool {
    match record.as_prepare() {
      Some(p) => {
        self.add(&p.stream, p.event_number, p.log_position);
        true
      }
      None => false,
    }
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }

  /// Every entry with its stream, in index order / 全部条目及流名
  pub fn entries(&self) -> Vec<(IndexEntry, String)> {
    self
      .entries
      .read()
      .iter()
      .map(|(e, s)| (*e, s.clone()))
      .collect()
  }

  /// Event numbers of `stream`, ascending / 流的事件号
  pub fn event_numbers(&self, stream: &str) -> Vec<i64> {
    let h = StreamHandle::ById(stream.to_owned());
    self
      .read_forward(&h, 0, usize::MAX, i64::MAX)
      .events
      .iter()
      .map(|e| e.event_number)
      .collect()
  }

  fn resolve<'a>(&self, handle: &'a StreamHandle) -> (u64, Option<&'a str>) {
    match handle {
      StreamHandle::ByHash(h) => (*h, None),
      StreamHandle::ById(id) => (self.hasher.hash(id), Some(id.as_str())),
    }
  }
}

fn key(hash: u64, event_number: i64, position: i64) -> IndexEntry {
  IndexEntry {
    hash,
    event_number,
    position,
  }
}

impl IndexReader for MemIndex {
  fn read_forward(&self, handle: &StreamHandle, from: i64, max: usize, before: i64) -> EventSlice {
    let (hash, id) = self.resolve(handle);
    let entries = self.entries.read();
    let range = entries.range(key(hash, from.max(0), i64::MIN)..=key(hash, i64::MAX, i64::MAX));
    let mut events = Vec::new();
    let mut is_end = true;
    for (e, stream) in range {
      if e.position >= before || id.is_some_and(|id| id != stream) {
        continue;
      }
      if events.len() == max {
        is_end = false;
        break;
      }
      events.push(EventInfo {
        event_number: e.event_number,
        position: e.position,
      });
    }
    let next = events
      .last()
      .map_or(from, |e| e.event_number.saturating_add(1));
    EventSlice {
      events,
      next,
      is_end,
    }
  }

  fn read_backward(&self, handle: &StreamHandle, from: i64, max: usize, before: i64) -> EventSlice {
    let (hash, id) = self.resolve(handle);
    let from = if from < 0 { i64::MAX } else { from };
    let entries = self.entries.read();
    let range = entries.range((
      Bound::Included(key(hash, i64::MIN, i64::MIN)),
      Bound::Included(key(hash, from, i64::MAX)),
    ));
    let mut events = Vec::new();
    let mut is_end = true;
    for (e, stream) in range.rev() {
      if e.position >= before || id.is_some_and(|id| id != stream) {
        continue;
      }
      if events.len() == max {
        is_end = false;
        break;
      }
      events.push(EventInfo {
        event_number: e.event_number,
        position: e.position,
      });
    }
    let next = events.last().map_or(from, |e| e.event_number - 1);
    EventSlice {
      events,
      next,
      is_end,
    }
  }
}

impl IndexScavenger for MemIndex {
  fn entries_after(&self, after: Option<IndexEntry>, max: usize) -> Vec<IndexEntry> {
    let entries = self.entries.read();
    let lower = match after {
      Some(a) => Bound::Excluded(a),
      None => Bound::Unbounded,
    };
    entries
      .range((lower, Bound::Unbounded))
      .take(max)
      .map(|(e, _)| *e)
      .collect()
  }

  fn remove(&self, entries: &[IndexEntry]) {
    let mut map = self.entries.write();
    for e in entries {
      map.remove(e);
    }
  }
}
