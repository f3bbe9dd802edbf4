//! Metastream name resolution / 元数据流名称解析

use crate::consts::METASTREAM_PREFIX;

pub trait MetastreamLookup {
  fn is_metastream(&self, stream: &str) -> bool;
  fn metastream_of(&self, stream: &str) -> String;
  /// Original stream of a metastream / 元数据流对应的原始流
  fn original_of(&self, metastream: &str) -> String;
}

/// `$$name` is the metastream of `name` / `$$name` 是 `name` 的元数据流
#[derive(Debug, Clone, Copy, Default)]
pub struct NameLookup;

impl MetastreamLookup for NameLookup {
  #[inline]
  fn is_metastream(&self, stream: &str) -> bool {
    stream.starts_with(METASTREAM_PREFIX)
  }

  fn metastream_of(&self, stream: &str) -> String {
    format!("{METASTREAM_PREFIX}{stream}")
  }

  fn original_of(&self, metastream: &str) -> String {
    metastream
      .strip_prefix(METASTREAM_PREFIX)
      .unwrap_or(metastream)
      .to_owned()
  }
}
