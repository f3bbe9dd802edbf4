//! Stream handle: by hash unless the hash collides / 流句柄：哈希冲突时改用名称

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamHandle {
  ByHash(u64),
  ById(String),
}

impl StreamHandle {
  /// Storage key, ordered for batched enumeration / 存储键
  pub fn key(&self) -> String {
    match self {
      Self::ByHash(h) => format!("h:{h:016x}"),
      Self::ById(id) => format!("i:{id}"),
    }
  }

  pub fn from_key(key: &str) -> Result<Self> {
    if let Some(hex) = key.strip_prefix("h:") {
      return u64::from_str_radix(hex, 16)
        .map(Self::ByHash)
        .map_err(|e| Error::InvalidOperation(format!("bad stream key {key}: {e}")));
    }
    if let Some(id) = key.strip_prefix("i:") {
      return Ok(Self::ById(id.to_owned()));
    }
    Err(Error::InvalidOperation(format!("bad stream key {key}")))
  }
}

impl fmt::Display for StreamHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ByHash(h) => write!(f, "hash {h:#018x}"),
      Self::ById(id) => write!(f, "id \"{id}\""),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_round_trip() {
    for h in [StreamHandle::ByHash(0xabc), StreamHandle::ById("i:odd".into())] {
      assert_eq!(StreamHandle::from_key(&h.key()).unwrap(), h);
    }
    assert!(StreamHandle::from_key("x:1").is_err());
  }
}
