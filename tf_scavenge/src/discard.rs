//! Per-stream discard boundary / 流丢弃边界

use std::fmt;

use serde::{Deserialize, Serialize};

/// First event number to keep: everything below it may go
/// 首个保留的事件号，其下的事件可以丢弃
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DiscardPoint(i64);

impl DiscardPoint {
  pub const KEEP_ALL: Self = Self(0);

  /// Discard events below `n` / 丢弃小于 n 的事件
  #[inline]
  pub const fn discard_before(n: i64) -> Self {
    Self(n)
  }

  /// Discard events up to and including `n` / 丢弃不大于 n 的事件
  #[inline]
  pub const fn discard_including(n: i64) -> Self {
    Self(n.saturating_add(1))
  }

  #[inline]
  pub const fn first_to_keep(self) -> i64 {
    self.0
  }

  #[inline]
  pub const fn should_discard(self, event_number: i64) -> bool {
    event_number < self.0
  }

  /// The point that discards more / 取丢弃更多的一个
  #[inline]
  pub fn or(self, other: Self) -> Self {
    self.max(other)
  }
}

impl fmt::Display for DiscardPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if *self == Self::KEEP_ALL {
      f.write_str("keep all")
    } else {
      write!(f, "discard before {}", self.0)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn boundaries() {
    assert!(!DiscardPoint::KEEP_ALL.should_discard(0));
    let p = DiscardPoint::discard_including(4);
    assert!(p.should_discard(4));
    assert!(!p.should_discard(5));
    assert_eq!(p, DiscardPoint::discard_before(5));
    assert_eq!(p.or(DiscardPoint::discard_before(2)), p);
    assert_eq!(DiscardPoint::discard_including(i64::MAX).first_to_keep(), i64::MAX);
  }
}
