//! Cooperative cancellation token / 协作式取消令牌

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }

  /// `Err(Cancelled)` once cancelled / 已取消时返回错误
  #[inline]
  pub fn check(&self) -> Result<()> {
    if self.is_cancelled() {
      return Err(Error::Cancelled);
    }
    Ok(())
  }
}

/// Checks the token every `period` ticks / 每 period 次检查一次
pub struct Ticker {
  period: u32,
  n: u32,
}

impl Ticker {
  pub fn new(period: u32) -> Self {
    Self {
      period: period.max(1),
      n: 0,
    }
  }

  /// True when a check is due / 到达检查点时返回 true
  #[inline]
  pub fn tick(&mut self) -> bool {
    self.n += 1;
    if self.n >= self.period {
      self.n = 0;
      return true;
    }
    false
  }
}
