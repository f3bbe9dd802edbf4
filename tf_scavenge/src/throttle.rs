//! Shared throttle: after running for `t`, rest `t * (100 - p) / p`
//! 共享节流：运行 t 后休息 t * (100 - p) / p

use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::{cancel::Cancel, consts::THROTTLE_SLICE_MS, error::Result};

struct Inner {
  percent: f64,
  active_since: Instant,
  rested: Duration,
}

pub struct Throttle {
  inner: Mutex<Inner>,
}

impl Throttle {
  pub fn new(percent: f64) -> Self {
    Self {
      inner: Mutex::new(Inner {
        percent: percent.clamp(f64::MIN_POSITIVE, 100.0),
        active_since: Instant::now(),
        rested: Duration::ZERO,
      }),
    }
  }

  /// Re-target the active percent while running / 运行中调整活跃百分比
  pub fn set_percent(&self, percent: f64) {
    if percent > 0.0 && percent <= 100.0 {
      self.inner.lock().percent = percent;
    }
  }

  pub fn percent(&self) -> f64 {
    self.inner.lock().percent
  }

  pub fn total_rested(&self) -> Duration {
    self.inner.lock().rested
  }

  pub fn stats(&self) -> String {
    let g = self.inner.lock();
    format!("throttle {}% rested {:?}", g.percent, g.rested)
  }

  /// Sleep in proportion to the time spent working since the last rest
  /// 按上次休息以来的工作时长休眠
  pub async fn rest(&self, cancel: &Cancel) -> Result<()> {
    let mut left = {
      let mut g = self.inner.lock();
      let active = g.active_since.elapsed();
      g.active_since = Instant::now();
      if g.percent >= 100.0 {
        return cancel.check();
      }
      active.mul_f64((100.0 - g.percent) / g.percent)
    };
    debug!("SCAVENGING: resting {left:?}");
    let slice = Duration::from_millis(THROTTLE_SLICE_MS);
    let start = Instant::now();
    while !left.is_zero() {
      cancel.check()?;
      let d = left.min(slice);
      compio_runtime::time::sleep(d).await;
      left -= d;
    }
    let mut g = self.inner.lock();
    g.rested += start.elapsed();
    g.active_since = Instant::now();
    cancel.check()
  }
}
