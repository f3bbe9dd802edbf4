use std::collections::HashMap;

use crate::{
  consts::{DISCARD_WEIGHT, MAYBE_DISCARD_WEIGHT},
  error::Result,
  state::ScavengeState,
};

/// Buffers chunk weights until the transaction is about to commit
/// 缓存块权重，提交前统一写入
#[derive(Default)]
pub struct WeightAccumulator {
  weights: HashMap<u32, f64>,
}

impl WeightAccumulator {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn on_discard(&mut self, logical_chunk: u32) {
    *self.weights.entry(logical_chunk).or_default() += DISCARD_WEIGHT;
  }

  #[inline]
  pub fn on_maybe_discard(&mut self, logical_chunk: u32) {
    *self.weights.entry(logical_chunk).or_default() += MAYBE_DISCARD_WEIGHT;
  }

  pub fn flush(&mut self, state: &ScavengeState) -> Result<()> {
    let mut weights: Vec<_> = self.weights.drain().collect();
    weights.sort_unstable_by_key(|(n, _)| *n);
    for (n, w) in weights {
      state.increase_chunk_weight(n, w)?;
    }
    Ok(())
  }
}
